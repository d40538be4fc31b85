use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tokio::sync::watch;
use tracing::{Level, error, warn};
use tracing_subscriber::FmtSubscriber;

use legiscrawl::config::{ScrapeConfig, SessionConfig};
use legiscrawl::retry::RetryPolicy;
use legiscrawl::webdriver::{WebDriverConfig, WebDriverFactory};
use legiscrawl::{RunError, pipeline};

#[derive(Debug, Parser)]
#[command(
    name = "legiscrawl",
    version,
    about = "Scrape legislation.govt.nz into deduplicated per-category JSON collections"
)]
struct Cli {
    /// Listing pages to traverse, newest year first
    #[arg(long, value_name = "N", default_value_t = 5)]
    max_pages: u32,

    /// Minimum delay between requests, in milliseconds
    #[arg(long, value_name = "MS", default_value_t = 2000)]
    delay_ms: u64,

    /// Output directory for the collection files
    #[arg(long, value_name = "DIR", default_value = "./data")]
    out_dir: PathBuf,

    /// Fetch worker pool size (1 = strictly sequential)
    #[arg(long, value_name = "N", default_value_t = 1)]
    concurrency: usize,

    /// Also save after every N accepted merges
    #[arg(long, value_name = "N")]
    checkpoint_every: Option<usize>,

    /// WebDriver endpoint (a running chromedriver)
    #[arg(long, value_name = "URL", default_value = "http://localhost:4444")]
    webdriver_url: String,

    /// Run the browser with a visible window
    #[arg(long, default_value_t = false)]
    headed: bool,

    /// Fetch attempts per item before giving up
    #[arg(long, value_name = "N", default_value_t = 4)]
    max_attempts: u32,

    /// Browser session restarts allowed per run
    #[arg(long, value_name = "N", default_value_t = 3)]
    max_restarts: u32,

    /// Increase log verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn scrape_config(&self) -> ScrapeConfig {
        ScrapeConfig {
            max_pages: self.max_pages.max(1),
            delay: Duration::from_millis(self.delay_ms),
            out_dir: self.out_dir.clone(),
            concurrency: self.concurrency.max(1),
            checkpoint_every: self.checkpoint_every,
            retry: RetryPolicy {
                max_attempts: self.max_attempts.max(1),
                ..RetryPolicy::default()
            },
            session: SessionConfig {
                webdriver_url: self.webdriver_url.clone(),
                headless: !self.headed,
                max_restarts: self.max_restarts,
                ..SessionConfig::default()
            },
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("failed to install log subscriber");
    }

    let config = cli.scrape_config();
    let factory = match WebDriverFactory::new(WebDriverConfig {
        endpoint: config.session.webdriver_url.clone(),
        headless: config.session.headless,
    }) {
        Ok(factory) => factory,
        Err(err) => {
            error!("{err}");
            return ExitCode::from(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, finishing current work and saving");
            let _ = shutdown_tx.send(true);
        }
    });

    match pipeline::run(&config, factory, shutdown_rx).await {
        Ok(summary) => {
            summary.log();
            ExitCode::SUCCESS
        }
        Err(err @ RunError::Session(_)) => {
            error!("run aborted, partial results saved: {err}");
            ExitCode::from(1)
        }
        Err(err @ RunError::Store(_)) => {
            error!("run aborted: {err}");
            ExitCode::from(2)
        }
    }
}
