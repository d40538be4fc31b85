//! W3C WebDriver implementation of the [`Driver`] capability trait.
//!
//! Talks the wire protocol directly over reqwest: `POST /session` with
//! headless Chrome capabilities, `POST .../url` to navigate,
//! `POST .../execute/sync` for readiness polling and page snapshots, and
//! `DELETE /session/{id}` on close. Expects a chromedriver (or compatible)
//! endpoint that is already running.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::debug;

use crate::error::{FetchError, SessionError};
use crate::session::{Driver, DriverFactory};

const POLL_INTERVAL: Duration = Duration::from_millis(250);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(40);

#[derive(Debug, Clone)]
pub struct WebDriverConfig {
    pub endpoint: String,
    pub headless: bool,
}

pub struct WebDriverFactory {
    config: WebDriverConfig,
    client: reqwest::Client,
}

impl WebDriverFactory {
    pub fn new(config: WebDriverConfig) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SessionError::Create(format!("http client build failed: {e}")))?;
        Ok(Self { config, client })
    }
}

impl DriverFactory for WebDriverFactory {
    type Driver = WebDriverSession;

    async fn create(&self) -> Result<WebDriverSession, SessionError> {
        let base = self.config.endpoint.trim_end_matches('/').to_string();
        let caps = chrome_capabilities(self.config.headless);
        let res = self
            .client
            .post(format!("{base}/session"))
            .json(&caps)
            .send()
            .await
            .map_err(|e| SessionError::Create(format!("session create request failed: {e}")))?;
        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| SessionError::Create(format!("session create read failed: {e}")))?;
        if !status.is_success() {
            return Err(SessionError::Create(format!(
                "session create HTTP {}: {}",
                status.as_u16(),
                truncate_for_log(&body, 260)
            )));
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| SessionError::Create(format!("session create parse failed: {e}")))?;
        if let Some(err) = value.pointer("/value/error").and_then(|v| v.as_str()) {
            let message = value
                .pointer("/value/message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown webdriver error");
            return Err(SessionError::Create(format!("{err}: {message}")));
        }

        let session_id = value
            .pointer("/value/sessionId")
            .and_then(|v| v.as_str())
            .or_else(|| value.pointer("/sessionId").and_then(|v| v.as_str()))
            .map(|s| s.to_string())
            .ok_or_else(|| {
                SessionError::Create(format!(
                    "session id missing in response: {}",
                    truncate_for_log(&body, 220)
                ))
            })?;

        debug!("created webdriver session {session_id}");
        Ok(WebDriverSession {
            client: self.client.clone(),
            base,
            session_id,
        })
    }
}

pub struct WebDriverSession {
    client: reqwest::Client,
    base: String,
    session_id: String,
}

impl WebDriverSession {
    async fn execute(&self, script: &str, args: Value) -> Result<Value, FetchError> {
        let endpoint = format!(
            "{}/session/{}/execute/sync",
            self.base, self.session_id
        );
        let res = self
            .client
            .post(endpoint)
            .json(&json!({ "script": script, "args": args }))
            .send()
            .await?;
        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(classify_protocol_body(&body, status.as_u16()));
        }
        let value: Value = serde_json::from_str(&body)
            .map_err(|e| FetchError::Protocol(format!("execute parse failed: {e}")))?;
        if let Some(err) = value.pointer("/value/error").and_then(|v| v.as_str()) {
            let message = value
                .pointer("/value/message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown execute error");
            return Err(classify_wd_error(err, message));
        }
        Ok(value.pointer("/value").cloned().unwrap_or(Value::Null))
    }
}

impl Driver for WebDriverSession {
    async fn navigate(&self, url: &str) -> Result<(), FetchError> {
        let endpoint = format!("{}/session/{}/url", self.base, self.session_id);
        let res = self
            .client
            .post(endpoint)
            .json(&json!({ "url": url }))
            .send()
            .await?;
        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(classify_protocol_body(&body, status.as_u16()));
        }
        let value: Value = serde_json::from_str(&body).unwrap_or_default();
        if let Some(err) = value.pointer("/value/error").and_then(|v| v.as_str()) {
            let message = value
                .pointer("/value/message")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown navigate error");
            return Err(classify_wd_error(err, message));
        }
        Ok(())
    }

    async fn wait_for(&self, css: &str, timeout: Duration) -> Result<(), FetchError> {
        let deadline = Instant::now() + timeout;
        let script = "return document.querySelector(arguments[0]) !== null;";
        loop {
            let found = self
                .execute(script, json!([css]))
                .await?
                .as_bool()
                .unwrap_or(false);
            if found {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(FetchError::Timeout(format!(
                    "content marker {css:?} not present after {timeout:?}"
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn page_source(&self) -> Result<String, FetchError> {
        let script = "return document.documentElement ? document.documentElement.outerHTML : \"\";";
        let html = self
            .execute(script, json!([]))
            .await?
            .as_str()
            .unwrap_or_default()
            .to_string();
        if html.is_empty() {
            return Err(FetchError::Protocol("empty rendered snapshot".to_string()));
        }
        Ok(html)
    }

    async fn is_healthy(&self) -> bool {
        self.execute("return true;", json!([])).await.is_ok()
    }

    async fn close(&self) {
        let endpoint = format!("{}/session/{}", self.base, self.session_id);
        let _ = self.client.delete(endpoint).send().await;
        debug!("closed webdriver session {}", self.session_id);
    }
}

fn chrome_capabilities(headless: bool) -> Value {
    let mut args = vec![
        "--disable-gpu".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--window-size=1920,1080".to_string(),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
    ];
    if headless {
        args.push("--headless".to_string());
    }
    if !cfg!(target_os = "macos") {
        args.push("--no-sandbox".to_string());
    }
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "acceptInsecureCerts": true,
                "goog:chromeOptions": { "args": args }
            }
        }
    })
}

/// Map a WebDriver error name to our taxonomy. Dead-session errors matter
/// most: they tell the pool to replace the session instead of retrying into
/// a corpse.
fn classify_wd_error(name: &str, message: &str) -> FetchError {
    match name {
        "invalid session id" | "no such window" | "session not created" => {
            FetchError::SessionDead(format!("{name}: {message}"))
        }
        "timeout" | "script timeout" => FetchError::Timeout(format!("{name}: {message}")),
        _ => FetchError::Protocol(format!("{name}: {message}")),
    }
}

fn classify_protocol_body(body: &str, http_status: u16) -> FetchError {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(err) = value.pointer("/value/error").and_then(|v| v.as_str()) {
            let message = value
                .pointer("/value/message")
                .and_then(|v| v.as_str())
                .unwrap_or("");
            return classify_wd_error(err, message);
        }
    }
    FetchError::Protocol(format!(
        "HTTP {http_status}: {}",
        truncate_for_log(body, 240)
    ))
}

fn truncate_for_log(input: &str, max_chars: usize) -> String {
    if input.chars().count() <= max_chars {
        return input.to_string();
    }
    input.chars().take(max_chars).collect::<String>() + "..."
}
