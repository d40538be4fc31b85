//! Crash-safe persistence for category collections.
//!
//! Save discipline: write `<file>.tmp` in the same directory, flush and
//! fsync, copy the previous target to `<file>.bak`, then rename the temp
//! file over the target. A crash at any point leaves either the old file or
//! the fully written new one, never a partial.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::dedup::Collection;
use crate::error::StoreError;
use crate::model::{Category, LegislationItem};

pub struct AtomicStore {
    out_dir: PathBuf,
}

impl AtomicStore {
    pub fn new(out_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let out_dir = out_dir.into();
        fs::create_dir_all(&out_dir).map_err(|source| StoreError::Io {
            path: out_dir.clone(),
            source,
        })?;
        Ok(Self { out_dir })
    }

    pub fn target_path(&self, category: Category) -> PathBuf {
        self.out_dir.join(format!("{}.json", category.file_stem()))
    }

    fn temp_path(&self, category: Category) -> PathBuf {
        self.out_dir
            .join(format!("{}.json.tmp", category.file_stem()))
    }

    fn backup_path(&self, category: Category) -> PathBuf {
        self.out_dir
            .join(format!("{}.json.bak", category.file_stem()))
    }

    /// Load one category. An orphaned temp file from an interrupted save is
    /// discarded, never merged. A malformed target falls back to the backup.
    /// A missing file is an empty collection.
    pub fn load(&self, category: Category) -> Result<Collection, StoreError> {
        let temp = self.temp_path(category);
        if temp.exists() {
            warn!("discarding orphaned temp file {}", temp.display());
            fs::remove_file(&temp).map_err(|source| StoreError::Io { path: temp, source })?;
        }

        let target = self.target_path(category);
        if !target.exists() {
            return Ok(Collection::default());
        }

        match read_items(&target) {
            Ok(items) => Ok(Collection::from_items(items)),
            Err(err) => {
                let backup = self.backup_path(category);
                if backup.exists() {
                    warn!(
                        "{} is unreadable ({err}), recovering from {}",
                        target.display(),
                        backup.display()
                    );
                    Ok(Collection::from_items(read_items(&backup)?))
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Persist one category with the temp-write + backup + rename discipline.
    pub fn save(&self, category: Category, collection: &Collection) -> Result<(), StoreError> {
        let target = self.target_path(category);
        let temp = self.temp_path(category);

        let mut bytes =
            serde_json::to_vec_pretty(collection.items()).map_err(|e| StoreError::Malformed {
                path: target.clone(),
                reason: e.to_string(),
            })?;
        bytes.push(b'\n');

        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source| StoreError::Io {
                path: path.clone(),
                source,
            }
        };

        let mut file = File::create(&temp).map_err(io_err(&temp))?;
        file.write_all(&bytes).map_err(io_err(&temp))?;
        file.sync_all().map_err(io_err(&temp))?;
        drop(file);

        if target.exists() {
            let backup = self.backup_path(category);
            fs::copy(&target, &backup).map_err(io_err(&backup))?;
        }

        fs::rename(&temp, &target).map_err(io_err(&target))?;
        debug!(
            "saved {} item(s) to {}",
            collection.len(),
            target.display()
        );
        Ok(())
    }
}

fn read_items(path: &Path) -> Result<Vec<LegislationItem>, StoreError> {
    let content = fs::read_to_string(path).map_err(|source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(&content).map_err(|e| StoreError::Malformed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}
