//! Append-only JSON-lines run state store.
//!
//! One [`StateRecord`] per line. Appends from concurrent workers are
//! serialized by an async mutex and each line is written with a single
//! `write_all`, so a crash can at worst leave one torn last line, which
//! [`load`](RunStateStore::load) skips. The first append after reopening
//! terminates such a line so the new record starts on a line of its own.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hoard_core::error::AppError;
use hoard_core::state::{RunState, StateRecord};
use hoard_core::traits::RunStateStore;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::config::StoreConfig;

#[derive(Clone)]
pub struct JsonlStateStore {
    path: Arc<PathBuf>,
    sync_every_record: bool,
    file: Arc<Mutex<Option<File>>>,
}

impl JsonlStateStore {
    pub fn new(config: StoreConfig) -> Self {
        Self {
            path: Arc::new(config.path),
            sync_every_record: config.sync_every_record,
            file: Arc::new(Mutex::new(None)),
        }
    }

    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(StoreConfig::new(path))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every well-formed record in the log, oldest first.
    pub async fn records(&self) -> Result<Vec<StateRecord>, AppError> {
        let contents = match tokio::fs::read_to_string(self.path.as_path()).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "No state file yet");
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(AppError::StateStoreError(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )));
            }
        };

        let mut records = Vec::new();
        for (number, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<StateRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        line = number + 1,
                        error = %e,
                        "Skipping malformed state record"
                    );
                }
            }
        }
        Ok(records)
    }

    async fn open_for_append(&self) -> Result<File, AppError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                AppError::StateStoreError(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }

        let open_err = |e: std::io::Error| {
            AppError::StateStoreError(format!("Failed to open {}: {e}", self.path.display()))
        };
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(self.path.as_path())
            .await
            .map_err(open_err)?;

        if ends_mid_line(&mut file).await.map_err(open_err)? {
            tracing::warn!(path = %self.path.display(), "State file ends with a torn record, terminating it");
            file.write_all(b"\n").await.map_err(open_err)?;
            file.flush().await.map_err(open_err)?;
        }
        Ok(file)
    }
}

/// True when the file is non-empty and its last byte is not a newline.
async fn ends_mid_line(file: &mut File) -> std::io::Result<bool> {
    let len = file.metadata().await?.len();
    if len == 0 {
        return Ok(false);
    }
    file.seek(SeekFrom::End(-1)).await?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).await?;
    Ok(last[0] != b'\n')
}

impl RunStateStore for JsonlStateStore {
    async fn load(&self) -> Result<RunState, AppError> {
        let records = self.records().await?;
        tracing::debug!(path = %self.path.display(), records = records.len(), "Run state loaded");
        Ok(RunState::from_records(records))
    }

    async fn append(&self, record: &StateRecord) -> Result<(), AppError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut guard = self.file.lock().await;
        if guard.is_none() {
            *guard = Some(self.open_for_append().await?);
        }
        let Some(file) = guard.as_mut() else {
            return Err(AppError::StateStoreError("state file not open".into()));
        };

        let write_err = |e: std::io::Error| {
            AppError::StateStoreError(format!("Failed to append to {}: {e}", self.path.display()))
        };
        file.write_all(&line).await.map_err(write_err)?;
        file.flush().await.map_err(write_err)?;
        if self.sync_every_record {
            file.sync_data().await.map_err(write_err)?;
        }
        Ok(())
    }

    async fn flush(&self) -> Result<(), AppError> {
        let mut guard = self.file.lock().await;
        if let Some(file) = guard.as_mut() {
            file.flush().await?;
            file.sync_all().await.map_err(|e| {
                AppError::StateStoreError(format!("Failed to sync {}: {e}", self.path.display()))
            })?;
        }
        Ok(())
    }
}
