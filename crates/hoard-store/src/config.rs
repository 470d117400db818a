use std::path::PathBuf;

use hoard_core::AppError;

/// Default location of the run state log, relative to the working directory.
pub const DEFAULT_STATE_FILE: &str = ".hoard/state.jsonl";

/// Configuration for the run state store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// fsync after every appended record, not only on flush.
    pub sync_every_record: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_STATE_FILE),
            sync_every_record: false,
        }
    }
}

impl StoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Read configuration from environment variables.
    ///
    /// - `HOARD_STATE_FILE` (optional, defaults to `.hoard/state.jsonl`)
    /// - `HOARD_STATE_SYNC` (optional, `true`/`false`, defaults to false)
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let path = match lookup("HOARD_STATE_FILE") {
            Some(raw) if raw.trim().is_empty() => {
                return Err(AppError::ConfigError(
                    "HOARD_STATE_FILE is set but empty".into(),
                ));
            }
            Some(raw) => PathBuf::from(raw),
            None => PathBuf::from(DEFAULT_STATE_FILE),
        };

        let sync_every_record = match lookup("HOARD_STATE_SYNC") {
            None => false,
            Some(raw) => match raw.to_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                _ => {
                    return Err(AppError::ConfigError(format!(
                        "Invalid HOARD_STATE_SYNC '{raw}': expected true or false"
                    )));
                }
            },
        };

        Ok(Self {
            path,
            sync_every_record,
        })
    }
}
