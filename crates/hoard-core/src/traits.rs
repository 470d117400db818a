use std::future::Future;

use crate::error::AppError;
use crate::item::FetchItem;
use crate::state::{RunState, StateRecord};

/// Retrieves one named artifact.
///
/// Errors are classified through [`AppError::class`], so implementations
/// should pick the variant that matches the failure (`RateLimited` for 429s,
/// `InvalidReference` for unknown tags, ...).
pub trait FetchBackend: Send + Sync + Clone + 'static {
    /// Cheap existence check (manifest lookup, HEAD request).
    fn probe(&self, item: &FetchItem) -> impl Future<Output = Result<(), AppError>> + Send;

    /// Fetches the artifact and returns the number of bytes retrieved.
    fn fetch(&self, item: &FetchItem) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// Persists terminal item outcomes across runs.
pub trait RunStateStore: Send + Sync + Clone + 'static {
    /// Reconstructs the aggregate state from everything recorded so far.
    fn load(&self) -> impl Future<Output = Result<RunState, AppError>> + Send;

    /// Appends one record. Must be safe to call from several workers at once.
    fn append(&self, record: &StateRecord) -> impl Future<Output = Result<(), AppError>> + Send;

    fn flush(&self) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// Point-in-time view of the filesystem that artifacts land on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    pub available_bytes: u64,
    pub total_bytes: u64,
}

impl DiskUsage {
    /// Fraction of the disk in use, in `[0.0, 1.0]`.
    pub fn used_ratio(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.available_bytes);
        used as f64 / self.total_bytes as f64
    }
}

/// Samples free disk space.
pub trait DiskProbe: Send + Sync + Clone + 'static {
    fn sample(&self) -> Result<DiskUsage, AppError>;
}

/// Best-effort routine that frees local storage (stale partial downloads,
/// dangling images). Returns the number of bytes reclaimed.
pub trait Cleanup: Send + Sync + Clone + 'static {
    fn cleanup(&self) -> impl Future<Output = Result<u64, AppError>> + Send;
}

/// A cleanup that does nothing, for callers without anything to prune.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopCleanup;

impl Cleanup for NoopCleanup {
    async fn cleanup(&self) -> Result<u64, AppError> {
        Ok(0)
    }
}
