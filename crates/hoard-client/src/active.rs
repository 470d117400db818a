//! Registry of partial downloads that a live fetch is still writing.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared set of `.part` paths owned by in-flight downloads.
///
/// [`HttpBackend`](crate::HttpBackend) registers each partial for the
/// duration of its download; [`WorkspaceCleanup`](crate::WorkspaceCleanup)
/// leaves registered paths alone. Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct ActiveDownloads {
    paths: Arc<Mutex<HashSet<PathBuf>>>,
}

impl ActiveDownloads {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `path` as owned until the returned guard is dropped.
    pub fn register(&self, path: impl Into<PathBuf>) -> DownloadGuard {
        let path = path.into();
        self.lock().insert(path.clone());
        DownloadGuard {
            registry: self.clone(),
            path,
        }
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<PathBuf>> {
        self.paths.lock().unwrap_or_else(|e| {
            tracing::warn!("Active download registry lock poisoned, recovering");
            PoisonError::into_inner(e)
        })
    }
}

/// Unregisters its path on drop, including when the download future is
/// cancelled by a timeout.
#[derive(Debug)]
pub struct DownloadGuard {
    registry: ActiveDownloads,
    path: PathBuf,
}

impl Drop for DownloadGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.path);
    }
}
