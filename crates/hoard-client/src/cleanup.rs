use std::path::{Path, PathBuf};
use std::time::Duration;

use hoard_core::error::AppError;
use hoard_core::traits::Cleanup;

use crate::active::ActiveDownloads;
use crate::docker::DockerCli;
use crate::http::PARTIAL_SUFFIX;

const PRUNE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Best-effort cleanup of the download workspace.
///
/// Removes stale `*.part` files from the download directory and, when a
/// docker CLI is configured, runs `docker image prune -f` for dangling
/// layers. Partials registered in the shared [`ActiveDownloads`] belong to
/// a live fetch and are left alone.
#[derive(Debug, Clone)]
pub struct WorkspaceCleanup {
    download_dir: PathBuf,
    active: ActiveDownloads,
    docker: Option<DockerCli>,
}

impl WorkspaceCleanup {
    pub fn new(download_dir: impl Into<PathBuf>) -> Self {
        Self {
            download_dir: download_dir.into(),
            active: ActiveDownloads::new(),
            docker: None,
        }
    }

    /// Shares the registry the HTTP backend writes into.
    pub fn with_active_downloads(mut self, active: ActiveDownloads) -> Self {
        self.active = active;
        self
    }

    pub fn with_docker_prune(mut self, docker: DockerCli) -> Self {
        self.docker = Some(docker);
        self
    }

    async fn remove_partials(&self) -> Result<u64, AppError> {
        let mut entries = match tokio::fs::read_dir(&self.download_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut freed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !is_partial(&path) {
                continue;
            }
            if self.active.contains(&path) {
                tracing::debug!(path = %path.display(), "Partial download in progress, keeping it");
                continue;
            }
            let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    tracing::debug!(path = %path.display(), size, "Removed partial download");
                    freed += size;
                }
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove partial download"),
            }
        }
        Ok(freed)
    }
}

impl Cleanup for WorkspaceCleanup {
    async fn cleanup(&self) -> Result<u64, AppError> {
        let mut freed = self.remove_partials().await?;

        if let Some(docker) = &self.docker {
            match docker
                .run_checked(&["image", "prune", "-f"], Some(PRUNE_TIMEOUT))
                .await
            {
                Ok(output) => freed += parse_reclaimed(&output.stdout),
                Err(e) => tracing::warn!(error = %e, "docker image prune failed"),
            }
        }

        Ok(freed)
    }
}

fn is_partial(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(PARTIAL_SUFFIX))
}

/// Parses the `Total reclaimed space: 1.2GB` line printed by `docker image prune`.
pub fn parse_reclaimed(stdout: &str) -> u64 {
    let Some(value) = stdout
        .lines()
        .find_map(|l| l.trim().strip_prefix("Total reclaimed space:"))
        .map(str::trim)
    else {
        return 0;
    };

    let split = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    let (number, unit) = value.split_at(split);
    let Ok(number) = number.parse::<f64>() else {
        return 0;
    };

    // docker uses decimal units.
    let multiplier: f64 = match unit.trim().to_uppercase().as_str() {
        "" | "B" => 1.0,
        "KB" | "K" => 1e3,
        "MB" | "M" => 1e6,
        "GB" | "G" => 1e9,
        "TB" | "T" => 1e12,
        _ => return 0,
    };
    (number * multiplier) as u64
}
