use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use hoard_core::error::AppError;
use hoard_core::item::FetchItem;
use hoard_core::traits::FetchBackend;
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;

use crate::active::ActiveDownloads;

/// Suffix of downloads still in progress. Cleanup removes stale ones.
pub const PARTIAL_SUFFIX: &str = ".part";

/// Plain-file backend using reqwest.
///
/// Probes with `HEAD`, downloads with a streamed `GET` into
/// `<download_dir>/<id>.part` and renames the file once the body is complete,
/// so a finished file is never half-written. Partials are registered in an
/// [`ActiveDownloads`] set while they are being written.
#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    download_dir: PathBuf,
    timeout_secs: u64,
    active: ActiveDownloads,
}

impl HttpBackend {
    pub fn new(download_dir: impl Into<PathBuf>) -> Result<Self, AppError> {
        Self::with_timeout(download_dir, Duration::from_secs(30 * 60))
    }

    pub fn with_timeout(download_dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .user_agent(concat!("hoard/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            download_dir: download_dir.into(),
            timeout_secs: timeout.as_secs(),
            active: ActiveDownloads::new(),
        })
    }

    /// Shares an existing registry, typically the one handed to
    /// [`WorkspaceCleanup`](crate::WorkspaceCleanup).
    pub fn with_active_downloads(mut self, active: ActiveDownloads) -> Self {
        self.active = active;
        self
    }

    pub fn active_downloads(&self) -> &ActiveDownloads {
        &self.active
    }

    pub fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    /// Where a finished download of `item` ends up.
    pub fn destination(&self, item: &FetchItem) -> PathBuf {
        self.download_dir.join(file_name(item))
    }

    fn partial_path(&self, item: &FetchItem) -> PathBuf {
        self.download_dir
            .join(format!("{}{PARTIAL_SUFFIX}", file_name(item)))
    }

    fn map_transport_error(&self, e: reqwest::Error) -> AppError {
        if e.is_timeout() {
            AppError::Timeout(self.timeout_secs)
        } else if e.is_connect() {
            AppError::NetworkError(format!("Connection failed: {e}"))
        } else if e.is_builder() {
            AppError::InvalidReference(e.to_string())
        } else {
            AppError::NetworkError(e.to_string())
        }
    }

    async fn download(&self, item: &FetchItem, partial: &Path) -> Result<u64, AppError> {
        let response = self
            .client
            .get(&item.source_ref)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        if let Some(err) = status_error(response.status(), &item.source_ref) {
            return Err(err);
        }

        let mut file = tokio::fs::File::create(partial).await?;
        let mut body = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| self.map_transport_error(e))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

impl FetchBackend for HttpBackend {
    async fn probe(&self, item: &FetchItem) -> Result<(), AppError> {
        let response = self
            .client
            .head(&item.source_ref)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        match response.status() {
            // Some servers refuse HEAD; the GET will tell.
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED => Ok(()),
            status => status_error(status, &item.source_ref).map_or(Ok(()), Err),
        }
    }

    async fn fetch(&self, item: &FetchItem) -> Result<u64, AppError> {
        tokio::fs::create_dir_all(&self.download_dir).await?;
        let partial = self.partial_path(item);
        let _owned = self.active.register(&partial);

        match self.download(item, &partial).await {
            Ok(bytes) => {
                tokio::fs::rename(&partial, self.destination(item)).await?;
                tracing::debug!(item_id = %item.id, bytes, "Download complete");
                Ok(bytes)
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&partial).await
                    && rm.kind() != std::io::ErrorKind::NotFound
                {
                    tracing::warn!(path = %partial.display(), error = %rm, "Failed to remove partial download");
                }
                Err(e)
            }
        }
    }
}

/// Maps a non-success HTTP status into the failure taxonomy.
pub fn status_error(status: StatusCode, url: &str) -> Option<AppError> {
    if status.is_success() {
        return None;
    }
    let code = status.as_u16();
    let err = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            AppError::AuthError(format!("HTTP {code} for {url}"))
        }
        StatusCode::NOT_FOUND | StatusCode::GONE | StatusCode::BAD_REQUEST => {
            AppError::InvalidReference(format!("HTTP {code} for {url}"))
        }
        StatusCode::TOO_MANY_REQUESTS => AppError::RateLimited(format!("HTTP {code} for {url}")),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            AppError::NetworkError(format!("HTTP {code} (timeout) for {url}"))
        }
        StatusCode::INSUFFICIENT_STORAGE => AppError::Generic(format!("HTTP {code} for {url}")),
        s if s.is_server_error() => AppError::NetworkError(format!("HTTP {code} for {url}")),
        _ => AppError::Generic(format!("Unexpected HTTP {code} for {url}")),
    };
    Some(err)
}

/// File name for an item: its id with anything path-like replaced. When
/// that changed the id, a short digest of the original id is appended so
/// `a/b` and `a_b` do not share a file.
fn file_name(item: &FetchItem) -> String {
    let sanitized: String = item
        .id
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    if sanitized == item.id {
        return sanitized;
    }

    let mut hasher = Sha256::new();
    hasher.update(item.id.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{sanitized}-{}", &digest[..8])
}
