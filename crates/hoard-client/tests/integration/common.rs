use std::time::Duration;

use hoard_core::error::AppError;
use hoard_core::item::{FetchItem, ItemKind};
use hoard_core::traits::{DiskProbe, DiskUsage};
use tempfile::TempDir;
use wiremock::MockServer;

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Disk probe reporting a fixed, roomy filesystem.
#[derive(Debug, Clone, Copy)]
pub struct RoomyDisk;

impl DiskProbe for RoomyDisk {
    fn sample(&self) -> Result<DiskUsage, AppError> {
        Ok(DiskUsage {
            available_bytes: 500 * GIB,
            total_bytes: 1000 * GIB,
        })
    }
}

pub async fn setup_server() -> (MockServer, TempDir) {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    (server, dir)
}

pub fn file_item(server: &MockServer, id: &str) -> FetchItem {
    FetchItem::new(id, ItemKind::File, format!("{}/files/{id}", server.uri()))
        .with_category("files")
}

pub fn short_timeout() -> Duration {
    Duration::from_millis(300)
}
