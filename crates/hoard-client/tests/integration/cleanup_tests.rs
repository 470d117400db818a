use std::time::{Duration, Instant};

use hoard_client::http::PARTIAL_SUFFIX;
use hoard_client::{ActiveDownloads, HttpBackend, WorkspaceCleanup};
use hoard_core::item::{FetchItem, ItemKind};
use hoard_core::traits::{Cleanup, FetchBackend};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Serves a 10-byte body in two halves; the second half is held back until
/// `release` fires.
async fn split_body_server(
    listener: TcpListener,
    release: oneshot::Receiver<()>,
) -> std::io::Result<()> {
    let (mut socket, _) = listener.accept().await?;

    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        request.extend_from_slice(&buf[..n]);
    }

    socket
        .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\nConnection: close\r\n\r\nhello")
        .await?;
    socket.flush().await?;

    let _ = release.await;
    socket.write_all(b"world").await?;
    socket.flush().await?;
    Ok(())
}

#[tokio::test]
async fn cleanup_mid_download_keeps_the_live_partial() {
    let dir = tempfile::tempdir().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (release_tx, release_rx) = oneshot::channel();
    let server = tokio::spawn(split_body_server(listener, release_rx));

    let active = ActiveDownloads::new();
    let backend = HttpBackend::new(dir.path())
        .unwrap()
        .with_active_downloads(active.clone());
    let cleanup = WorkspaceCleanup::new(dir.path()).with_active_downloads(active.clone());
    let item = FetchItem::new("stream.bin", ItemKind::File, format!("http://{addr}/stream.bin"));

    let fetch = tokio::spawn({
        let backend = backend.clone();
        let item = item.clone();
        async move { backend.fetch(&item).await }
    });

    // Wait for the first half to land in the partial file.
    let partial = dir.path().join(format!("stream.bin{PARTIAL_SUFFIX}"));
    let deadline = Instant::now() + Duration::from_secs(5);
    while std::fs::metadata(&partial).map(|m| m.len()).unwrap_or(0) < 5 {
        assert!(Instant::now() < deadline, "first half never reached {}", partial.display());
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(active.contains(&partial));

    let freed = cleanup.cleanup().await.unwrap();
    assert_eq!(freed, 0);
    assert!(partial.exists());

    release_tx.send(()).unwrap();
    let bytes = fetch.await.unwrap().unwrap();
    server.await.unwrap().unwrap();

    assert_eq!(bytes, 10);
    assert_eq!(std::fs::read(backend.destination(&item)).unwrap(), b"helloworld");
    assert!(!partial.exists());
    assert!(active.is_empty());
}

#[tokio::test]
async fn stale_partials_from_earlier_runs_are_removed() {
    let dir = tempfile::tempdir().unwrap();
    let stale = dir.path().join(format!("crashed.iso{PARTIAL_SUFFIX}"));
    std::fs::write(&stale, vec![1u8; 256]).unwrap();

    let backend = HttpBackend::new(dir.path()).unwrap();
    let cleanup =
        WorkspaceCleanup::new(dir.path()).with_active_downloads(backend.active_downloads().clone());

    assert_eq!(cleanup.cleanup().await.unwrap(), 256);
    assert!(!stale.exists());
}
