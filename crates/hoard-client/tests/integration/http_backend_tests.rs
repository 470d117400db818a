use hoard_client::HttpBackend;
use hoard_client::http::PARTIAL_SUFFIX;
use hoard_core::error::{AppError, ErrorClass};
use hoard_core::item::{FetchItem, ItemKind};
use hoard_core::traits::FetchBackend;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::integration::common::{file_item, setup_server, short_timeout};

#[tokio::test]
async fn fetch_streams_body_to_destination() {
    let (server, dir) = setup_server().await;
    Mock::given(method("GET"))
        .and(path("/files/toolchain.tar.gz"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 64 * 1024]))
        .expect(1)
        .mount(&server)
        .await;

    let backend = HttpBackend::new(dir.path()).unwrap();
    let item = file_item(&server, "toolchain.tar.gz");

    let bytes = backend.fetch(&item).await.unwrap();

    assert_eq!(bytes, 64 * 1024);
    let dest = backend.destination(&item);
    assert_eq!(std::fs::metadata(&dest).unwrap().len(), 64 * 1024);
    let partial = dir.path().join(format!("toolchain.tar.gz{PARTIAL_SUFFIX}"));
    assert!(!partial.exists());
}

#[tokio::test]
async fn fetch_creates_missing_download_dir() {
    let (server, dir) = setup_server().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
        .mount(&server)
        .await;

    let nested = dir.path().join("a").join("b");
    let backend = HttpBackend::new(&nested).unwrap();

    assert_eq!(backend.fetch(&file_item(&server, "greeting")).await.unwrap(), 5);
    assert!(nested.join("greeting").exists());
}

#[tokio::test]
async fn fetch_maps_statuses_to_classes() {
    let (server, dir) = setup_server().await;
    for (name, status) in [("gone", 404), ("limited", 429), ("flaky", 503), ("denied", 401)] {
        Mock::given(method("GET"))
            .and(path(format!("/files/{name}")))
            .respond_with(ResponseTemplate::new(status))
            .mount(&server)
            .await;
    }

    let backend = HttpBackend::new(dir.path()).unwrap();
    let class_of = |e: AppError| e.class();

    let gone = backend.fetch(&file_item(&server, "gone")).await.unwrap_err();
    assert_eq!(class_of(gone), ErrorClass::Invalid);

    let limited = backend.fetch(&file_item(&server, "limited")).await.unwrap_err();
    assert_eq!(class_of(limited), ErrorClass::RateLimit);

    let flaky = backend.fetch(&file_item(&server, "flaky")).await.unwrap_err();
    assert_eq!(class_of(flaky), ErrorClass::Network);

    let denied = backend.fetch(&file_item(&server, "denied")).await.unwrap_err();
    assert_eq!(class_of(denied), ErrorClass::Auth);

    // Nothing is left behind for failed downloads.
    let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert!(leftovers.is_empty());
    assert!(backend.active_downloads().is_empty());
}

#[tokio::test]
async fn slow_response_is_a_timeout() {
    let (server, dir) = setup_server().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("late")
                .set_delay(std::time::Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let backend = HttpBackend::with_timeout(dir.path(), short_timeout()).unwrap();
    let err = backend.fetch(&file_item(&server, "slow")).await.unwrap_err();

    assert_eq!(err.class(), ErrorClass::Timeout);
    assert!(!backend.destination(&file_item(&server, "slow")).exists());
}

#[tokio::test]
async fn refused_connection_is_a_network_error() {
    let dir = tempfile::tempdir().unwrap();
    let backend = HttpBackend::with_timeout(dir.path(), short_timeout()).unwrap();
    let item = FetchItem::new("nowhere", ItemKind::File, "http://127.0.0.1:1/file");

    let err = backend.fetch(&item).await.unwrap_err();

    assert_eq!(err.class(), ErrorClass::Network);
}

#[tokio::test]
async fn probe_uses_head() {
    let (server, dir) = setup_server().await;
    Mock::given(method("HEAD"))
        .and(path("/files/present"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/files/no-head"))
        .respond_with(ResponseTemplate::new(405))
        .mount(&server)
        .await;
    Mock::given(method("HEAD"))
        .and(path("/files/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let backend = HttpBackend::new(dir.path()).unwrap();

    backend.probe(&file_item(&server, "present")).await.unwrap();
    backend.probe(&file_item(&server, "no-head")).await.unwrap();
    let err = backend.probe(&file_item(&server, "missing")).await.unwrap_err();
    assert!(matches!(err, AppError::InvalidReference(_)));
}
