use std::sync::Arc;
use std::time::Duration;

use hoard_client::{HttpBackend, KindRouter};
use hoard_core::retry::RetryConfig;
use hoard_core::traits::RunStateStore;
use hoard_core::{
    EXIT_FAILURES, ErrorClass, NoopCleanup, Orchestrator, OrchestratorConfig, SilentReporter,
    SkipReason,
};
use hoard_store::JsonlStateStore;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::integration::common::{RoomyDisk, file_item, setup_server};

fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig::default()
        .with_concurrency(2)
        .with_poll_interval(Duration::from_millis(10))
        .with_retry(RetryConfig {
            max_attempts: 2,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        })
}

#[tokio::test]
async fn run_then_resume_against_http_server() {
    let (server, dir) = setup_server().await;

    Mock::given(method("HEAD"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    for name in ["docs.tar", "fixtures.zip"] {
        Mock::given(method("GET"))
            .and(path(format!("/files/{name}")))
            .respond_with(ResponseTemplate::new(200).set_body_string(name))
            // Once in the first run, never again after resume.
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/files/quota.bin"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let items = vec![
        file_item(&server, "docs.tar"),
        file_item(&server, "quota.bin"),
        file_item(&server, "fixtures.zip"),
    ];
    let store = JsonlStateStore::open(dir.path().join("state.jsonl"));
    let backend = KindRouter::new(HttpBackend::new(dir.path().join("downloads")).unwrap());

    let first = Orchestrator::new(backend.clone(), store.clone(), RoomyDisk, NoopCleanup, fast_config())
        .run(items.clone(), CancellationToken::new(), Arc::new(SilentReporter))
        .await
        .unwrap();

    assert_eq!(first.to_string(), "2 succeeded, 1 failed, 0 skipped");
    let failure = first.failure("quota.bin").unwrap();
    assert_eq!(failure.error_class, ErrorClass::RateLimit);
    assert_eq!(failure.attempts, 2);
    assert_eq!(first.exit_code(), EXIT_FAILURES);

    let persisted = store.load().await.unwrap();
    assert!(persisted.is_succeeded("docs.tar"));
    assert!(persisted.is_succeeded("fixtures.zip"));
    assert_eq!(persisted.failure("quota.bin").unwrap().error_class, ErrorClass::RateLimit);

    let second = Orchestrator::new(
        backend,
        store.clone(),
        RoomyDisk,
        NoopCleanup,
        fast_config().with_resume(true),
    )
    .run(items, CancellationToken::new(), Arc::new(SilentReporter))
    .await
    .unwrap();

    assert_eq!(second.skipped_for(SkipReason::AlreadyDone), 2);
    assert_eq!(second.failed, 1);
    assert!(dir.path().join("downloads").join("docs.tar").exists());
}
