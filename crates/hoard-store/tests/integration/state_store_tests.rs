use hoard_core::traits::RunStateStore;
use hoard_core::{ErrorClass, SkipReason};
use hoard_store::JsonlStateStore;
use uuid::Uuid;

use crate::integration::common::{failed, setup_store, skipped, state_path, succeeded};

#[tokio::test]
async fn load_missing_file_is_empty() {
    let (store, _dir) = setup_store();

    let state = store.load().await.unwrap();

    assert_eq!(state.succeeded_count(), 0);
    assert_eq!(state.failed_count(), 0);
    assert!(!store.path().exists());
}

#[tokio::test]
async fn append_creates_parent_dirs_and_round_trips() {
    let (store, dir) = setup_store();
    let run_id = Uuid::new_v4();

    store.append(&succeeded(run_id, "alpine")).await.unwrap();
    store
        .append(&failed(run_id, "huge-model", ErrorClass::DiskSpace, 1))
        .await
        .unwrap();
    store.flush().await.unwrap();

    assert!(state_path(&dir).exists());

    let records = store.records().await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].item_id, "alpine");
    assert_eq!(records[1].error_class, Some(ErrorClass::DiskSpace));

    let state = store.load().await.unwrap();
    assert!(state.is_succeeded("alpine"));
    let failure = state.failure("huge-model").unwrap();
    assert_eq!(failure.error_class, ErrorClass::DiskSpace);
    assert_eq!(failure.attempts, 1);
}

#[tokio::test]
async fn one_json_object_per_line() {
    let (store, _dir) = setup_store();
    let run_id = Uuid::new_v4();

    store.append(&succeeded(run_id, "a")).await.unwrap();
    store.append(&succeeded(run_id, "b")).await.unwrap();
    store.flush().await.unwrap();

    let raw = std::fs::read_to_string(store.path()).unwrap();
    let lines: Vec<&str> = raw.lines().collect();
    assert_eq!(lines.len(), 2);
    for line in lines {
        let value: serde_json::Value = serde_json::from_str(line).unwrap();
        assert_eq!(value["state"], "succeeded");
        assert!(value.get("error_class").is_none());
    }
}

#[tokio::test]
async fn later_records_win_across_runs() {
    let (store, _dir) = setup_store();
    let first_run = Uuid::new_v4();
    let second_run = Uuid::new_v4();

    store
        .append(&failed(first_run, "ubuntu", ErrorClass::Network, 3))
        .await
        .unwrap();
    store.append(&succeeded(second_run, "ubuntu")).await.unwrap();
    store.flush().await.unwrap();

    let state = store.load().await.unwrap();
    assert!(state.is_succeeded("ubuntu"));
    assert!(state.failure("ubuntu").is_none());
}

#[tokio::test]
async fn skips_do_not_change_the_aggregate() {
    let (store, _dir) = setup_store();
    let run_id = Uuid::new_v4();

    store.append(&succeeded(run_id, "debian")).await.unwrap();
    store
        .append(&skipped(run_id, "debian", SkipReason::Cancelled))
        .await
        .unwrap();
    store.flush().await.unwrap();

    let state = store.load().await.unwrap();
    assert!(state.is_succeeded("debian"));
    assert_eq!(store.records().await.unwrap().len(), 2);
}

#[tokio::test]
async fn malformed_and_torn_lines_are_skipped() {
    let (store, _dir) = setup_store();
    let run_id = Uuid::new_v4();

    store.append(&succeeded(run_id, "good")).await.unwrap();
    store.flush().await.unwrap();

    let mut raw = std::fs::read_to_string(store.path()).unwrap();
    raw.push_str("not json at all\n\n");
    raw.push_str(r#"{"run_id":"#);
    std::fs::write(store.path(), raw).unwrap();

    let reopened = JsonlStateStore::open(store.path());
    let records = reopened.records().await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(reopened.load().await.unwrap().is_succeeded("good"));

    // The next run's first record must not be glued onto the torn line.
    reopened
        .append(&succeeded(Uuid::new_v4(), "after-crash"))
        .await
        .unwrap();
    reopened.flush().await.unwrap();

    let state = reopened.load().await.unwrap();
    assert!(state.is_succeeded("good"));
    assert!(state.is_succeeded("after-crash"));
    assert_eq!(reopened.records().await.unwrap().len(), 2);
}

#[tokio::test]
async fn clean_file_gets_no_extra_blank_line() {
    let (store, _dir) = setup_store();
    let run_id = Uuid::new_v4();

    store.append(&succeeded(run_id, "first")).await.unwrap();
    store.flush().await.unwrap();

    let reopened = JsonlStateStore::open(store.path());
    reopened.append(&succeeded(run_id, "second")).await.unwrap();
    reopened.flush().await.unwrap();

    let raw = std::fs::read_to_string(reopened.path()).unwrap();
    assert_eq!(raw.lines().count(), 2);
    assert!(raw.lines().all(|line| !line.trim().is_empty()));
}

#[tokio::test]
async fn reopened_store_appends_instead_of_truncating() {
    let (store, dir) = setup_store();
    let run_id = Uuid::new_v4();

    store.append(&succeeded(run_id, "one")).await.unwrap();
    store.flush().await.unwrap();
    drop(store);

    let reopened = JsonlStateStore::open(state_path(&dir));
    reopened.append(&succeeded(run_id, "two")).await.unwrap();
    reopened.flush().await.unwrap();

    let state = reopened.load().await.unwrap();
    assert!(state.is_succeeded("one"));
    assert!(state.is_succeeded("two"));
}

#[tokio::test]
async fn concurrent_appends_do_not_interleave() {
    let (store, _dir) = setup_store();
    let run_id = Uuid::new_v4();

    let mut handles = Vec::new();
    for worker in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            for n in 0..25 {
                store
                    .append(&succeeded(run_id, &format!("w{worker}-item-{n}")))
                    .await
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    store.flush().await.unwrap();

    let records = store.records().await.unwrap();
    assert_eq!(records.len(), 200);
    assert_eq!(store.load().await.unwrap().succeeded_count(), 200);
}

#[tokio::test]
async fn flush_without_appends_is_a_no_op() {
    let (store, _dir) = setup_store();

    store.flush().await.unwrap();

    assert!(!store.path().exists());
}

#[tokio::test]
async fn unreadable_path_is_a_store_error() {
    let dir = tempfile::tempdir().unwrap();
    // A directory where the file should be.
    let store = JsonlStateStore::open(dir.path());

    let err = store.load().await.unwrap_err();
    assert!(matches!(err, hoard_core::AppError::StateStoreError(_)));
}
