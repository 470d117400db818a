use std::path::PathBuf;

use chrono::Utc;
use hoard_core::{ErrorClass, ItemState, SkipReason, StateRecord};
use hoard_store::JsonlStateStore;
use tempfile::TempDir;
use uuid::Uuid;

/// A store rooted in a fresh temporary directory. Keep the `TempDir` alive
/// for the duration of the test.
pub fn setup_store() -> (JsonlStateStore, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let store = JsonlStateStore::open(state_path(&dir));
    (store, dir)
}

pub fn state_path(dir: &TempDir) -> PathBuf {
    dir.path().join("nested").join("state.jsonl")
}

pub fn succeeded(run_id: Uuid, item_id: &str) -> StateRecord {
    StateRecord {
        run_id,
        item_id: item_id.to_string(),
        state: ItemState::Succeeded,
        error_class: None,
        skip_reason: None,
        attempts: 1,
        timestamp: Utc::now(),
    }
}

pub fn failed(run_id: Uuid, item_id: &str, class: ErrorClass, attempts: u32) -> StateRecord {
    StateRecord {
        run_id,
        item_id: item_id.to_string(),
        state: ItemState::Failed,
        error_class: Some(class),
        skip_reason: None,
        attempts,
        timestamp: Utc::now(),
    }
}

pub fn skipped(run_id: Uuid, item_id: &str, reason: SkipReason) -> StateRecord {
    StateRecord {
        run_id,
        item_id: item_id.to_string(),
        state: ItemState::Skipped,
        error_class: None,
        skip_reason: Some(reason),
        attempts: 0,
        timestamp: Utc::now(),
    }
}
