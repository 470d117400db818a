//! Persisted run state.
//!
//! The store is an append-only log of [`StateRecord`]s; [`RunState`] is the
//! aggregate rebuilt from it at start-up. Later records win, so an item that
//! failed in one run and succeeded in the next counts as succeeded.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorClass;
use crate::item::{ItemState, SkipReason};

/// One terminal transition of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateRecord {
    pub run_id: Uuid,
    pub item_id: String,
    pub state: ItemState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_class: Option<ErrorClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    #[serde(default)]
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
}

/// Last known failure of an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailedEntry {
    pub error_class: ErrorClass,
    pub attempts: u32,
}

/// Aggregate of everything the state log has recorded.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    succeeded: HashSet<String>,
    failed: HashMap<String, FailedEntry>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = StateRecord>,
    {
        let mut state = Self::new();
        for record in records {
            state.apply(&record);
        }
        state
    }

    /// Folds one record into the aggregate.
    pub fn apply(&mut self, record: &StateRecord) {
        match record.state {
            ItemState::Succeeded => {
                self.failed.remove(&record.item_id);
                self.succeeded.insert(record.item_id.clone());
            }
            ItemState::Failed => {
                self.succeeded.remove(&record.item_id);
                self.failed.insert(
                    record.item_id.clone(),
                    FailedEntry {
                        error_class: record.error_class.unwrap_or(ErrorClass::Unknown),
                        attempts: record.attempts,
                    },
                );
            }
            // Skips and non-terminal states say nothing about the artifact itself.
            _ => {}
        }
    }

    pub fn is_succeeded(&self, item_id: &str) -> bool {
        self.succeeded.contains(item_id)
    }

    pub fn failure(&self, item_id: &str) -> Option<FailedEntry> {
        self.failed.get(item_id).copied()
    }

    pub fn succeeded_count(&self) -> usize {
        self.succeeded.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

    /// Failed items sorted by id.
    pub fn failures(&self) -> Vec<(&str, FailedEntry)> {
        let mut failures: Vec<_> = self
            .failed
            .iter()
            .map(|(id, entry)| (id.as_str(), *entry))
            .collect();
        failures.sort_by(|a, b| a.0.cmp(b.0));
        failures
    }
}
