use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ErrorClass;

/// What kind of artifact an item names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    /// Container image, e.g. `docker.io/library/postgres:16`.
    Image,
    /// Model blob pulled through a model registry.
    Model,
    /// Plain file behind an http(s) URL.
    File,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Image => "image",
            ItemKind::Model => "model",
            ItemKind::File => "file",
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "image" => Ok(ItemKind::Image),
            "model" => Ok(ItemKind::Model),
            "file" => Ok(ItemKind::File),
            _ => Err(format!("Unknown item kind: {}", s)),
        }
    }
}

/// One named artifact to fetch. Never mutated once handed to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchItem {
    pub id: String,
    pub kind: ItemKind,
    /// Registry-qualified name/tag or URL.
    pub source_ref: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub estimated_size_bytes: Option<u64>,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub priority: i32,
}

fn default_category() -> String {
    "default".to_string()
}

impl FetchItem {
    pub fn new(id: impl Into<String>, kind: ItemKind, source_ref: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            kind,
            source_ref: source_ref.into(),
            description: String::new(),
            estimated_size_bytes: None,
            category: default_category(),
            priority: 0,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_estimated_size(mut self, bytes: u64) -> Self {
        self.estimated_size_bytes = Some(bytes);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// Lifecycle state of one item within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemState {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Skipped,
}

impl ItemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemState::Pending => "pending",
            ItemState::InProgress => "in_progress",
            ItemState::Succeeded => "succeeded",
            ItemState::Failed => "failed",
            ItemState::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemState::Succeeded | ItemState::Failed | ItemState::Skipped
        )
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ItemState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(ItemState::Pending),
            "in_progress" => Ok(ItemState::InProgress),
            "succeeded" => Ok(ItemState::Succeeded),
            "failed" => Ok(ItemState::Failed),
            "skipped" => Ok(ItemState::Skipped),
            _ => Err(format!("Unknown item state: {}", s)),
        }
    }
}

/// Why an item never ran (or stopped running) without succeeding or failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Rejected by pre-validation.
    Invalid,
    /// Already succeeded in a previous run (`--resume`).
    AlreadyDone,
    /// The item's category was excluded.
    CategoryExcluded,
    /// Dry run: validated but not fetched.
    DryRun,
    /// Never claimed because the disk gate stopped the pool.
    DiskPressure,
    /// Left unfinished by cancellation or the global deadline.
    Cancelled,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::Invalid => "invalid",
            SkipReason::AlreadyDone => "already_done",
            SkipReason::CategoryExcluded => "category_excluded",
            SkipReason::DryRun => "dry_run",
            SkipReason::DiskPressure => "disk_pressure",
            SkipReason::Cancelled => "cancelled",
        }
    }

    /// Skips that still count as a clean run for the exit code.
    pub fn is_benign(&self) -> bool {
        matches!(
            self,
            SkipReason::AlreadyDone | SkipReason::CategoryExcluded | SkipReason::DryRun
        )
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One try of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based.
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub error_class: Option<ErrorClass>,
}

/// Derived, per-run view of an item; mutable until it reaches a terminal state.
#[derive(Debug, Clone, Serialize)]
pub struct ItemOutcome {
    pub item_id: String,
    pub state: ItemState,
    pub attempts: Vec<AttemptRecord>,
    pub skip_reason: Option<SkipReason>,
    pub last_error: Option<String>,
    pub bytes: Option<u64>,
}

impl ItemOutcome {
    pub fn pending(item_id: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            state: ItemState::Pending,
            attempts: Vec::new(),
            skip_reason: None,
            last_error: None,
            bytes: None,
        }
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempts.len() as u32
    }

    /// Error class of the most recent failed attempt.
    pub fn last_error_class(&self) -> Option<ErrorClass> {
        self.attempts.iter().rev().find_map(|a| a.error_class)
    }

    /// Number of attempts that failed with the given class.
    pub fn failures_of(&self, class: ErrorClass) -> u32 {
        self.attempts
            .iter()
            .filter(|a| a.error_class == Some(class))
            .count() as u32
    }
}
