use std::fmt;
use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

use crate::circuit_breaker::CircuitBreakerStats;
use crate::context::FatalCondition;
use crate::error::ErrorClass;
use crate::item::{ItemOutcome, ItemState, SkipReason};

/// Every item succeeded or was skipped for a benign reason.
pub const EXIT_SUCCESS: i32 = 0;
/// At least one item failed, or was skipped as invalid or cancelled.
pub const EXIT_FAILURES: i32 = 1;
/// A fatal precondition failed (disk gate, configuration, state file).
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug, Clone, Serialize)]
pub struct FailedItem {
    pub item_id: String,
    pub error_class: ErrorClass,
    pub attempts: u32,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedItem {
    pub item_id: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerReport {
    pub category: String,
    pub error_class: ErrorClass,
    pub state: String,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl From<CircuitBreakerStats> for BreakerReport {
    fn from(stats: CircuitBreakerStats) -> Self {
        Self {
            category: stats.category,
            error_class: stats.error_class,
            state: stats.state.to_string(),
            consecutive_failures: stats.consecutive_failures,
            last_error: stats.last_error,
        }
    }
}

/// Final result of one orchestration run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub bytes_fetched: u64,
    pub duration_ms: u64,
    pub failures: Vec<FailedItem>,
    pub skips: Vec<SkippedItem>,
    pub fatal: Option<FatalCondition>,
    pub cancelled: bool,
    pub timed_out: bool,
    pub peak_in_flight: usize,
    pub retries: usize,
    pub breakers: Vec<BreakerReport>,
    pub outcomes: Vec<ItemOutcome>,
}

impl RunReport {
    /// Aggregates the final item outcomes. Outcomes must all be terminal.
    pub fn from_outcomes(run_id: Uuid, outcomes: Vec<ItemOutcome>, duration: Duration) -> Self {
        let mut report = Self {
            run_id,
            total: outcomes.len(),
            succeeded: 0,
            failed: 0,
            skipped: 0,
            bytes_fetched: 0,
            duration_ms: duration.as_millis() as u64,
            failures: Vec::new(),
            skips: Vec::new(),
            fatal: None,
            cancelled: false,
            timed_out: false,
            peak_in_flight: 0,
            retries: 0,
            breakers: Vec::new(),
            outcomes: Vec::new(),
        };

        for outcome in &outcomes {
            match outcome.state {
                ItemState::Succeeded => {
                    report.succeeded += 1;
                    report.bytes_fetched += outcome.bytes.unwrap_or(0);
                }
                ItemState::Failed => {
                    report.failed += 1;
                    report.failures.push(FailedItem {
                        item_id: outcome.item_id.clone(),
                        error_class: outcome.last_error_class().unwrap_or(ErrorClass::Unknown),
                        attempts: outcome.attempt_count(),
                        last_error: outcome.last_error.clone(),
                    });
                }
                ItemState::Skipped => {
                    report.skipped += 1;
                    report.skips.push(SkippedItem {
                        item_id: outcome.item_id.clone(),
                        reason: outcome.skip_reason.unwrap_or(SkipReason::Cancelled),
                    });
                }
                ItemState::Pending | ItemState::InProgress => {
                    tracing::error!(
                        item_id = %outcome.item_id,
                        state = %outcome.state,
                        "Non-terminal item in final report"
                    );
                }
            }
        }

        report.outcomes = outcomes;
        report
    }

    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }

    /// Process exit code for this run.
    pub fn exit_code(&self) -> i32 {
        if self.fatal.is_some() {
            return EXIT_FATAL;
        }
        if self.failed > 0 || self.skips.iter().any(|s| !s.reason.is_benign()) {
            return EXIT_FAILURES;
        }
        EXIT_SUCCESS
    }

    /// Number of items skipped for the given reason.
    pub fn skipped_for(&self, reason: SkipReason) -> usize {
        self.skips.iter().filter(|s| s.reason == reason).count()
    }

    pub fn failure(&self, item_id: &str) -> Option<&FailedItem> {
        self.failures.iter().find(|f| f.item_id == item_id)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} succeeded, {} failed, {} skipped",
            self.succeeded, self.failed, self.skipped
        )
    }
}
