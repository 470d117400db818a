//! Shared state for one orchestration run.
//!
//! Workers and the resource monitor all hold an `Arc<RunContext>`. Each
//! mutable resource has exactly one synchronization primitive: the queue
//! (and its progress counters) its mutex, the run state its mutex, the
//! breakers theirs, and the flags are atomics.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::circuit_breaker::CircuitBreakers;
use crate::error::{AppError, ErrorClass};
use crate::item::{FetchItem, ItemOutcome, ItemState};
use crate::queue::WorkQueue;
use crate::state::{RunState, StateRecord};
use crate::traits::{Cleanup, RunStateStore};

/// A condition that stopped the run from accepting new work.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct FatalCondition {
    pub error_class: ErrorClass,
    pub message: String,
}

pub struct RunContext<S: RunStateStore> {
    run_id: Uuid,
    items: Vec<FetchItem>,
    queue: WorkQueue,
    store: S,
    run_state: Mutex<RunState>,
    breakers: CircuitBreakers,
    cancel_token: CancellationToken,
    active: AtomicBool,
    halted: AtomicBool,
    timed_out: AtomicBool,
    fatal: Mutex<Option<FatalCondition>>,
    cleanup_lock: tokio::sync::Mutex<()>,
}

impl<S: RunStateStore> RunContext<S> {
    pub fn new(
        items: Vec<FetchItem>,
        store: S,
        run_state: RunState,
        breakers: CircuitBreakers,
        cancel_token: CancellationToken,
    ) -> Self {
        let queue = WorkQueue::new(items.iter().map(|i| i.id.clone()));
        Self {
            run_id: Uuid::new_v4(),
            items,
            queue,
            store,
            run_state: Mutex::new(run_state),
            breakers,
            cancel_token,
            active: AtomicBool::new(false),
            halted: AtomicBool::new(false),
            timed_out: AtomicBool::new(false),
            fatal: Mutex::new(None),
            cleanup_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn items(&self) -> &[FetchItem] {
        &self.items
    }

    pub fn item(&self, index: usize) -> &FetchItem {
        &self.items[index]
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    pub fn breakers(&self) -> &CircuitBreakers {
        &self.breakers
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel_token
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn mark_timed_out(&self) {
        self.timed_out.store(true, Ordering::SeqCst);
    }

    pub fn timed_out(&self) -> bool {
        self.timed_out.load(Ordering::SeqCst)
    }

    /// Closes the disk gate: workers stop claiming, in-flight attempts finish.
    pub fn halt(&self, condition: FatalCondition) {
        let mut fatal = lock(&self.fatal);
        if fatal.is_none() {
            tracing::error!(
                error_class = %condition.error_class,
                message = %condition.message,
                "Halting: no new items will be claimed"
            );
            *fatal = Some(condition);
        }
        self.halted.store(true, Ordering::SeqCst);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    pub fn fatal(&self) -> Option<FatalCondition> {
        lock(&self.fatal).clone()
    }

    /// Synchronized read access to the run state.
    pub fn with_run_state<T>(&self, f: impl FnOnce(&RunState) -> T) -> T {
        f(&lock(&self.run_state))
    }

    /// Writes a terminal outcome to the state store and folds it into the
    /// in-memory run state. Store failures are logged, not propagated: losing
    /// one record only costs a re-fetch on the next `--resume`.
    pub async fn persist(&self, outcome: &ItemOutcome) {
        let record = StateRecord {
            run_id: self.run_id,
            item_id: outcome.item_id.clone(),
            state: outcome.state,
            error_class: (outcome.state == ItemState::Failed)
                .then(|| outcome.last_error_class().unwrap_or(ErrorClass::Unknown)),
            skip_reason: outcome.skip_reason,
            attempts: outcome.attempt_count(),
            timestamp: Utc::now(),
        };

        if let Err(e) = self.store.append(&record).await {
            tracing::error!(item_id = %record.item_id, error = %e, "Failed to persist item outcome");
        }
        lock(&self.run_state).apply(&record);
    }

    pub async fn flush(&self) -> Result<(), AppError> {
        self.store.flush().await
    }

    /// Runs the cleanup routine, waiting for any cleanup already in progress.
    pub async fn run_cleanup<C: Cleanup>(&self, cleanup: &C) -> u64 {
        let _guard = self.cleanup_lock.lock().await;
        run_cleanup_logged(cleanup).await
    }

    /// Runs the cleanup routine unless one is already in progress.
    pub async fn try_run_cleanup<C: Cleanup>(&self, cleanup: &C) -> Option<u64> {
        let _guard = self.cleanup_lock.try_lock().ok()?;
        Some(run_cleanup_logged(cleanup).await)
    }
}

async fn run_cleanup_logged<C: Cleanup>(cleanup: &C) -> u64 {
    match cleanup.cleanup().await {
        Ok(freed) => {
            tracing::info!(freed_bytes = freed, "Cleanup finished");
            freed
        }
        Err(e) => {
            tracing::warn!(error = %e, "Cleanup failed");
            0
        }
    }
}

/// Acquires a mutex, recovering from poison if necessary.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Recovered from poisoned run context mutex");
        poisoned.into_inner()
    })
}
