//! Shared work queue for one orchestration run.
//!
//! An arena of [`ItemOutcome`]s indexed by position in the work list, plus a
//! FIFO of pending indices and a list of delayed retries. Every mutation goes
//! through one mutex, and a claim is a compare-and-set from `Pending` to
//! `InProgress`, so no two workers can hold the same item.
//!
//! Retried items sit in the delayed list until their backoff has elapsed and
//! then rejoin the *tail* of the FIFO on the next claim.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::AppError;
use crate::item::{AttemptRecord, ItemOutcome, ItemState, SkipReason};

/// Progress counters, updated under the queue lock.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub total: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub claims: usize,
    pub retries: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Progress {
    pub fn terminal(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// An item handed to a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub index: usize,
    /// 1-based number of the attempt about to start.
    pub attempt_number: u32,
}

#[derive(Debug)]
struct QueueInner {
    outcomes: Vec<ItemOutcome>,
    pending: VecDeque<usize>,
    delayed: Vec<(Instant, usize)>,
    progress: Progress,
}

impl QueueInner {
    fn promote_due(&mut self) {
        if self.delayed.is_empty() {
            return;
        }
        let now = Instant::now();
        let mut due: Vec<(Instant, usize)> = Vec::new();
        self.delayed.retain(|&(at, idx)| {
            if at <= now {
                due.push((at, idx));
                false
            } else {
                true
            }
        });
        due.sort_by_key(|&(at, _)| at);
        self.pending.extend(due.into_iter().map(|(_, idx)| idx));
    }

    fn outcome_mut(&mut self, index: usize) -> Result<&mut ItemOutcome, AppError> {
        self.outcomes
            .get_mut(index)
            .ok_or_else(|| AppError::Generic(format!("No item at queue index {index}")))
    }

    fn expect_state(&self, index: usize, expected: ItemState) -> Result<(), AppError> {
        let current = self.outcomes[index].state;
        if current != expected {
            return Err(AppError::Generic(format!(
                "Item '{}' is {current}, expected {expected}",
                self.outcomes[index].item_id
            )));
        }
        Ok(())
    }

    fn refresh_pending(&mut self) {
        self.progress.pending = self.pending.len() + self.delayed.len();
    }
}

/// Synchronized queue of item outcomes.
#[derive(Debug)]
pub struct WorkQueue {
    inner: Mutex<QueueInner>,
}

impl WorkQueue {
    /// Every id starts `Pending`, queued in the given order.
    pub fn new<I, T>(item_ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let outcomes: Vec<ItemOutcome> = item_ids.into_iter().map(ItemOutcome::pending).collect();
        let total = outcomes.len();
        Self {
            inner: Mutex::new(QueueInner {
                pending: (0..total).collect(),
                delayed: Vec::new(),
                progress: Progress {
                    total,
                    pending: total,
                    ..Default::default()
                },
                outcomes,
            }),
        }
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> MutexGuard<'_, QueueInner> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned work queue mutex");
            poisoned.into_inner()
        })
    }

    /// Atomically claims the oldest pending item.
    ///
    /// Returns `None` if nothing is claimable right now; retries may still be
    /// waiting out their delay (see [`is_drained`](Self::is_drained)).
    pub fn claim(&self) -> Option<Claim> {
        let mut inner = self.lock_inner();
        inner.promote_due();

        while let Some(index) = inner.pending.pop_front() {
            let outcome = &mut inner.outcomes[index];
            if outcome.state != ItemState::Pending {
                continue;
            }
            outcome.state = ItemState::InProgress;
            let attempt_number = outcome.attempt_count() + 1;

            let progress = &mut inner.progress;
            progress.in_flight += 1;
            progress.claims += 1;
            progress.peak_in_flight = progress.peak_in_flight.max(progress.in_flight);
            inner.refresh_pending();

            return Some(Claim {
                index,
                attempt_number,
            });
        }

        inner.refresh_pending();
        None
    }

    /// Appends an attempt to an in-progress item's history.
    pub fn record_attempt(&self, index: usize, attempt: AttemptRecord) -> Result<(), AppError> {
        let mut inner = self.lock_inner();
        inner.outcome_mut(index)?;
        inner.expect_state(index, ItemState::InProgress)?;
        inner.outcomes[index].attempts.push(attempt);
        Ok(())
    }

    /// Returns an in-progress item to `Pending`; it rejoins the tail of the
    /// queue once `delay` has elapsed.
    pub fn requeue(&self, index: usize, delay: Duration, error: &str) -> Result<(), AppError> {
        let mut inner = self.lock_inner();
        inner.outcome_mut(index)?;
        inner.expect_state(index, ItemState::InProgress)?;

        let outcome = &mut inner.outcomes[index];
        outcome.state = ItemState::Pending;
        outcome.last_error = Some(error.to_string());

        if delay.is_zero() {
            inner.pending.push_back(index);
        } else {
            inner.delayed.push((Instant::now() + delay, index));
        }
        inner.progress.in_flight -= 1;
        inner.progress.retries += 1;
        inner.refresh_pending();
        Ok(())
    }

    /// `InProgress` → `Succeeded`.
    pub fn complete(&self, index: usize, bytes: u64) -> Result<ItemOutcome, AppError> {
        let mut inner = self.lock_inner();
        inner.outcome_mut(index)?;
        inner.expect_state(index, ItemState::InProgress)?;

        let outcome = &mut inner.outcomes[index];
        outcome.state = ItemState::Succeeded;
        outcome.bytes = Some(bytes);
        let snapshot = outcome.clone();

        inner.progress.in_flight -= 1;
        inner.progress.succeeded += 1;
        Ok(snapshot)
    }

    /// `InProgress` → `Failed`.
    pub fn fail(&self, index: usize, error: &str) -> Result<ItemOutcome, AppError> {
        let mut inner = self.lock_inner();
        inner.outcome_mut(index)?;
        inner.expect_state(index, ItemState::InProgress)?;

        let outcome = &mut inner.outcomes[index];
        outcome.state = ItemState::Failed;
        outcome.last_error = Some(error.to_string());
        let snapshot = outcome.clone();

        inner.progress.in_flight -= 1;
        inner.progress.failed += 1;
        Ok(snapshot)
    }

    /// `Pending` → `Skipped`, removing the item from the queue.
    pub fn skip(&self, index: usize, reason: SkipReason) -> Result<ItemOutcome, AppError> {
        let mut inner = self.lock_inner();
        inner.outcome_mut(index)?;
        inner.expect_state(index, ItemState::Pending)?;

        let outcome = &mut inner.outcomes[index];
        outcome.state = ItemState::Skipped;
        outcome.skip_reason = Some(reason);
        let snapshot = outcome.clone();

        inner.pending.retain(|&i| i != index);
        inner.delayed.retain(|&(_, i)| i != index);
        inner.progress.skipped += 1;
        inner.refresh_pending();
        Ok(snapshot)
    }

    /// Skips every item still pending or waiting on a retry delay.
    pub fn skip_remaining(&self, reason: SkipReason) -> Vec<ItemOutcome> {
        let mut inner = self.lock_inner();
        inner.pending.clear();
        inner.delayed.clear();

        let mut skipped = Vec::new();
        for outcome in inner
            .outcomes
            .iter_mut()
            .filter(|o| o.state == ItemState::Pending)
        {
            outcome.state = ItemState::Skipped;
            outcome.skip_reason = Some(reason);
            skipped.push(outcome.clone());
        }
        inner.progress.skipped += skipped.len();
        inner.refresh_pending();
        skipped
    }

    /// Fails items whose worker went away mid-attempt.
    pub fn abandon_in_flight(&self, error: &str) -> Vec<ItemOutcome> {
        let mut inner = self.lock_inner();
        let mut failed = Vec::new();
        for outcome in inner
            .outcomes
            .iter_mut()
            .filter(|o| o.state == ItemState::InProgress)
        {
            outcome.state = ItemState::Failed;
            outcome.last_error = Some(error.to_string());
            failed.push(outcome.clone());
        }
        inner.progress.in_flight = 0;
        inner.progress.failed += failed.len();
        failed
    }

    /// Indices of items currently `Pending`, in queue order.
    pub fn pending_indices(&self) -> Vec<usize> {
        let inner = self.lock_inner();
        inner
            .pending
            .iter()
            .copied()
            .filter(|&i| inner.outcomes[i].state == ItemState::Pending)
            .collect()
    }

    /// True once nothing is pending, waiting on a delay, or in flight.
    pub fn is_drained(&self) -> bool {
        let inner = self.lock_inner();
        inner.pending.is_empty() && inner.delayed.is_empty() && inner.progress.in_flight == 0
    }

    pub fn outcome(&self, index: usize) -> Option<ItemOutcome> {
        self.lock_inner().outcomes.get(index).cloned()
    }

    pub fn outcomes(&self) -> Vec<ItemOutcome> {
        self.lock_inner().outcomes.clone()
    }

    pub fn progress(&self) -> Progress {
        self.lock_inner().progress
    }
}
