use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;

use crate::circuit_breaker::Admission;
use crate::context::RunContext;
use crate::error::{AppError, ErrorClass};
use crate::item::{AttemptRecord, FetchItem, SkipReason};
use crate::queue::Claim;
use crate::retry::{Decision, RetryPolicy};
use crate::traits::{Cleanup, DiskProbe, FetchBackend, RunStateStore};

/// Events emitted during a run for monitoring/logging.
#[derive(Debug, Clone)]
pub enum FetchEvent<'a> {
    WorkerStarted {
        worker_id: &'a str,
    },
    ItemClaimed {
        worker_id: &'a str,
        item: &'a FetchItem,
        attempt: u32,
    },
    ItemSucceeded {
        item: &'a FetchItem,
        attempt: u32,
        bytes: u64,
        duration_ms: u64,
    },
    AttemptFailed {
        item: &'a FetchItem,
        attempt: u32,
        error_class: ErrorClass,
        error: &'a str,
        decision: Decision,
    },
    CircuitRejected {
        item: &'a FetchItem,
        error_class: ErrorClass,
        retry_after: Duration,
    },
    ItemFailed {
        item: &'a FetchItem,
        error_class: ErrorClass,
        attempts: u32,
    },
    ItemSkipped {
        item: &'a FetchItem,
        reason: SkipReason,
    },
    WorkerStopped {
        worker_id: &'a str,
    },
}

/// Trait for receiving run events (decoupled logging).
pub trait FetchReporter: Send + Sync {
    fn report(&self, event: FetchEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl FetchReporter for TracingReporter {
    fn report(&self, event: FetchEvent<'_>) {
        match event {
            FetchEvent::WorkerStarted { worker_id } => {
                tracing::debug!(%worker_id, "Worker started");
            }
            FetchEvent::ItemClaimed {
                worker_id,
                item,
                attempt,
            } => {
                tracing::info!(
                    %worker_id,
                    item_id = %item.id,
                    category = %item.category,
                    attempt,
                    "Fetching {}",
                    item.display_name
                );
            }
            FetchEvent::ItemSucceeded {
                item,
                attempt,
                bytes,
                duration_ms,
            } => {
                tracing::info!(item_id = %item.id, attempt, bytes, duration_ms, "Item fetched");
            }
            FetchEvent::AttemptFailed {
                item,
                attempt,
                error_class,
                error,
                decision,
            } => {
                tracing::warn!(
                    item_id = %item.id,
                    attempt,
                    %error_class,
                    %error,
                    will_retry = decision.will_retry(),
                    retry_in_ms = decision.delay().map(|d| d.as_millis() as u64),
                    "Attempt failed"
                );
            }
            FetchEvent::CircuitRejected {
                item,
                error_class,
                retry_after,
            } => {
                tracing::warn!(
                    item_id = %item.id,
                    category = %item.category,
                    %error_class,
                    retry_after_secs = retry_after.as_secs(),
                    "Circuit open, attempt rejected"
                );
            }
            FetchEvent::ItemFailed {
                item,
                error_class,
                attempts,
            } => {
                tracing::error!(item_id = %item.id, %error_class, attempts, "Item failed");
            }
            FetchEvent::ItemSkipped { item, reason } => {
                tracing::info!(item_id = %item.id, %reason, "Item skipped");
            }
            FetchEvent::WorkerStopped { worker_id } => {
                tracing::debug!(%worker_id, "Worker stopped");
            }
        }
    }
}

/// Reporter that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl FetchReporter for SilentReporter {}

/// Per-worker settings, derived from the orchestrator config.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub per_attempt_timeout: Duration,
    /// How long an idle worker waits before looking at the queue again.
    pub poll_interval: Duration,
    /// Free space required after a cleanup before a `DiskSpace` retry.
    pub hard_min_bytes: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            per_attempt_timeout: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_millis(100),
            hard_min_bytes: 2 * 1024 * 1024 * 1024,
        }
    }
}

/// One member of the pool. Pulls items from the shared queue until it is
/// drained, the run is cancelled, or the disk gate closes.
pub struct Worker<B, S, D, C>
where
    B: FetchBackend,
    S: RunStateStore,
    D: DiskProbe,
    C: Cleanup,
{
    id: String,
    ctx: Arc<RunContext<S>>,
    backend: B,
    disk: D,
    cleanup: C,
    policy: RetryPolicy,
    config: WorkerConfig,
}

impl<B, S, D, C> Worker<B, S, D, C>
where
    B: FetchBackend,
    S: RunStateStore,
    D: DiskProbe,
    C: Cleanup,
{
    pub fn new(
        id: impl Into<String>,
        ctx: Arc<RunContext<S>>,
        backend: B,
        disk: D,
        cleanup: C,
        policy: RetryPolicy,
        config: WorkerConfig,
    ) -> Self {
        Self {
            id: id.into(),
            ctx,
            backend,
            disk,
            cleanup,
            policy,
            config,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Run the worker loop until there is nothing left to claim.
    pub async fn run<R: FetchReporter>(&self, reporter: &R) {
        reporter.report(FetchEvent::WorkerStarted { worker_id: &self.id });

        loop {
            if self.ctx.is_cancelled() || self.ctx.is_halted() {
                break;
            }

            match self.ctx.queue().claim() {
                Some(claim) => self.process(claim, reporter).await,
                None => {
                    if self.ctx.queue().is_drained() {
                        break;
                    }
                    // Retries are waiting out their delay or other workers
                    // may still requeue.
                    tokio::select! {
                        () = tokio::time::sleep(self.config.poll_interval) => {}
                        () = self.ctx.cancel_token().cancelled() => break,
                    }
                }
            }
        }

        reporter.report(FetchEvent::WorkerStopped { worker_id: &self.id });
    }

    async fn process<R: FetchReporter>(&self, claim: Claim, reporter: &R) {
        let item = self.ctx.item(claim.index);
        reporter.report(FetchEvent::ItemClaimed {
            worker_id: &self.id,
            item,
            attempt: claim.attempt_number,
        });

        let probe = match self.ctx.breakers().admit(&item.category) {
            Admission::Allowed { probe } => probe,
            Admission::Rejected {
                error_class,
                retry_after,
            } => {
                self.record_attempt(&claim, Utc::now(), 0, Some(error_class));
                reporter.report(FetchEvent::CircuitRejected {
                    item,
                    error_class,
                    retry_after,
                });
                let message = format!(
                    "Circuit breaker open for {} ({error_class}), retry after {}s",
                    item.category,
                    retry_after.as_secs()
                );
                self.finish_failed(claim.index, &message, reporter).await;
                return;
            }
        };

        let started_at = Utc::now();
        let start = Instant::now();
        let result = self.attempt(item).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(bytes) => {
                self.record_attempt(&claim, started_at, duration_ms, None);
                self.ctx.breakers().record_success(&item.category);
                match self.ctx.queue().complete(claim.index, bytes) {
                    Ok(outcome) => {
                        reporter.report(FetchEvent::ItemSucceeded {
                            item,
                            attempt: claim.attempt_number,
                            bytes,
                            duration_ms,
                        });
                        self.ctx.persist(&outcome).await;
                    }
                    Err(e) => {
                        tracing::error!(item_id = %item.id, error = %e, "Failed to mark item succeeded");
                    }
                }
            }
            Err(err) => {
                let class = err.class();
                let message = err.to_string();
                self.record_attempt(&claim, started_at, duration_ms, Some(class));
                self.ctx
                    .breakers()
                    .record_failure(&item.category, class, &message, probe);

                let decision = match self.ctx.queue().outcome(claim.index) {
                    Some(outcome) => self.policy.decide(&outcome, class),
                    None => Decision::Permanent,
                };
                reporter.report(FetchEvent::AttemptFailed {
                    item,
                    attempt: claim.attempt_number,
                    error_class: class,
                    error: &message,
                    decision,
                });

                match decision {
                    Decision::Retry(delay) => self.requeue(claim.index, delay, &message),
                    Decision::RetryAfterCleanup(delay) => {
                        self.ctx.run_cleanup(&self.cleanup).await;
                        match self.room_for(item) {
                            Ok(()) => self.requeue(claim.index, delay, &message),
                            Err(shortfall) => {
                                self.finish_failed(claim.index, &shortfall, reporter).await;
                            }
                        }
                    }
                    Decision::Exhausted | Decision::Permanent => {
                        self.finish_failed(claim.index, &message, reporter).await;
                    }
                }
            }
        }
    }

    /// One backend call under the per-attempt timeout. Panics become `Unknown`.
    async fn attempt(&self, item: &FetchItem) -> Result<u64, AppError> {
        let fetch = AssertUnwindSafe(self.backend.fetch(item)).catch_unwind();
        match tokio::time::timeout(self.config.per_attempt_timeout, fetch).await {
            Ok(Ok(result)) => result,
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(item_id = %item.id, panic = %message, "Backend panicked");
                Err(AppError::Generic(format!("Backend panicked: {message}")))
            }
            Err(_) => Err(AppError::Timeout(self.config.per_attempt_timeout.as_secs())),
        }
    }

    /// Checks that a cleanup left enough room to retry the item.
    fn room_for(&self, item: &FetchItem) -> Result<(), String> {
        let required = self
            .config
            .hard_min_bytes
            .max(item.estimated_size_bytes.unwrap_or(0));
        match self.disk.sample() {
            Ok(usage) if usage.available_bytes >= required => Ok(()),
            Ok(usage) => Err(format!(
                "Insufficient disk space after cleanup: {} bytes available, {required} required",
                usage.available_bytes
            )),
            Err(e) => {
                tracing::warn!(item_id = %item.id, error = %e, "Disk sample failed after cleanup");
                Ok(())
            }
        }
    }

    fn record_attempt(
        &self,
        claim: &Claim,
        started_at: chrono::DateTime<Utc>,
        duration_ms: u64,
        error_class: Option<ErrorClass>,
    ) {
        let record = AttemptRecord {
            attempt_number: claim.attempt_number,
            started_at,
            duration_ms,
            error_class,
        };
        if let Err(e) = self.ctx.queue().record_attempt(claim.index, record) {
            tracing::error!(index = claim.index, error = %e, "Failed to record attempt");
        }
    }

    fn requeue(&self, index: usize, delay: Duration, error: &str) {
        if let Err(e) = self.ctx.queue().requeue(index, delay, error) {
            tracing::error!(index, error = %e, "Failed to requeue item");
        }
    }

    async fn finish_failed<R: FetchReporter>(&self, index: usize, error: &str, reporter: &R) {
        match self.ctx.queue().fail(index, error) {
            Ok(outcome) => {
                reporter.report(FetchEvent::ItemFailed {
                    item: self.ctx.item(index),
                    error_class: outcome.last_error_class().unwrap_or(ErrorClass::Unknown),
                    attempts: outcome.attempt_count(),
                });
                self.ctx.persist(&outcome).await;
            }
            Err(e) => {
                tracing::error!(index, error = %e, "Failed to mark item failed");
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
