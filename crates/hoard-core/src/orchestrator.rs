//! The orchestrator wires one run together:
//!
//! ```text
//! validate config -> load run state -> resume / category skips -> pre-validation
//!   -> dry-run short-circuit -> disk pre-flight -> monitor + worker pool
//!   -> leftovers skipped -> flush store -> RunReport
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::circuit_breaker::CircuitBreakers;
use crate::config::OrchestratorConfig;
use crate::context::{FatalCondition, RunContext};
use crate::error::AppError;
use crate::item::{FetchItem, SkipReason};
use crate::monitor::{DiskCheck, ResourceMonitor};
use crate::report::RunReport;
use crate::retry::RetryPolicy;
use crate::traits::{Cleanup, DiskProbe, FetchBackend, RunStateStore};
use crate::validate::{Verdict, validate_items};
use crate::worker::{FetchEvent, FetchReporter, Worker};

pub struct Orchestrator<B, S, D, C>
where
    B: FetchBackend,
    S: RunStateStore,
    D: DiskProbe,
    C: Cleanup,
{
    backend: B,
    store: S,
    disk: D,
    cleanup: C,
    config: OrchestratorConfig,
}

impl<B, S, D, C> Orchestrator<B, S, D, C>
where
    B: FetchBackend,
    S: RunStateStore,
    D: DiskProbe,
    C: Cleanup,
{
    pub fn new(backend: B, store: S, disk: D, cleanup: C, config: OrchestratorConfig) -> Self {
        Self {
            backend,
            store,
            disk,
            cleanup,
            config,
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Runs every item to a terminal state.
    ///
    /// Returns `Err` only for problems detected before any work starts
    /// (invalid configuration, duplicate ids, unreadable run state). Failures
    /// of individual items, cancellation and the disk gate are all reported
    /// through the [`RunReport`].
    pub async fn run<R>(
        &self,
        items: Vec<FetchItem>,
        cancel_token: CancellationToken,
        reporter: Arc<R>,
    ) -> Result<RunReport, AppError>
    where
        R: FetchReporter + 'static,
    {
        let started = Instant::now();
        self.config.validate()?;
        check_unique_ids(&items)?;

        let run_state = self.store.load().await?;
        tracing::info!(
            items = items.len(),
            succeeded_before = run_state.succeeded_count(),
            failed_before = run_state.failed_count(),
            "Run state loaded"
        );

        let ctx = Arc::new(RunContext::new(
            items,
            self.store.clone(),
            run_state,
            CircuitBreakers::new(self.config.circuit_breaker.clone()),
            cancel_token.child_token(),
        ));
        tracing::info!(
            run_id = %ctx.run_id(),
            total = ctx.items().len(),
            concurrency = self.config.concurrency,
            dry_run = self.config.dry_run,
            resume = self.config.resume,
            "Run started"
        );

        let deadline = self.config.global_timeout.map(|timeout| {
            let ctx = Arc::clone(&ctx);
            tokio::spawn(async move {
                tokio::select! {
                    () = tokio::time::sleep(timeout) => {
                        tracing::warn!(timeout_secs = timeout.as_secs(), "Global timeout reached, cancelling run");
                        ctx.mark_timed_out();
                        ctx.cancel_token().cancel();
                    }
                    () = ctx.cancel_token().cancelled() => {}
                }
            })
        });

        self.skip_prefiltered(&ctx, reporter.as_ref()).await;

        if self.config.validation.enabled {
            self.prevalidate(&ctx, reporter.as_ref()).await;
        }

        if self.config.dry_run {
            for outcome in ctx.queue().skip_remaining(SkipReason::DryRun) {
                if let Some(item) = ctx.items().iter().find(|i| i.id == outcome.item_id) {
                    reporter.report(FetchEvent::ItemSkipped {
                        item,
                        reason: SkipReason::DryRun,
                    });
                }
            }
        } else if !ctx.is_cancelled() {
            match self.preflight(&ctx).await {
                Some(condition) => ctx.halt(condition),
                None => self.run_pool(&ctx, &reporter).await,
            }
        }

        if let Some(handle) = deadline {
            handle.abort();
        }

        self.finalize_leftovers(&ctx, reporter.as_ref()).await;

        if let Err(e) = ctx.flush().await {
            tracing::error!(error = %e, "Failed to flush run state");
        }

        let progress = ctx.queue().progress();
        let mut report =
            RunReport::from_outcomes(ctx.run_id(), ctx.queue().outcomes(), started.elapsed());
        report.fatal = ctx.fatal();
        report.cancelled = cancel_token.is_cancelled();
        report.timed_out = ctx.timed_out();
        report.peak_in_flight = progress.peak_in_flight;
        report.retries = progress.retries;
        report.breakers = ctx
            .breakers()
            .stats()
            .into_iter()
            .map(Into::into)
            .collect();

        tracing::info!(
            run_id = %report.run_id,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            bytes = report.bytes_fetched,
            duration_ms = report.duration_ms,
            "Run finished: {}",
            report
        );

        Ok(report)
    }

    /// Resume and category skips, before anything touches the network.
    async fn skip_prefiltered<R: FetchReporter>(&self, ctx: &RunContext<S>, reporter: &R) {
        for index in ctx.queue().pending_indices() {
            let item = ctx.item(index);
            let reason = if self.config.resume && ctx.with_run_state(|s| s.is_succeeded(&item.id))
            {
                Some(SkipReason::AlreadyDone)
            } else if self.config.skip_categories.contains(&item.category) {
                Some(SkipReason::CategoryExcluded)
            } else {
                None
            };

            if let Some(reason) = reason {
                skip_item(ctx, index, reason, reporter).await;
            }
        }
    }

    async fn prevalidate<R: FetchReporter>(&self, ctx: &RunContext<S>, reporter: &R) {
        let indices = ctx.queue().pending_indices();
        if indices.is_empty() {
            return;
        }
        tracing::info!(items = indices.len(), "Validating item references");

        let verdicts = validate_items(
            &self.backend,
            ctx.items(),
            &indices,
            &self.config.validation,
            ctx.cancel_token(),
        )
        .await;

        for (index, verdict) in verdicts {
            let item = ctx.item(index);
            match verdict {
                Verdict::Valid => {}
                Verdict::Invalid(reason) => {
                    tracing::warn!(item_id = %item.id, source_ref = %item.source_ref, %reason, "Invalid reference");
                    skip_item(ctx, index, SkipReason::Invalid, reporter).await;
                }
                Verdict::Unverified(reason) => {
                    tracing::warn!(item_id = %item.id, %reason, "Could not verify reference, keeping item");
                }
            }
        }
    }

    /// One disk sample before any worker starts.
    async fn preflight(&self, ctx: &RunContext<S>) -> Option<FatalCondition> {
        let monitor = ResourceMonitor::new(
            self.disk.clone(),
            self.cleanup.clone(),
            self.config.monitor.clone(),
        );
        match monitor.check() {
            Ok(DiskCheck::BelowHardMinimum(usage)) => Some(monitor.hard_minimum_breached(&usage)),
            Ok(DiskCheck::AboveSoftThreshold(usage)) => {
                tracing::warn!(
                    available_bytes = usage.available_bytes,
                    used_ratio = usage.used_ratio(),
                    "Disk usage above soft threshold before start, running cleanup"
                );
                ctx.run_cleanup(&self.cleanup).await;
                None
            }
            Ok(DiskCheck::Healthy(_)) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Disk pre-flight sample failed, continuing");
                None
            }
        }
    }

    async fn run_pool<R>(&self, ctx: &Arc<RunContext<S>>, reporter: &Arc<R>)
    where
        R: FetchReporter + 'static,
    {
        ctx.set_active(true);

        let monitor_stop = ctx.cancel_token().child_token();
        let monitor = ResourceMonitor::new(
            self.disk.clone(),
            self.cleanup.clone(),
            self.config.monitor.clone(),
        );
        let monitor_handle = {
            let ctx = Arc::clone(ctx);
            let stop = monitor_stop.clone();
            tokio::spawn(async move { monitor.run(ctx, stop).await })
        };

        let mut workers = JoinSet::new();
        for n in 0..self.config.concurrency {
            let worker = Worker::new(
                format!("worker-{n}"),
                Arc::clone(ctx),
                self.backend.clone(),
                self.disk.clone(),
                self.cleanup.clone(),
                RetryPolicy::new(self.config.retry.clone()),
                self.config.worker_config(),
            );
            let reporter = Arc::clone(reporter);
            workers.spawn(async move { worker.run(reporter.as_ref()).await });
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task ended abnormally");
            }
        }

        ctx.set_active(false);
        monitor_stop.cancel();
        if let Err(e) = monitor_handle.await {
            tracing::error!(error = %e, "Resource monitor task ended abnormally");
        }
    }

    /// Moves every non-terminal item to a terminal state.
    async fn finalize_leftovers<R: FetchReporter>(&self, ctx: &RunContext<S>, reporter: &R) {
        let reason = if ctx.is_halted() {
            SkipReason::DiskPressure
        } else {
            SkipReason::Cancelled
        };

        let skipped = ctx.queue().skip_remaining(reason);
        if !skipped.is_empty() {
            tracing::warn!(count = skipped.len(), %reason, "Skipping unfinished items");
        }
        for outcome in skipped {
            if let Some(item) = ctx.items().iter().find(|i| i.id == outcome.item_id) {
                reporter.report(FetchEvent::ItemSkipped { item, reason });
            }
            ctx.persist(&outcome).await;
        }

        for outcome in ctx
            .queue()
            .abandon_in_flight("Worker stopped before the attempt finished")
        {
            tracing::error!(item_id = %outcome.item_id, "Item abandoned mid-attempt");
            ctx.persist(&outcome).await;
        }
    }
}

/// Skips one pending item; non-benign skips are also written to the store.
async fn skip_item<S: RunStateStore, R: FetchReporter>(
    ctx: &RunContext<S>,
    index: usize,
    reason: SkipReason,
    reporter: &R,
) {
    match ctx.queue().skip(index, reason) {
        Ok(outcome) => {
            reporter.report(FetchEvent::ItemSkipped {
                item: ctx.item(index),
                reason,
            });
            if !reason.is_benign() {
                ctx.persist(&outcome).await;
            }
        }
        Err(e) => {
            tracing::error!(index, error = %e, "Failed to skip item");
        }
    }
}

fn check_unique_ids(items: &[FetchItem]) -> Result<(), AppError> {
    let mut seen = HashSet::with_capacity(items.len());
    for item in items {
        if !seen.insert(item.id.as_str()) {
            return Err(AppError::ConfigError(format!(
                "Duplicate item id '{}' in work list",
                item.id
            )));
        }
    }
    Ok(())
}
