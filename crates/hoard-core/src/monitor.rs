//! Background disk-space watchdog.
//!
//! Samples the [`DiskProbe`] at a fixed interval while the run is active.
//! Falling below the hard minimum closes the disk gate (workers stop
//! claiming, in-flight attempts finish); crossing the soft threshold runs the
//! cleanup routine without stopping anything.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::context::{FatalCondition, RunContext};
use crate::error::{AppError, ErrorClass};
use crate::traits::{Cleanup, DiskProbe, DiskUsage, RunStateStore};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    /// Free bytes below which no new item is claimed.
    pub hard_min_bytes: u64,
    /// Used-space ratio at or above which cleanup runs.
    pub soft_cleanup_ratio: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            hard_min_bytes: 2 * 1024 * 1024 * 1024,
            soft_cleanup_ratio: 0.9,
        }
    }
}

/// Result of one disk sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DiskCheck {
    Healthy(DiskUsage),
    BelowHardMinimum(DiskUsage),
    AboveSoftThreshold(DiskUsage),
}

pub struct ResourceMonitor<D: DiskProbe, C: Cleanup> {
    disk: D,
    cleanup: C,
    config: MonitorConfig,
}

impl<D: DiskProbe, C: Cleanup> ResourceMonitor<D, C> {
    pub fn new(disk: D, cleanup: C, config: MonitorConfig) -> Self {
        Self {
            disk,
            cleanup,
            config,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Takes one sample and classifies it.
    pub fn check(&self) -> Result<DiskCheck, AppError> {
        let usage = self.disk.sample()?;
        if usage.available_bytes < self.config.hard_min_bytes {
            Ok(DiskCheck::BelowHardMinimum(usage))
        } else if usage.used_ratio() >= self.config.soft_cleanup_ratio {
            Ok(DiskCheck::AboveSoftThreshold(usage))
        } else {
            Ok(DiskCheck::Healthy(usage))
        }
    }

    /// The condition recorded when free space drops below the hard minimum.
    pub fn hard_minimum_breached(&self, usage: &DiskUsage) -> FatalCondition {
        FatalCondition {
            error_class: ErrorClass::DiskSpace,
            message: format!(
                "Free disk space {} bytes is below the hard minimum of {} bytes",
                usage.available_bytes, self.config.hard_min_bytes
            ),
        }
    }

    /// Runs until `stop` fires, the run context goes inactive, or the disk
    /// gate is closed.
    pub async fn run<S: RunStateStore>(&self, ctx: Arc<RunContext<S>>, stop: CancellationToken) {
        tracing::debug!(
            interval_secs = self.config.interval.as_secs(),
            hard_min_bytes = self.config.hard_min_bytes,
            "Resource monitor started"
        );

        loop {
            tokio::select! {
                () = stop.cancelled() => break,
                () = tokio::time::sleep(self.config.interval) => {}
            }

            if !ctx.is_active() {
                break;
            }

            match self.check() {
                Ok(DiskCheck::Healthy(usage)) => {
                    tracing::debug!(
                        available_bytes = usage.available_bytes,
                        used_ratio = usage.used_ratio(),
                        "Disk healthy"
                    );
                }
                Ok(DiskCheck::AboveSoftThreshold(usage)) => {
                    tracing::warn!(
                        available_bytes = usage.available_bytes,
                        used_ratio = usage.used_ratio(),
                        "Disk usage above soft threshold, running cleanup"
                    );
                    if ctx.try_run_cleanup(&self.cleanup).await.is_none() {
                        tracing::debug!("Cleanup already in progress");
                    }
                }
                Ok(DiskCheck::BelowHardMinimum(usage)) => {
                    ctx.halt(self.hard_minimum_breached(&usage));
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Disk sample failed");
                }
            }
        }

        tracing::debug!("Resource monitor stopped");
    }
}
