use std::collections::HashSet;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::error::AppError;
use crate::monitor::MonitorConfig;
use crate::retry::RetryConfig;
use crate::validate::ValidationConfig;
use crate::worker::WorkerConfig;

/// Everything one orchestration run is tuned by.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Number of workers in the pool (>= 1).
    pub concurrency: usize,
    /// Deadline for one backend call.
    pub per_attempt_timeout: Duration,
    /// Deadline for the whole run; unfinished items are skipped as cancelled.
    pub global_timeout: Option<Duration>,
    pub dry_run: bool,
    /// Skip items that already succeeded in an earlier run.
    pub resume: bool,
    pub skip_categories: HashSet<String>,
    pub poll_interval: Duration,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub monitor: MonitorConfig,
    pub validation: ValidationConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            per_attempt_timeout: Duration::from_secs(30 * 60),
            global_timeout: None,
            dry_run: false,
            resume: false,
            skip_categories: HashSet::new(),
            poll_interval: Duration::from_millis(100),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            monitor: MonitorConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts;
        self
    }

    pub fn with_per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout = timeout;
        self
    }

    pub fn with_global_timeout(mut self, timeout: Duration) -> Self {
        self.global_timeout = Some(timeout);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_skip_categories<I, T>(mut self, categories: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.skip_categories = categories.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_circuit_breaker(mut self, circuit_breaker: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = circuit_breaker;
        self
    }

    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_validation(mut self, validation: ValidationConfig) -> Self {
        self.validation = validation;
        self
    }

    /// Rejects settings the orchestrator cannot run with.
    pub fn validate(&self) -> Result<(), AppError> {
        if self.concurrency == 0 {
            return Err(AppError::ConfigError(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::ConfigError(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.per_attempt_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "per_attempt_timeout must be greater than zero".into(),
            ));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(AppError::ConfigError(format!(
                "backoff base delay ({:?}) exceeds max delay ({:?})",
                self.retry.base_delay, self.retry.max_delay
            )));
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err(AppError::ConfigError(
                "circuit breaker failure_threshold must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.monitor.soft_cleanup_ratio) {
            return Err(AppError::ConfigError(format!(
                "soft cleanup ratio must be within [0, 1], got {}",
                self.monitor.soft_cleanup_ratio
            )));
        }
        Ok(())
    }

    pub(crate) fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            per_attempt_timeout: self.per_attempt_timeout,
            poll_interval: self.poll_interval,
            hard_min_bytes: self.monitor.hard_min_bytes,
        }
    }
}
