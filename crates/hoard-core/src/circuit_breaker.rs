//! Circuit breakers keyed by `(category, error class)`.
//!
//! Protects a registry that is throttling or down from being hammered by
//! several workers at once. Only transient classes (see
//! [`ErrorClass::trips_circuit`]) count towards a breaker.
//!
//! # Circuit States
//!
//! ```text
//! CLOSED (healthy) --[N failures]--> OPEN (rejecting) --[cooldown]--> HALF_OPEN (one probe)
//!                                     ^                                    |
//!                                     +---[probe fails, cooldown x2]-------+
//!                                                                          |
//! CLOSED <-------------------------[probe succeeds]------------------------+
//! ```
//!
//! While any breaker of a category is open, every attempt in that category is
//! rejected without touching the fetch backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::error::ErrorClass;

/// Current state of one breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Attempts flow normally.
    Closed,
    /// Attempts are rejected immediately.
    Open,
    /// One probe attempt is allowed to test recovery.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures of one class in one category before opening.
    pub failure_threshold: u32,

    /// Time to wait before transitioning from Open to Half-Open.
    pub cooldown: Duration,

    /// Cooldown multiplier applied each time a half-open probe fails.
    pub backoff_multiplier: f32,

    /// Upper bound for the grown cooldown.
    pub max_cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            max_cooldown: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BreakerKey {
    category: String,
    class: ErrorClass,
}

#[derive(Debug)]
struct BreakerEntry {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    current_cooldown: Duration,
    probe_in_flight: bool,
    last_error: Option<String>,
}

impl BreakerEntry {
    fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            current_cooldown: config.cooldown,
            probe_in_flight: false,
            last_error: None,
        }
    }

    fn remaining_cooldown(&self) -> Duration {
        self.opened_at
            .map(|t| self.current_cooldown.saturating_sub(t.elapsed()))
            .unwrap_or(self.current_cooldown)
    }
}

/// Statistics about one breaker for monitoring and reporting.
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    pub category: String,
    pub error_class: ErrorClass,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub time_until_half_open: Option<Duration>,
}

/// Verdict for an attempt about to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Go ahead. `probe` is true when this attempt is the half-open probe.
    Allowed { probe: bool },
    /// Do not call the backend.
    Rejected {
        error_class: ErrorClass,
        retry_after: Duration,
    },
}

/// Thread-safe registry of per-`(category, class)` circuit breakers.
#[derive(Clone)]
pub struct CircuitBreakers {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<HashMap<BreakerKey, BreakerEntry>>>,
}

impl CircuitBreakers {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Acquires the inner mutex lock, recovering from poison if necessary.
    fn lock_inner(&self) -> MutexGuard<'_, HashMap<BreakerKey, BreakerEntry>> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Recovered from poisoned circuit breaker mutex");
            poisoned.into_inner()
        })
    }

    /// Returns the state of one breaker, handling lazy Open → HalfOpen transitions.
    pub fn state(&self, category: &str, class: ErrorClass) -> CircuitState {
        let mut inner = self.lock_inner();
        let key = BreakerKey {
            category: category.to_string(),
            class,
        };
        match inner.get_mut(&key) {
            Some(entry) => {
                maybe_transition_to_half_open(&key, entry);
                entry.state
            }
            None => CircuitState::Closed,
        }
    }

    /// Decides whether an attempt in `category` may call the backend.
    ///
    /// - any breaker Open, or HalfOpen with its probe taken: rejected
    /// - some breaker HalfOpen with no probe in flight: allowed as the probe
    /// - otherwise: allowed
    pub fn admit(&self, category: &str) -> Admission {
        let mut inner = self.lock_inner();
        let mut half_open = false;

        for (key, entry) in inner.iter_mut().filter(|(k, _)| k.category == category) {
            maybe_transition_to_half_open(key, entry);
            match entry.state {
                CircuitState::Open => {
                    return Admission::Rejected {
                        error_class: key.class,
                        retry_after: entry.remaining_cooldown(),
                    };
                }
                CircuitState::HalfOpen if entry.probe_in_flight => {
                    return Admission::Rejected {
                        error_class: key.class,
                        retry_after: Duration::ZERO,
                    };
                }
                CircuitState::HalfOpen => half_open = true,
                CircuitState::Closed => {}
            }
        }

        if half_open {
            for (_, entry) in inner
                .iter_mut()
                .filter(|(k, e)| k.category == category && e.state == CircuitState::HalfOpen)
            {
                entry.probe_in_flight = true;
            }
        }

        Admission::Allowed { probe: half_open }
    }

    /// Any success closes half-open breakers of the category and resets
    /// every consecutive-failure counter in it.
    pub fn record_success(&self, category: &str) {
        let mut inner = self.lock_inner();

        for (key, entry) in inner.iter_mut().filter(|(k, _)| k.category == category) {
            match entry.state {
                CircuitState::HalfOpen => {
                    tracing::info!(
                        category = %key.category,
                        error_class = %key.class,
                        "Circuit breaker closing after successful probe"
                    );
                    *entry = BreakerEntry::new(&self.config);
                }
                CircuitState::Closed => {
                    entry.consecutive_failures = 0;
                }
                CircuitState::Open => {}
            }
        }
    }

    /// Records a failed attempt. `probe` must be the value handed out by
    /// [`admit`](Self::admit) for this attempt.
    pub fn record_failure(&self, category: &str, class: ErrorClass, message: &str, probe: bool) {
        let mut inner = self.lock_inner();

        if probe {
            for (key, entry) in inner.iter_mut().filter(|(k, e)| {
                k.category == category && e.state == CircuitState::HalfOpen && e.probe_in_flight
            }) {
                entry.state = CircuitState::Open;
                entry.opened_at = Some(Instant::now());
                entry.probe_in_flight = false;
                entry.last_error = Some(message.to_string());
                entry.current_cooldown = std::cmp::min(
                    Duration::from_secs_f32(
                        entry.current_cooldown.as_secs_f32() * self.config.backoff_multiplier,
                    ),
                    self.config.max_cooldown,
                );
                tracing::warn!(
                    category = %key.category,
                    error_class = %key.class,
                    cooldown_secs = entry.current_cooldown.as_secs(),
                    "Circuit breaker probe failed, returning to open state"
                );
            }
        }

        if !class.trips_circuit() {
            return;
        }

        let key = BreakerKey {
            category: category.to_string(),
            class,
        };
        let threshold = self.config.failure_threshold;
        let entry = inner
            .entry(key.clone())
            .or_insert_with(|| BreakerEntry::new(&self.config));
        entry.last_error = Some(message.to_string());

        if entry.state == CircuitState::Closed {
            entry.consecutive_failures += 1;
            if entry.consecutive_failures >= threshold {
                tracing::warn!(
                    category = %key.category,
                    error_class = %key.class,
                    failures = entry.consecutive_failures,
                    "Circuit breaker opening after {} consecutive failures",
                    entry.consecutive_failures
                );
                entry.state = CircuitState::Open;
                entry.opened_at = Some(Instant::now());
            }
        }
    }

    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        let mut inner = self.lock_inner();
        let mut stats: Vec<_> = inner
            .iter_mut()
            .map(|(key, entry)| {
                maybe_transition_to_half_open(key, entry);
                CircuitBreakerStats {
                    category: key.category.clone(),
                    error_class: key.class,
                    state: entry.state,
                    consecutive_failures: entry.consecutive_failures,
                    last_error: entry.last_error.clone(),
                    time_until_half_open: (entry.state == CircuitState::Open)
                        .then(|| entry.remaining_cooldown()),
                }
            })
            .collect();
        stats.sort_by(|a, b| {
            (a.category.as_str(), a.error_class.as_str())
                .cmp(&(b.category.as_str(), b.error_class.as_str()))
        });
        stats
    }
}

fn maybe_transition_to_half_open(key: &BreakerKey, entry: &mut BreakerEntry) {
    if entry.state == CircuitState::Open
        && let Some(opened_at) = entry.opened_at
        && opened_at.elapsed() >= entry.current_cooldown
    {
        tracing::info!(
            category = %key.category,
            error_class = %key.class,
            "Circuit breaker transitioning to half-open state"
        );
        entry.state = CircuitState::HalfOpen;
        entry.probe_in_flight = false;
    }
}
