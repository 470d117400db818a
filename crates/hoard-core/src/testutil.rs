//! Mock backend, store, disk probe, cleanup and reporter for unit tests.
//!
//! Each mock is cheap to clone and shares its recorders through
//! `Arc<Mutex<_>>`, so a test keeps one handle and inspects the calls the
//! orchestrator made through another.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{AppError, ErrorClass};
use crate::item::{FetchItem, ItemKind};
use crate::state::{RunState, StateRecord};
use crate::traits::{Cleanup, DiskProbe, DiskUsage, FetchBackend, RunStateStore};
use crate::worker::{FetchEvent, FetchReporter};

/// Builds the `AppError` variant that classifies as `class`.
pub fn error_for(class: ErrorClass) -> AppError {
    match class {
        ErrorClass::Network => AppError::NetworkError("connection reset".into()),
        ErrorClass::RateLimit => AppError::RateLimited("429 Too Many Requests".into()),
        ErrorClass::Timeout => AppError::Timeout(30),
        ErrorClass::DiskSpace => AppError::DiskSpace("no space left on device".into()),
        ErrorClass::Auth => AppError::AuthError("unauthorized".into()),
        ErrorClass::Invalid => AppError::InvalidReference("manifest unknown".into()),
        ErrorClass::Unknown => AppError::Generic("something odd".into()),
    }
}

// ---------------------------------------------------------------------------
// MockBackend
// ---------------------------------------------------------------------------

/// One scripted response of the mock backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockResponse {
    Ok(u64),
    Fail(ErrorClass),
    Panic,
}

/// Mock fetch backend with per-item scripts.
///
/// Each fetch of an item pops the next scripted response; items with an
/// empty script fall back to their `always` response, then to `Ok(1024)`.
#[derive(Clone, Default)]
pub struct MockBackend {
    scripts: Arc<Mutex<HashMap<String, VecDeque<MockResponse>>>>,
    always: Arc<Mutex<HashMap<String, MockResponse>>>,
    invalid: Arc<Mutex<HashSet<String>>>,
    probe_failures: Arc<Mutex<HashMap<String, ErrorClass>>>,
    delay: Duration,
    pub fetches: Arc<Mutex<Vec<String>>>,
    pub probes: Arc<Mutex<Vec<String>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps this long before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn script(self, item_id: &str, responses: Vec<MockResponse>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(item_id.to_string(), responses.into());
        self
    }

    pub fn always(self, item_id: &str, response: MockResponse) -> Self {
        self.always
            .lock()
            .unwrap()
            .insert(item_id.to_string(), response);
        self
    }

    /// Probes of this item report `Invalid`.
    pub fn invalid_on_probe(self, item_id: &str) -> Self {
        self.invalid.lock().unwrap().insert(item_id.to_string());
        self
    }

    /// Probes of this item fail with the given class.
    pub fn probe_fails(self, item_id: &str, class: ErrorClass) -> Self {
        self.probe_failures
            .lock()
            .unwrap()
            .insert(item_id.to_string(), class);
        self
    }

    pub fn fetch_count(&self, item_id: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .iter()
            .filter(|id| *id == item_id)
            .count()
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_response(&self, item_id: &str) -> MockResponse {
        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(item_id)
            .and_then(|s| s.pop_front());
        scripted
            .or_else(|| self.always.lock().unwrap().get(item_id).copied())
            .unwrap_or(MockResponse::Ok(1024))
    }
}

impl FetchBackend for MockBackend {
    async fn probe(&self, item: &FetchItem) -> Result<(), AppError> {
        self.probes.lock().unwrap().push(item.id.clone());
        if self.invalid.lock().unwrap().contains(&item.id) {
            return Err(error_for(ErrorClass::Invalid));
        }
        let failure = self.probe_failures.lock().unwrap().get(&item.id).copied();
        match failure {
            Some(class) => Err(error_for(class)),
            None => Ok(()),
        }
    }

    async fn fetch(&self, item: &FetchItem) -> Result<u64, AppError> {
        self.fetches.lock().unwrap().push(item.id.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let response = self.next_response(&item.id);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match response {
            MockResponse::Ok(bytes) => Ok(bytes),
            MockResponse::Fail(class) => Err(error_for(class)),
            MockResponse::Panic => panic!("mock backend panicked on {}", item.id),
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStateStore
// ---------------------------------------------------------------------------

/// In-memory state store that records every appended record.
#[derive(Clone, Default)]
pub struct MemoryStateStore {
    records: Arc<Mutex<Vec<StateRecord>>>,
    fail_appends: bool,
    pub flushes: Arc<AtomicUsize>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-loaded with records from an earlier run.
    pub fn with_records(records: Vec<StateRecord>) -> Self {
        Self {
            records: Arc::new(Mutex::new(records)),
            ..Default::default()
        }
    }

    /// Store whose appends always fail.
    pub fn failing() -> Self {
        Self {
            fail_appends: true,
            ..Default::default()
        }
    }

    pub fn records(&self) -> Vec<StateRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl RunStateStore for MemoryStateStore {
    async fn load(&self) -> Result<RunState, AppError> {
        Ok(RunState::from_records(self.records()))
    }

    async fn append(&self, record: &StateRecord) -> Result<(), AppError> {
        if self.fail_appends {
            return Err(AppError::StateStoreError("disk detached".into()));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    async fn flush(&self) -> Result<(), AppError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MockDiskProbe / MockCleanup
// ---------------------------------------------------------------------------

pub const GIB: u64 = 1024 * 1024 * 1024;

/// Disk probe with a settable amount of free space.
#[derive(Clone)]
pub struct MockDiskProbe {
    available: Arc<AtomicU64>,
    total: u64,
    pub samples: Arc<AtomicUsize>,
}

impl MockDiskProbe {
    pub fn with_available(available: u64) -> Self {
        Self {
            available: Arc::new(AtomicU64::new(available)),
            total: 1000 * GIB,
            samples: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn plenty() -> Self {
        Self::with_available(500 * GIB)
    }

    pub fn set_available(&self, available: u64) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn sample_count(&self) -> usize {
        self.samples.load(Ordering::SeqCst)
    }
}

impl DiskProbe for MockDiskProbe {
    fn sample(&self) -> Result<DiskUsage, AppError> {
        self.samples.fetch_add(1, Ordering::SeqCst);
        Ok(DiskUsage {
            available_bytes: self.available.load(Ordering::SeqCst),
            total_bytes: self.total,
        })
    }
}

/// Cleanup that counts calls and optionally gives space back to a probe.
#[derive(Clone)]
pub struct MockCleanup {
    freed: u64,
    calls: Arc<AtomicUsize>,
    probe: Option<MockDiskProbe>,
}

impl MockCleanup {
    pub fn freeing(freed: u64) -> Self {
        Self {
            freed,
            calls: Arc::new(AtomicUsize::new(0)),
            probe: None,
        }
    }

    /// After cleaning, the probe reports `freed` more bytes available.
    pub fn restoring(probe: MockDiskProbe, freed: u64) -> Self {
        Self {
            freed,
            calls: Arc::new(AtomicUsize::new(0)),
            probe: Some(probe),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Cleanup for MockCleanup {
    async fn cleanup(&self) -> Result<u64, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(probe) = &self.probe {
            let now = probe.available.load(Ordering::SeqCst);
            probe.set_available(now + self.freed);
        }
        Ok(self.freed)
    }
}

// ---------------------------------------------------------------------------
// MockReporter
// ---------------------------------------------------------------------------

/// Reporter that records event labels.
#[derive(Default)]
pub struct MockReporter {
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, label: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| *e == label)
            .count()
    }
}

impl FetchReporter for MockReporter {
    fn report(&self, event: FetchEvent<'_>) {
        let label = match &event {
            FetchEvent::WorkerStarted { .. } => "WorkerStarted",
            FetchEvent::ItemClaimed { .. } => "ItemClaimed",
            FetchEvent::ItemSucceeded { .. } => "ItemSucceeded",
            FetchEvent::AttemptFailed { .. } => "AttemptFailed",
            FetchEvent::CircuitRejected { .. } => "CircuitRejected",
            FetchEvent::ItemFailed { .. } => "ItemFailed",
            FetchEvent::ItemSkipped { .. } => "ItemSkipped",
            FetchEvent::WorkerStopped { .. } => "WorkerStopped",
        };
        self.events.lock().unwrap().push(label.to_string());
    }
}

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

/// `count` image items named `item-1..=count` in category `base_os`.
pub fn make_items(count: usize) -> Vec<FetchItem> {
    (1..=count)
        .map(|i| {
            FetchItem::new(
                format!("item-{i}"),
                ItemKind::Image,
                format!("registry.example.com/image-{i}:latest"),
            )
            .with_category("base_os")
        })
        .collect()
}
