pub mod circuit_breaker;
pub mod config;
pub mod context;
pub mod error;
pub mod item;
pub mod monitor;
pub mod orchestrator;
pub mod queue;
pub mod report;
pub mod retry;
pub mod state;
pub mod traits;
pub mod validate;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::OrchestratorConfig;
pub use error::{AppError, ErrorClass};
pub use item::{FetchItem, ItemKind, ItemOutcome, ItemState, SkipReason};
pub use orchestrator::Orchestrator;
pub use report::{EXIT_FAILURES, EXIT_FATAL, EXIT_SUCCESS, RunReport};
pub use state::{RunState, StateRecord};
pub use traits::{Cleanup, DiskProbe, DiskUsage, FetchBackend, NoopCleanup, RunStateStore};
pub use worker::{FetchEvent, FetchReporter, SilentReporter, TracingReporter};
