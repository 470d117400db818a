pub mod config;
pub mod jsonl;

pub use config::{DEFAULT_STATE_FILE, StoreConfig};
pub use jsonl::JsonlStateStore;
