//! Echocast - watch an account and echo its new posts with a mention
//!
//! This library provides the polling, deduplication and reply machinery used
//! by the `echo-watch` daemon.

pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod feed;
pub mod logging;
pub mod notifier;
pub mod publisher;
pub mod scheduler;
pub mod types;

// Re-export commonly used types
pub use config::{Config, Secrets};
pub use dedup::DedupTracker;
pub use engine::PollEngine;
pub use error::{EchocastError, Result};
pub use scheduler::Scheduler;
pub use types::{Item, ItemId};
