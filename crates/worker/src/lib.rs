//! Pix360 conversion worker: configuration and the job dispatcher.

pub mod config;
pub mod dispatcher;

pub use config::{ConfigError, StitcherKind, WorkerConfig};
pub use dispatcher::{Dispatcher, JobError, DEFAULT_POLL_INTERVAL};
