//! The CIRCUS compute daemon.
//!
//! [`DaemonLoop`] repeatedly claims one job from the queue, hands it to a
//! [`JobExecutor`](circus_pipeline::JobExecutor) and always settles the
//! claim afterwards. [`WorkerConfig`] and [`registry`] turn environment
//! variables into the collaborators the loop runs with.

pub mod config;
pub mod daemon;
pub mod registry;
pub mod signal;
pub mod timer;

pub use config::{ConfigError, LogFormat, WorkerConfig};
pub use daemon::{DaemonError, DaemonHandle, DaemonLoop, DaemonState};
pub use registry::{Collaborators, RegistryError};
pub use timer::{CancellableTimer, WaitOutcome};
