//! Container lifecycle management for plugin and volume-builder runs.
//!
//! A [`ContainerEngine`] performs the individual engine operations
//! (create, start, inspect, stop, remove). [`ContainerRunner`] drives one
//! complete run on top of an engine: it polls for exit at a fixed tick,
//! enforces an optional deadline, always removes the container itself and
//! returns the captured output.

pub mod docker;
pub mod engine;
pub mod error;
pub mod runner;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use docker::DockerCli;
pub use engine::{host_user, Bind, ContainerEngine, ContainerSpec, ContainerStatus, OutputCapture};
pub use error::ContainerError;
pub use runner::{ContainerRunner, RunObserver, RunOptions};
