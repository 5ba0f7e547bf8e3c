//! In-process job event stream.
//!
//! - [`EventBus`] is a publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`JobEvent`] is the envelope published for every job status change.
//! - [`EventReporter`] is a [`JobReporter`](circus_core::report::JobReporter)
//!   that publishes onto the bus.
//! - [`EventLogger`] is a background subscriber that writes every event to
//!   the tracing log.

pub mod bus;
pub mod reporter;
pub mod subscriber;

pub use bus::{EventBus, JobEvent};
pub use reporter::EventReporter;
pub use subscriber::EventLogger;
