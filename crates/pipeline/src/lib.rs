//! Job execution for the CIRCUS compute daemon.
//!
//! [`JobRegisterer`] validates submissions and enqueues them.
//! [`JobPipeline`] runs one claimed job: stage-in, plugin execution,
//! stage-out and cleanup, reporting each status change as it goes.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod registerer;
pub mod stage_in;
pub mod stage_out;
pub mod workdir;

pub use config::PipelineConfig;
pub use error::PipelineError;
pub use pipeline::{JobExecutor, JobPipeline};
pub use registerer::{JobRegisterer, RegistrationError};
pub use workdir::JobDirectory;
