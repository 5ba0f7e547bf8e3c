//! Domain types and collaborator contracts for the CIRCUS compute daemon.
//!
//! Everything here is storage- and engine-agnostic: the job request model,
//! multirange and partial-volume arithmetic, and the traits through which
//! the pipeline talks to the queue, the plugin catalog, the DICOM
//! repository, and the status sink. In-memory implementations live next to
//! the traits so that the daemon can run (and be tested) without
//! PostgreSQL.

pub mod dicom;
pub mod error;
pub mod job;
pub mod multirange;
pub mod partial_volume;
pub mod plugin;
pub mod queue;
pub mod report;
pub mod types;

pub use error::CoreError;
pub use job::{validate_job_id, JobSeries, PluginJobRequest};
pub use multirange::MultiRange;
pub use partial_volume::PartialVolumeDescriptor;
pub use plugin::{PluginBinds, PluginDefinition};
