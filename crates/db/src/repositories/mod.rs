//! Repository layer: one module per table.

pub mod plugin_job_repo;
pub mod plugin_repo;
pub mod queue_repo;

pub use plugin_job_repo::{PgJobReporter, PluginJobRepo};
pub use plugin_repo::{PgPluginCatalog, PluginDefinitionRepo};
pub use queue_repo::{PgJobQueue, QueueRepo};
