//! Row types mirroring the database tables.

pub mod plugin;
pub mod plugin_job;
pub mod queue;
