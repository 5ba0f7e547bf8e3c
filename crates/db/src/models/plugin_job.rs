//! Row model for the `plugin_jobs` status table.

use circus_core::types::Timestamp;
use serde::Serialize;
use sqlx::FromRow;

/// Job status values written by the reporter.
pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_FINISHED: &str = "finished";
pub const STATUS_FAILED: &str = "failed";

/// A row from the `plugin_jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PluginJob {
    pub job_id: String,
    pub status: String,
    pub results: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub started_at: Option<Timestamp>,
    pub finished_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
