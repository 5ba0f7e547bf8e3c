//! Row model for the `plugin_job_queue` table.

use circus_core::queue::{QueueError, QueueItem, QueueState};
use circus_core::types::{DbId, Timestamp};
use serde::de::DeserializeOwned;
use sqlx::FromRow;

/// A row from the `plugin_job_queue` table with the payload still in JSON.
#[derive(Debug, Clone, FromRow)]
pub struct QueueRow {
    pub id: DbId,
    pub job_id: String,
    pub state: String,
    pub priority: i32,
    pub payload: serde_json::Value,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
}

impl QueueRow {
    /// Decode the JSON payload into the queue's payload type.
    pub fn into_item<P: DeserializeOwned>(self) -> Result<QueueItem<P>, QueueError> {
        let state: QueueState = self.state.parse()?;
        let payload = serde_json::from_value(self.payload).map_err(|e| QueueError::Payload {
            job_id: self.job_id.clone(),
            message: e.to_string(),
        })?;
        Ok(QueueItem {
            id: self.id,
            job_id: self.job_id,
            priority: self.priority,
            payload,
            state,
            created_at: self.created_at,
            updated_at: self.updated_at,
            started_at: self.started_at,
        })
    }
}
