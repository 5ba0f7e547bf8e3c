//! Repository for the `plugin_job_queue` table.
//!
//! The claim is a single `UPDATE ... WHERE id = (SELECT ... FOR UPDATE
//! SKIP LOCKED)` statement, so concurrent daemons never claim the same
//! row. Settling is a conditional `DELETE` that only matches rows in the
//! `processing` state.

use std::marker::PhantomData;

use async_trait::async_trait;
use circus_core::queue::{JobQueue, QueueError, QueueFilter, QueueItem, QueueState};
use circus_core::types::DbId;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::PgPool;

use crate::is_connection_error;
use crate::models::queue::QueueRow;

/// Column list for `plugin_job_queue` queries.
const COLUMNS: &str = "id, job_id, state, priority, payload, created_at, updated_at, started_at";

/// Raw queue operations on JSON payloads.
pub struct QueueRepo;

impl QueueRepo {
    /// Insert a new `wait` row. Returns the row id.
    pub async fn insert(
        pool: &PgPool,
        job_id: &str,
        payload: &serde_json::Value,
        priority: i32,
    ) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "INSERT INTO plugin_job_queue (job_id, state, priority, payload) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id",
        )
        .bind(job_id)
        .bind(QueueState::Wait.as_str())
        .bind(priority)
        .bind(payload)
        .fetch_one(pool)
        .await
    }

    /// Atomically claim the highest-priority waiting row.
    ///
    /// Uses `SELECT FOR UPDATE SKIP LOCKED` so that concurrent claimants
    /// skip a row another transaction is already claiming instead of
    /// blocking on it or claiming it twice.
    pub async fn claim_next(pool: &PgPool) -> Result<Option<QueueRow>, sqlx::Error> {
        let query = format!(
            "UPDATE plugin_job_queue \
             SET state = $1, started_at = NOW(), updated_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM plugin_job_queue \
                 WHERE state = $2 \
                 ORDER BY priority DESC, id ASC \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, QueueRow>(&query)
            .bind(QueueState::Processing.as_str())
            .bind(QueueState::Wait.as_str())
            .fetch_optional(pool)
            .await
    }

    /// Delete a `processing` row. Returns `false` if no such row existed.
    pub async fn delete_processing(pool: &PgPool, job_id: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM plugin_job_queue WHERE job_id = $1 AND state = $2")
            .bind(job_id)
            .bind(QueueState::Processing.as_str())
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List rows in claim order, optionally restricted to one state.
    pub async fn list(
        pool: &PgPool,
        state: Option<QueueState>,
    ) -> Result<Vec<QueueRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM plugin_job_queue \
             WHERE ($1::TEXT IS NULL OR state = $1) \
             ORDER BY priority DESC, id ASC"
        );
        sqlx::query_as::<_, QueueRow>(&query)
            .bind(state.map(QueueState::as_str))
            .fetch_all(pool)
            .await
    }
}

fn map_error(err: sqlx::Error) -> QueueError {
    if is_connection_error(&err) {
        QueueError::Unavailable(err.to_string())
    } else {
        QueueError::Storage(err.to_string())
    }
}

/// [`JobQueue`] adapter over [`QueueRepo`] for a typed payload.
pub struct PgJobQueue<P> {
    pool: PgPool,
    _payload: PhantomData<fn() -> P>,
}

impl<P> PgJobQueue<P> {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<P> JobQueue<P> for PgJobQueue<P>
where
    P: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn enqueue(&self, job_id: &str, payload: P, priority: i32) -> Result<DbId, QueueError> {
        let json = serde_json::to_value(&payload)
            .map_err(|e| QueueError::Storage(format!("Failed to encode payload: {e}")))?;

        match QueueRepo::insert(&self.pool, job_id, &json, priority).await {
            Ok(id) => {
                tracing::debug!(job_id, priority, id, "Job enqueued");
                Ok(id)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(QueueError::DuplicateJobId(job_id.to_string()))
            }
            Err(e) => Err(map_error(e)),
        }
    }

    async fn dequeue(&self) -> Result<Option<QueueItem<P>>, QueueError> {
        let row = QueueRepo::claim_next(&self.pool).await.map_err(map_error)?;
        row.map(QueueRow::into_item::<P>).transpose()
    }

    async fn settle(&self, job_id: &str) -> Result<(), QueueError> {
        if QueueRepo::delete_processing(&self.pool, job_id)
            .await
            .map_err(map_error)?
        {
            Ok(())
        } else {
            Err(QueueError::NotStarted(job_id.to_string()))
        }
    }

    async fn list(&self, filter: QueueFilter) -> Result<Vec<QueueItem<P>>, QueueError> {
        QueueRepo::list(&self.pool, filter.state())
            .await
            .map_err(map_error)?
            .into_iter()
            .map(QueueRow::into_item::<P>)
            .collect()
    }
}
