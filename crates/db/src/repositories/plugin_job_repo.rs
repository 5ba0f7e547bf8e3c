//! Repository for the `plugin_jobs` status table.
//!
//! Every write is an upsert keyed by `job_id`, so reports are idempotent
//! and do not depend on a row having been created at registration time.

use async_trait::async_trait;
use circus_core::report::{JobReport, JobReporter, ReportError};
use sqlx::PgPool;

use crate::is_connection_error;
use crate::models::plugin_job::{PluginJob, STATUS_FAILED, STATUS_FINISHED, STATUS_PROCESSING};

/// Column list for `plugin_jobs` queries.
const COLUMNS: &str = "\
    job_id, status, results, error_message, \
    started_at, finished_at, created_at, updated_at";

/// Status updates for plugin jobs.
pub struct PluginJobRepo;

impl PluginJobRepo {
    /// Mark a job as processing and stamp `started_at`.
    pub async fn mark_processing(pool: &PgPool, job_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO plugin_jobs (job_id, status, started_at) \
             VALUES ($1, $2, NOW()) \
             ON CONFLICT (job_id) DO UPDATE SET \
                 status = EXCLUDED.status, started_at = NOW(), \
                 finished_at = NULL, error_message = NULL, updated_at = NOW()",
        )
        .bind(job_id)
        .bind(STATUS_PROCESSING)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Store the parsed results blob without changing the status.
    pub async fn store_results(
        pool: &PgPool,
        job_id: &str,
        results: &serde_json::Value,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO plugin_jobs (job_id, status, results) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (job_id) DO UPDATE SET \
                 results = EXCLUDED.results, updated_at = NOW()",
        )
        .bind(job_id)
        .bind(STATUS_PROCESSING)
        .bind(results)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Mark a job as finished and stamp `finished_at`.
    pub async fn mark_finished(pool: &PgPool, job_id: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO plugin_jobs (job_id, status, finished_at) \
             VALUES ($1, $2, NOW()) \
             ON CONFLICT (job_id) DO UPDATE SET \
                 status = EXCLUDED.status, finished_at = NOW(), updated_at = NOW()",
        )
        .bind(job_id)
        .bind(STATUS_FINISHED)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Mark a job as failed with an error message.
    pub async fn mark_failed(pool: &PgPool, job_id: &str, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO plugin_jobs (job_id, status, error_message, finished_at) \
             VALUES ($1, $2, $3, NOW()) \
             ON CONFLICT (job_id) DO UPDATE SET \
                 status = EXCLUDED.status, error_message = EXCLUDED.error_message, \
                 finished_at = NOW(), updated_at = NOW()",
        )
        .bind(job_id)
        .bind(STATUS_FAILED)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Find a job's status row.
    pub async fn find_by_job_id(
        pool: &PgPool,
        job_id: &str,
    ) -> Result<Option<PluginJob>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM plugin_jobs WHERE job_id = $1");
        sqlx::query_as::<_, PluginJob>(&query)
            .bind(job_id)
            .fetch_optional(pool)
            .await
    }
}

/// [`JobReporter`] writing to the `plugin_jobs` table.
#[derive(Clone)]
pub struct PgJobReporter {
    pool: PgPool,
}

impl PgJobReporter {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobReporter for PgJobReporter {
    async fn report(&self, job_id: &str, report: JobReport) -> Result<(), ReportError> {
        let result = match &report {
            JobReport::Processing => PluginJobRepo::mark_processing(&self.pool, job_id).await,
            JobReport::Results(results) => {
                PluginJobRepo::store_results(&self.pool, job_id, results).await
            }
            JobReport::Finished => PluginJobRepo::mark_finished(&self.pool, job_id).await,
            JobReport::Failed(message) => {
                PluginJobRepo::mark_failed(&self.pool, job_id, message).await
            }
        };
        result.map_err(|e| {
            if is_connection_error(&e) {
                ReportError::Unavailable(e.to_string())
            } else {
                ReportError::Sink(e.to_string())
            }
        })
    }
}
