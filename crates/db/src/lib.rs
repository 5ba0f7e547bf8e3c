//! PostgreSQL persistence for the CIRCUS compute daemon.
//!
//! Hosts the durable job queue, the plugin catalog and the job status
//! table. Repositories follow one pattern: a unit struct with associated
//! async functions taking `&PgPool`, plus a thin adapter implementing the
//! matching `circus-core` trait so the daemon can hold it as a trait
//! object.

use sqlx::postgres::PgPoolOptions;

pub mod models;
pub mod repositories;

pub use repositories::{
    PgJobQueue, PgJobReporter, PgPluginCatalog, PluginDefinitionRepo, PluginJobRepo, QueueRepo,
};

pub type DbPool = sqlx::PgPool;

/// Create a connection pool from a database URL.
pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

/// Round-trip a trivial query to verify the pool can reach the server.
pub async fn health_check(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}

/// Apply pending migrations from `db/migrations`.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../db/migrations").run(pool).await
}

/// Whether a sqlx error means the database itself cannot be reached, as
/// opposed to a failing statement.
pub fn is_connection_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}
