//! Compile-time registry of collaborator implementations.
//!
//! Every pluggable piece of the daemon is picked by a configuration key
//! that maps onto one variant below; [`Collaborators::build`] turns the
//! selection into trait objects.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use circus_core::dicom::{DicomRepository, FileDicomRepository, MemoryDicomRepository};
use circus_core::job::PluginJobRequest;
use circus_core::plugin::{CatalogError, PluginCatalog, StaticPluginCatalog};
use circus_core::queue::{JobQueue, MemoryQueue};
use circus_core::report::{FanoutReporter, JobReporter};
use circus_db::{DbPool, PgJobQueue, PgJobReporter, PgPluginCatalog};
use circus_events::{EventBus, EventLogger, EventReporter};
use circus_pipeline::JobRegisterer;
use tokio::task::JoinHandle;

use crate::config::WorkerConfig;

/// Broadcast capacity of the in-process event bus.
const EVENT_BUS_CAPACITY: usize = 256;

macro_rules! named_choice {
    ($name:ident, $what:literal, { $($variant:ident => $key:literal),+ $(,)? }) => {
        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($key => Ok(Self::$variant),)+
                    other => Err(format!(
                        concat!("unknown ", $what, " '{}', expected one of: {}"),
                        other,
                        [$($key),+].join(", "),
                    )),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self {
                    $(Self::$variant => $key,)+
                })
            }
        }
    };
}

/// Where the job queue lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueBackend {
    Postgres,
    /// Process-local; jobs are lost on exit. Only a registerer from
    /// [`Collaborators::registerer`] in the same process can fill it, so
    /// this is for tests and embedding, not for the standalone daemon.
    Memory,
}

/// Source of plugin definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginCatalogKind {
    Postgres,
    /// JSON array read once at startup.
    File,
}

/// Where DICOM series are fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DicomRepositoryKind {
    File,
    /// Starts empty; every series lookup fails. Tests and dry runs only.
    Memory,
}

/// Where job status changes are sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterKind {
    Database,
    Events,
    Both,
}

impl ReporterKind {
    pub fn uses_database(self) -> bool {
        matches!(self, Self::Database | Self::Both)
    }

    pub fn uses_events(self) -> bool {
        matches!(self, Self::Events | Self::Both)
    }
}

named_choice!(QueueBackend, "queue backend", { Postgres => "postgres", Memory => "memory" });
named_choice!(PluginCatalogKind, "plugin catalog", { Postgres => "postgres", File => "file" });
named_choice!(DicomRepositoryKind, "DICOM repository", { File => "file", Memory => "memory" });
named_choice!(ReporterKind, "job reporter", {
    Database => "database",
    Events => "events",
    Both => "both",
});

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("DATABASE_URL must be set for the postgres-backed collaborators")]
    MissingDatabaseUrl,

    #[error("Failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    #[error("Database health check failed: {0}")]
    HealthCheck(#[source] sqlx::Error),

    #[error("Failed to run migrations: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Failed to load plugin definitions: {0}")]
    Catalog(#[from] CatalogError),
}

/// The trait objects one daemon runs with.
pub struct Collaborators {
    pub queue: Arc<dyn JobQueue<PluginJobRequest>>,
    pub plugins: Arc<dyn PluginCatalog>,
    pub dicom: Arc<dyn DicomRepository>,
    pub reporter: Arc<dyn JobReporter>,
    /// Present when any collaborator is postgres-backed.
    pub pool: Option<DbPool>,
    pub event_bus: Option<Arc<EventBus>>,
    event_logger: Option<JoinHandle<u64>>,
}

impl Collaborators {
    /// Instantiate the collaborators selected by `config`.
    ///
    /// When PostgreSQL is involved the pool is health-checked and pending
    /// migrations are applied before anything else is built.
    pub async fn build(config: &WorkerConfig) -> Result<Self, RegistryError> {
        let needs_database = config.queue_backend == QueueBackend::Postgres
            || config.plugin_catalog == PluginCatalogKind::Postgres
            || config.reporter.uses_database();

        let pool = if needs_database {
            let url = config
                .database_url
                .as_deref()
                .ok_or(RegistryError::MissingDatabaseUrl)?;
            let pool = circus_db::create_pool(url, config.database_max_connections)
                .await
                .map_err(RegistryError::Connect)?;
            circus_db::health_check(&pool)
                .await
                .map_err(RegistryError::HealthCheck)?;
            tracing::info!("Database connection established");
            circus_db::run_migrations(&pool).await?;
            tracing::info!("Database migrations applied");
            Some(pool)
        } else {
            None
        };

        let queue: Arc<dyn JobQueue<PluginJobRequest>> = match (config.queue_backend, &pool) {
            (QueueBackend::Postgres, Some(pool)) => {
                Arc::new(PgJobQueue::<PluginJobRequest>::new(pool.clone()))
            }
            (QueueBackend::Postgres, None) => return Err(RegistryError::MissingDatabaseUrl),
            (QueueBackend::Memory, _) => Arc::new(MemoryQueue::<PluginJobRequest>::new()),
        };

        let plugins: Arc<dyn PluginCatalog> = match (config.plugin_catalog, &pool) {
            (PluginCatalogKind::Postgres, Some(pool)) => Arc::new(PgPluginCatalog::new(pool.clone())),
            (PluginCatalogKind::Postgres, None) => return Err(RegistryError::MissingDatabaseUrl),
            (PluginCatalogKind::File, _) => {
                Arc::new(StaticPluginCatalog::load_json(&config.plugin_definitions_file).await?)
            }
        };

        let dicom: Arc<dyn DicomRepository> = match config.dicom_repository {
            DicomRepositoryKind::File => Arc::new(FileDicomRepository::new(&config.dicom_data_dir)),
            DicomRepositoryKind::Memory => Arc::new(MemoryDicomRepository::new()),
        };

        let mut reporters: Vec<Arc<dyn JobReporter>> = Vec::new();
        if config.reporter.uses_database() {
            let pool = pool.as_ref().ok_or(RegistryError::MissingDatabaseUrl)?;
            reporters.push(Arc::new(PgJobReporter::new(pool.clone())));
        }
        let (event_bus, event_logger) = if config.reporter.uses_events() {
            let bus = Arc::new(EventBus::new(EVENT_BUS_CAPACITY));
            reporters.push(Arc::new(EventReporter::new(Arc::clone(&bus))));
            let logger = tokio::spawn(EventLogger::run(bus.subscribe()));
            (Some(bus), Some(logger))
        } else {
            (None, None)
        };
        let reporter: Arc<dyn JobReporter> = if reporters.len() == 1 {
            reporters.remove(0)
        } else {
            Arc::new(FanoutReporter::new(reporters))
        };

        if config.queue_backend == QueueBackend::Memory {
            tracing::warn!("Memory queue selected; only this process can enqueue jobs and they are lost on exit");
        }
        if config.dicom_repository == DicomRepositoryKind::Memory {
            tracing::warn!("Memory DICOM repository selected; it holds no series, so every job will fail stage-in");
        }

        tracing::info!(
            queue = %config.queue_backend,
            plugins = %config.plugin_catalog,
            dicom = %config.dicom_repository,
            reporter = %config.reporter,
            "Collaborators ready",
        );

        Ok(Self {
            queue,
            plugins,
            dicom,
            reporter,
            pool,
            event_bus,
            event_logger,
        })
    }

    /// A registerer writing into this daemon's queue.
    pub fn registerer(&self) -> JobRegisterer {
        JobRegisterer::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.plugins),
            Arc::clone(&self.dicom),
        )
    }

    /// Release persistent resources: close the pool and stop the event
    /// logger.
    pub async fn dispose(pool: Option<DbPool>, event_logger: Option<JoinHandle<u64>>) {
        if let Some(pool) = pool {
            pool.close().await;
            tracing::info!("Database pool closed");
        }
        if let Some(logger) = event_logger {
            logger.abort();
        }
    }

    /// Hand out what [`Collaborators::dispose`] needs, for use in a
    /// dispose callback.
    pub fn take_disposables(&mut self) -> (Option<DbPool>, Option<JoinHandle<u64>>) {
        (self.pool.clone(), self.event_logger.take())
    }
}
