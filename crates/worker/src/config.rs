use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use circus_pipeline::config::{DEFAULT_VOLUME_BUILDER_IMAGE, DEFAULT_VOLUME_BUILDER_TIMEOUT};
use circus_pipeline::PipelineConfig;

use crate::registry::{DicomRepositoryKind, PluginCatalogKind, QueueBackend, ReporterKind};

/// A configuration value that could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}', expected pretty or json")),
        }
    }
}

/// Daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue_backend: QueueBackend,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub plugin_catalog: PluginCatalogKind,
    pub plugin_definitions_file: PathBuf,
    pub dicom_repository: DicomRepositoryKind,
    pub dicom_data_dir: PathBuf,
    pub reporter: ReporterKind,
    /// Passed to the CLI as `-H`; `None` keeps the engine default.
    pub docker_host: Option<String>,
    pub docker_bin: String,
    pub working_dir: PathBuf,
    pub results_dir: PathBuf,
    pub volume_builder_image: String,
    pub volume_builder_timeout: Duration,
    pub remove_temporary_dir: bool,
    pub run_as_host_user: bool,
    pub poll_interval: Duration,
    pub container_poll_interval: Duration,
    pub log_format: LogFormat,
}

impl WorkerConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                       | Default                          |
    /// |-------------------------------|----------------------------------|
    /// | `QUEUE_BACKEND`               | `postgres`                       |
    /// | `DATABASE_URL`                | required when postgres is used   |
    /// | `DATABASE_MAX_CONNECTIONS`    | `5`                              |
    /// | `PLUGIN_CATALOG`              | `postgres`                       |
    /// | `PLUGIN_DEFINITIONS_FILE`     | `plugins.json`                   |
    /// | `DICOM_REPOSITORY`            | `file`                           |
    /// | `DICOM_DATA_DIR`              | `/var/circus/dicom`              |
    /// | `JOB_REPORTER`                | `database`                       |
    /// | `DOCKER_HOST`                 | engine default                   |
    /// | `DOCKER_BIN`                  | `docker`                         |
    /// | `WORKING_DIR`                 | `/var/circus/work`               |
    /// | `RESULTS_DIR`                 | `/var/circus/results`            |
    /// | `VOLUME_BUILDER_IMAGE`        | `circuscs/dicom_voxel_dump:1.0`  |
    /// | `VOLUME_BUILDER_TIMEOUT_SECS` | `600`                            |
    /// | `REMOVE_TEMPORARY_DIR`        | `true`                           |
    /// | `RUN_AS_HOST_USER`            | `true`                           |
    /// | `POLL_INTERVAL_MS`            | `1000`                           |
    /// | `CONTAINER_POLL_MS`           | `500`                            |
    /// | `LOG_FORMAT`                  | `pretty`                         |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup: &lookup };

        let queue_backend = env.parsed("QUEUE_BACKEND", QueueBackend::Postgres)?;
        let plugin_catalog = env.parsed("PLUGIN_CATALOG", PluginCatalogKind::Postgres)?;
        let reporter = env.parsed("JOB_REPORTER", ReporterKind::Database)?;

        let needs_database = queue_backend == QueueBackend::Postgres
            || plugin_catalog == PluginCatalogKind::Postgres
            || reporter.uses_database();
        let database_url = env.string("DATABASE_URL");
        if needs_database && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let volume_builder_timeout_secs = env.parsed(
            "VOLUME_BUILDER_TIMEOUT_SECS",
            DEFAULT_VOLUME_BUILDER_TIMEOUT.as_secs(),
        )?;
        let poll_interval_ms: u64 = env.parsed("POLL_INTERVAL_MS", 1000)?;
        let container_poll_ms: u64 = env.parsed("CONTAINER_POLL_MS", 500)?;
        for (key, value) in [
            ("POLL_INTERVAL_MS", poll_interval_ms),
            ("CONTAINER_POLL_MS", container_poll_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key,
                    value: "0".into(),
                    reason: "must be greater than zero".into(),
                });
            }
        }

        Ok(Self {
            queue_backend,
            database_url,
            database_max_connections: env.parsed("DATABASE_MAX_CONNECTIONS", 5)?,
            plugin_catalog,
            plugin_definitions_file: env.path("PLUGIN_DEFINITIONS_FILE", "plugins.json"),
            dicom_repository: env.parsed("DICOM_REPOSITORY", DicomRepositoryKind::File)?,
            dicom_data_dir: env.path("DICOM_DATA_DIR", "/var/circus/dicom"),
            reporter,
            docker_host: env.string("DOCKER_HOST"),
            docker_bin: env.string("DOCKER_BIN").unwrap_or_else(|| "docker".into()),
            working_dir: env.path("WORKING_DIR", "/var/circus/work"),
            results_dir: env.path("RESULTS_DIR", "/var/circus/results"),
            volume_builder_image: env
                .string("VOLUME_BUILDER_IMAGE")
                .unwrap_or_else(|| DEFAULT_VOLUME_BUILDER_IMAGE.into()),
            volume_builder_timeout: Duration::from_secs(volume_builder_timeout_secs),
            remove_temporary_dir: env.flag("REMOVE_TEMPORARY_DIR", true)?,
            run_as_host_user: env.flag("RUN_AS_HOST_USER", true)?,
            poll_interval: Duration::from_millis(poll_interval_ms),
            container_poll_interval: Duration::from_millis(container_poll_ms),
            log_format: env.parsed("LOG_FORMAT", LogFormat::Pretty)?,
        })
    }

    /// Settings handed to the job pipeline.
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            working_dir: self.working_dir.clone(),
            results_dir: self.results_dir.clone(),
            volume_builder_image: self.volume_builder_image.clone(),
            volume_builder_timeout: Some(self.volume_builder_timeout),
            remove_temporary_dir: self.remove_temporary_dir,
            run_as_host_user: self.run_as_host_user,
        }
    }
}

struct Env<'a, F> {
    lookup: &'a F,
}

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed, non-empty value.
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn path(&self, key: &str, default: &str) -> PathBuf {
        PathBuf::from(self.string(key).unwrap_or_else(|| default.to_string()))
    }

    fn parsed<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn flag(&self, key: &'static str, default: bool) -> Result<bool, ConfigError> {
        match self.string(key) {
            None => Ok(default),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" => Ok(false),
                _ => Err(ConfigError::Invalid {
                    key,
                    value,
                    reason: "expected a boolean".into(),
                }),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<WorkerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_need_a_database_url() {
        let err = load(&[]).unwrap_err();
        assert_matches!(err, ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn defaults_are_applied() {
        let config = load(&[("DATABASE_URL", "postgres://localhost/circus")]).unwrap();

        assert_eq!(config.queue_backend, QueueBackend::Postgres);
        assert_eq!(config.plugin_catalog, PluginCatalogKind::Postgres);
        assert_eq!(config.dicom_repository, DicomRepositoryKind::File);
        assert_eq!(config.reporter, ReporterKind::Database);
        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.docker_bin, "docker");
        assert_eq!(config.docker_host, None);
        assert_eq!(config.working_dir, PathBuf::from("/var/circus/work"));
        assert_eq!(config.volume_builder_image, "circuscs/dicom_voxel_dump:1.0");
        assert_eq!(config.volume_builder_timeout, Duration::from_secs(600));
        assert!(config.remove_temporary_dir);
        assert_eq!(config.poll_interval, Duration::from_millis(1000));
        assert_eq!(config.container_poll_interval, Duration::from_millis(500));
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn memory_setup_runs_without_database() {
        let config = load(&[
            ("QUEUE_BACKEND", "memory"),
            ("PLUGIN_CATALOG", "file"),
            ("DICOM_REPOSITORY", "memory"),
            ("JOB_REPORTER", "events"),
            ("LOG_FORMAT", "JSON"),
            ("REMOVE_TEMPORARY_DIR", "false"),
            ("POLL_INTERVAL_MS", "250"),
        ])
        .unwrap();

        assert_eq!(config.queue_backend, QueueBackend::Memory);
        assert_eq!(config.database_url, None);
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(!config.remove_temporary_dir);
        assert_eq!(config.poll_interval, Duration::from_millis(250));

        let pipeline = config.pipeline();
        assert!(!pipeline.remove_temporary_dir);
        assert_eq!(pipeline.volume_builder_timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn database_reporter_still_needs_url() {
        let err = load(&[
            ("QUEUE_BACKEND", "memory"),
            ("PLUGIN_CATALOG", "file"),
            ("JOB_REPORTER", "both"),
        ])
        .unwrap_err();
        assert_matches!(err, ConfigError::Missing("DATABASE_URL"));
    }

    #[test]
    fn unknown_backend_is_rejected() {
        let err = load(&[("QUEUE_BACKEND", "redis")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { key: "QUEUE_BACKEND", .. });
        assert!(err.to_string().contains("redis"));
    }

    #[test]
    fn malformed_numbers_and_flags_are_rejected() {
        let base = [("DATABASE_URL", "postgres://x")];

        let err = load(&[base[0], ("POLL_INTERVAL_MS", "soon")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { key: "POLL_INTERVAL_MS", .. });

        let err = load(&[base[0], ("REMOVE_TEMPORARY_DIR", "maybe")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { key: "REMOVE_TEMPORARY_DIR", .. });

        let err = load(&[base[0], ("CONTAINER_POLL_MS", "0")]).unwrap_err();
        assert_matches!(err, ConfigError::Invalid { key: "CONTAINER_POLL_MS", .. });
    }

    #[test]
    fn zero_daemon_poll_interval_is_rejected() {
        let err = load(&[("DATABASE_URL", "postgres://x"), ("POLL_INTERVAL_MS", "0")]).unwrap_err();
        assert_matches!(
            err,
            ConfigError::Invalid { key: "POLL_INTERVAL_MS", reason, .. } if reason.contains("greater than zero")
        );
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = load(&[("DATABASE_URL", "postgres://x"), ("DOCKER_HOST", "  ")]).unwrap();
        assert_eq!(config.docker_host, None);
    }
}
