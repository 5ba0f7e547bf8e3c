use std::time::Duration;

use circus_container::ContainerError;
use circus_core::dicom::RepositoryError;
use circus_core::plugin::CatalogError;
use circus_core::report::ReportError;

/// Errors raised while running one job.
///
/// Everything except [`is_fatal`](Self::is_fatal) errors ends the job with
/// a `failed` report; fatal errors additionally stop the daemon.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("No such plugin installed: {0}")]
    PluginNotFound(String),

    #[error("Failed to stage input: {0}")]
    Staging(String),

    #[error("Volume build failed for series {series_uid}: {message}")]
    VolumeBuild { series_uid: String, message: String },

    #[error("Plugin execution failed: {0}")]
    Execution(String),

    /// A container exceeded its time limit.
    #[error("The {stage} timed out after {} seconds", limit.as_secs())]
    Timeout { stage: &'static str, limit: Duration },

    #[error("Invalid results: {0}")]
    ResultValidation(String),

    #[error("Failed to archive results: {0}")]
    Archive(String),

    #[error("Failed to report job status: {0}")]
    Report(#[from] ReportError),

    /// A backing service is unreachable.
    #[error("Service unavailable: {0}")]
    Fatal(String),
}

impl PipelineError {
    /// Whether the error means a backing service is gone, so continuing to
    /// pull jobs would only fail the same way.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Fatal(_) => true,
            Self::Report(e) => e.is_unavailable(),
            _ => false,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Map a container failure during `stage` ("plugin" or "volume builder").
    pub(crate) fn from_container(
        stage: &'static str,
        series_uid: Option<&str>,
        err: ContainerError,
    ) -> Self {
        match err {
            ContainerError::Timeout { limit, .. } => Self::Timeout { stage, limit },
            e if e.is_unavailable() => Self::Fatal(e.to_string()),
            e => match series_uid {
                Some(uid) => Self::VolumeBuild {
                    series_uid: uid.to_string(),
                    message: e.to_string(),
                },
                None => Self::Execution(e.to_string()),
            },
        }
    }
}

impl From<RepositoryError> for PipelineError {
    fn from(err: RepositoryError) -> Self {
        if err.is_unavailable() {
            Self::Fatal(err.to_string())
        } else {
            Self::Staging(err.to_string())
        }
    }
}

impl From<CatalogError> for PipelineError {
    fn from(err: CatalogError) -> Self {
        if err.is_unavailable() {
            Self::Fatal(err.to_string())
        } else {
            Self::Execution(err.to_string())
        }
    }
}
