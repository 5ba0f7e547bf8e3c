use std::path::PathBuf;
use std::time::Duration;

/// Image used to convert staged DICOM files into raw volumes.
pub const DEFAULT_VOLUME_BUILDER_IMAGE: &str = "circuscs/dicom_voxel_dump:1.0";

/// Default time limit for one volume-builder run.
pub const DEFAULT_VOLUME_BUILDER_TIMEOUT: Duration = Duration::from_secs(600);

/// Resolved settings for [`JobPipeline`](crate::JobPipeline).
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Parent of the job-scoped working trees.
    pub working_dir: PathBuf,
    /// Parent of the permanent per-job result directories.
    pub results_dir: PathBuf,
    pub volume_builder_image: String,
    pub volume_builder_timeout: Option<Duration>,
    /// Delete the working tree once the job has concluded.
    pub remove_temporary_dir: bool,
    /// Run containers as the daemon's own uid/gid instead of the image user.
    pub run_as_host_user: bool,
}

impl PipelineConfig {
    pub fn new(working_dir: impl Into<PathBuf>, results_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            results_dir: results_dir.into(),
            volume_builder_image: DEFAULT_VOLUME_BUILDER_IMAGE.to_string(),
            volume_builder_timeout: Some(DEFAULT_VOLUME_BUILDER_TIMEOUT),
            remove_temporary_dir: true,
            run_as_host_user: true,
        }
    }

    /// `uid:gid` for container processes, if configured to use it.
    pub fn container_user(&self) -> Option<String> {
        if self.run_as_host_user {
            circus_container::host_user()
        } else {
            None
        }
    }
}
