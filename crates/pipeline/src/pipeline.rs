//! Runs one claimed job end to end.
//!
//! ```text
//! report processing
//!   -> resolve plugin
//!   -> create <work>/<jobId>/{in,out,dicom}
//!   -> fetch distinct series into dicom/
//!   -> volume builder per series entry -> in/
//!   -> plugin container (in/, out/ bound at the plugin's mount points)
//!   -> out/plugin-log.txt
//!   -> validate out/results.json, report results
//!   -> copy out/ to <results>/<jobId>, report finished
//! cleanup of the working tree (configurable)
//! ```
//!
//! A failure in any stage is reported as `failed` and turns into
//! `Ok(false)`. Only errors meaning a backing service is unreachable are
//! returned as `Err`, so the daemon can stop instead of failing every
//! remaining job the same way.

use std::sync::Arc;

use async_trait::async_trait;
use circus_container::{Bind, ContainerRunner, ContainerSpec, RunOptions};
use circus_core::dicom::DicomRepository;
use circus_core::job::PluginJobRequest;
use circus_core::plugin::{PluginCatalog, PluginDefinition};
use circus_core::report::{JobReport, JobReporter};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::stage_in::{self, JOB_LABEL};
use crate::stage_out::{self, PLUGIN_LOG_FILE};
use crate::workdir::JobDirectory;

/// Executes one job. Implemented by [`JobPipeline`]; the daemon loop only
/// depends on this trait.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Run the job. `Ok(true)` on success, `Ok(false)` on a reported
    /// failure, `Err` only for fatal errors.
    async fn execute(&self, job_id: &str, request: &PluginJobRequest)
        -> Result<bool, PipelineError>;
}

/// The stage-in / execute / stage-out pipeline.
pub struct JobPipeline {
    config: PipelineConfig,
    runner: ContainerRunner,
    plugins: Arc<dyn PluginCatalog>,
    dicom: Arc<dyn DicomRepository>,
    reporter: Arc<dyn JobReporter>,
}

impl JobPipeline {
    pub fn new(
        config: PipelineConfig,
        runner: ContainerRunner,
        plugins: Arc<dyn PluginCatalog>,
        dicom: Arc<dyn DicomRepository>,
        reporter: Arc<dyn JobReporter>,
    ) -> Self {
        Self {
            config,
            runner,
            plugins,
            dicom,
            reporter,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one job and report its outcome.
    pub async fn run(
        &self,
        job_id: &str,
        request: &PluginJobRequest,
    ) -> Result<bool, PipelineError> {
        let outcome = self.process(job_id, request).await;
        match outcome {
            Ok(()) => {
                tracing::info!(job_id, plugin_id = %request.plugin_id, "Job finished");
                Ok(true)
            }
            Err(e) => self.conclude_failed(job_id, e).await,
        }
    }

    /// Report the failure, then decide whether it ends the daemon.
    async fn conclude_failed(&self, job_id: &str, err: PipelineError) -> Result<bool, PipelineError> {
        if err.is_timeout() {
            tracing::warn!(job_id, error = %err, "Job timed out");
        } else {
            tracing::error!(job_id, error = %err, "Job failed");
        }

        let reported = self
            .reporter
            .report(job_id, JobReport::Failed(err.to_string()))
            .await;

        if err.is_fatal() {
            return Err(err);
        }
        match reported {
            Ok(()) => Ok(false),
            Err(e) if e.is_unavailable() => Err(PipelineError::Report(e)),
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Failed to report job failure");
                Ok(false)
            }
        }
    }

    async fn process(&self, job_id: &str, request: &PluginJobRequest) -> Result<(), PipelineError> {
        self.reporter.report(job_id, JobReport::Processing).await?;

        let plugin = self
            .plugins
            .get(&request.plugin_id)
            .await?
            .ok_or_else(|| PipelineError::PluginNotFound(request.plugin_id.clone()))?;

        let dir = JobDirectory::create(&self.config.working_dir, job_id)
            .await
            .map_err(|e| PipelineError::Staging(format!("failed to create working directory: {e}")))?;
        tracing::info!(job_id, path = %dir.root().display(), "Working directory created");

        let result = self.process_in(job_id, request, &plugin, &dir).await;

        if self.config.remove_temporary_dir {
            let path = dir.root().to_path_buf();
            if let Err(e) = dir.remove().await {
                tracing::warn!(job_id, path = %path.display(), error = %e, "Failed to remove working directory");
            }
        }
        result
    }

    async fn process_in(
        &self,
        job_id: &str,
        request: &PluginJobRequest,
        plugin: &PluginDefinition,
        dir: &JobDirectory,
    ) -> Result<(), PipelineError> {
        // Stage-in
        let images = stage_in::fetch_series(self.dicom.as_ref(), request, dir).await?;
        tracing::info!(job_id, images, series = request.series.len(), "DICOM images staged");
        stage_in::build_volumes(&self.runner, &self.config, dir, job_id, request).await?;
        tracing::info!(job_id, volumes = request.series.len(), "Volumes built");

        // Execute
        self.execute_plugin(job_id, plugin, dir).await?;

        // Stage-out
        let results = stage_out::read_results(&dir.out_dir()).await?;
        self.reporter
            .report(job_id, JobReport::Results(results))
            .await?;

        let dest = self.config.results_dir.join(job_id);
        let files = stage_out::copy_tree(&dir.out_dir(), &dest).await?;
        tracing::info!(job_id, files, dest = %dest.display(), "Results archived");

        self.reporter.report(job_id, JobReport::Finished).await?;
        Ok(())
    }

    async fn execute_plugin(
        &self,
        job_id: &str,
        plugin: &PluginDefinition,
        dir: &JobDirectory,
    ) -> Result<(), PipelineError> {
        let binds = plugin.binds();
        let spec = ContainerSpec::new(&plugin.container_image)
            .with_bind(Bind::read_only(dir.in_dir(), binds.input))
            .with_bind(Bind::read_write(dir.out_dir(), binds.output))
            .with_user(self.config.container_user())
            .with_label(JOB_LABEL, job_id);

        tracing::info!(
            job_id,
            plugin_id = %plugin.plugin_id,
            version = %plugin.version,
            image = %plugin.container_image,
            "Running plugin",
        );
        let output = self
            .runner
            .run(&spec, RunOptions::with_timeout(plugin.execution_timeout()))
            .await
            .map_err(|e| PipelineError::from_container("plugin", None, e))?;

        let log_path = dir.out_dir().join(PLUGIN_LOG_FILE);
        tokio::fs::write(&log_path, output)
            .await
            .map_err(|e| PipelineError::Execution(format!("failed to write plugin log: {e}")))?;
        tracing::info!(job_id, "Plugin exited");
        Ok(())
    }
}

#[async_trait]
impl JobExecutor for JobPipeline {
    async fn execute(
        &self,
        job_id: &str,
        request: &PluginJobRequest,
    ) -> Result<bool, PipelineError> {
        self.run(job_id, request).await
    }
}
