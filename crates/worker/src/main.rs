use std::sync::Arc;

use anyhow::Context;
use circus_container::{ContainerRunner, DockerCli};
use circus_pipeline::JobPipeline;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use circus_worker::signal::spawn_signal_listener;
use circus_worker::{Collaborators, DaemonLoop, LogFormat, WorkerConfig};

const DEFAULT_LOG_FILTER: &str = "circus_worker=info,circus_pipeline=info,circus_container=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    // Read before tracing so LOG_FORMAT can pick the formatter; errors are
    // reported once the subscriber is installed.
    let config = WorkerConfig::from_env();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    let format = config
        .as_ref()
        .map(|c| c.log_format)
        .unwrap_or_default();
    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
    }

    let config = config.context("Invalid configuration")?;
    tracing::info!(
        queue = %config.queue_backend,
        working_dir = %config.working_dir.display(),
        results_dir = %config.results_dir.display(),
        "Loaded worker configuration",
    );

    // --- Collaborators ---
    let mut collaborators = Collaborators::build(&config)
        .await
        .context("Failed to initialise collaborators")?;

    // --- Container engine ---
    let engine = Arc::new(DockerCli::new(&config.docker_bin, config.docker_host.clone()));
    let runner = ContainerRunner::new(engine).with_poll_interval(config.container_poll_interval);

    // --- Pipeline ---
    let pipeline = JobPipeline::new(
        config.pipeline(),
        runner,
        Arc::clone(&collaborators.plugins),
        Arc::clone(&collaborators.dicom),
        Arc::clone(&collaborators.reporter),
    );

    // --- Daemon ---
    let (pool, event_logger) = collaborators.take_disposables();
    let daemon = DaemonLoop::new(Arc::clone(&collaborators.queue), Arc::new(pipeline))
        .with_poll_interval(config.poll_interval)
        .on_dispose(move || Collaborators::dispose(pool, event_logger));

    let signals = spawn_signal_listener(daemon.handle());
    let result = daemon.run().await;
    signals.abort();

    result.context("Daemon terminated on a fatal error")?;
    tracing::info!("Shutdown complete");
    Ok(())
}
