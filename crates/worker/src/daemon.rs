//! The dequeue / execute / settle loop.
//!
//! State machine: `Running -> Stopping -> Stopped`. One job is processed
//! at a time. Shutdown cancels the inter-poll wait; an in-flight job runs
//! to completion and is settled before the loop exits, then the dispose
//! callback runs exactly once.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use circus_core::job::PluginJobRequest;
use circus_core::queue::{JobQueue, QueueError};
use circus_pipeline::{JobExecutor, PipelineError};
use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::timer::CancellableTimer;

/// Default wait between polls of an empty queue.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle of a [`DaemonLoop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Running,
    Stopping,
    Stopped,
}

/// Errors escaping one loop iteration.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("Failed to dequeue: {0}")]
    Queue(#[source] QueueError),

    #[error("Failed to settle job {job_id}: {source}")]
    Settle { job_id: String, source: QueueError },

    #[error("Job {job_id} failed: {source}")]
    Pipeline { job_id: String, source: PipelineError },

    #[error("Job {job_id} panicked: {message}")]
    Panicked { job_id: String, message: String },
}

impl DaemonError {
    /// Whether the loop must stop instead of moving on to the next job.
    ///
    /// Settle failures always stop the loop: a job that cannot be settled
    /// would otherwise stay claimed forever.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Queue(e) => e.is_unavailable(),
            Self::Settle { .. } => true,
            Self::Pipeline { source, .. } => source.is_fatal(),
            Self::Panicked { .. } => false,
        }
    }
}

/// Callback run once after the loop has stopped.
pub type DisposeFn = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send + Sync>;

/// Remote control for a running [`DaemonLoop`].
#[derive(Clone)]
pub struct DaemonHandle {
    timer: CancellableTimer,
    state: Arc<watch::Sender<DaemonState>>,
}

impl DaemonHandle {
    /// Request a graceful stop. Idempotent.
    pub fn shutdown(&self) {
        let changed = self.state.send_if_modified(|state| {
            if *state == DaemonState::Running {
                *state = DaemonState::Stopping;
                true
            } else {
                false
            }
        });
        if changed {
            tracing::info!("Daemon stopping");
        }
        self.timer.cancel();
    }

    pub fn state(&self) -> DaemonState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<DaemonState> {
        self.state.subscribe()
    }
}

enum Step {
    Processed,
    Idle,
}

/// Polls the queue and runs each claimed job.
pub struct DaemonLoop {
    queue: Arc<dyn JobQueue<PluginJobRequest>>,
    executor: Arc<dyn JobExecutor>,
    poll_interval: Duration,
    timer: CancellableTimer,
    state: Arc<watch::Sender<DaemonState>>,
    on_dispose: Option<DisposeFn>,
}

impl DaemonLoop {
    pub fn new(
        queue: Arc<dyn JobQueue<PluginJobRequest>>,
        executor: Arc<dyn JobExecutor>,
    ) -> Self {
        let (state, _) = watch::channel(DaemonState::Running);
        Self {
            queue,
            executor,
            poll_interval: DEFAULT_POLL_INTERVAL,
            timer: CancellableTimer::new(CancellationToken::new()),
            state: Arc::new(state),
            on_dispose: None,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Register the callback that releases persistent resources (database
    /// pool, engine connections) once the loop has stopped.
    pub fn on_dispose<F, Fut>(mut self, dispose: F) -> Self
    where
        F: FnOnce() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.on_dispose = Some(Box::new(move || dispose().boxed()));
        self
    }

    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            timer: self.timer.clone(),
            state: Arc::clone(&self.state),
        }
    }

    fn is_running(&self) -> bool {
        *self.state.borrow() == DaemonState::Running && !self.timer.is_cancelled()
    }

    /// Run until shut down or until a fatal error.
    pub async fn run(mut self) -> Result<(), DaemonError> {
        tracing::info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Daemon started",
        );

        let mut idle = false;
        let result = loop {
            if !self.is_running() {
                break Ok(());
            }
            match self.iteration(&mut idle).await {
                Ok(Step::Processed) => {}
                Ok(Step::Idle) => {
                    self.timer.wait(self.poll_interval).await;
                }
                Err(e) if e.is_fatal() => {
                    tracing::error!(error = %e, "Fatal error, daemon terminating");
                    break Err(e);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Daemon iteration failed");
                    self.timer.wait(self.poll_interval).await;
                }
            }
        };

        self.state.send_replace(DaemonState::Stopping);
        if let Some(dispose) = self.on_dispose.take() {
            dispose().await;
        }
        self.state.send_replace(DaemonState::Stopped);
        tracing::info!("Daemon stopped");
        result
    }

    async fn iteration(&self, idle: &mut bool) -> Result<Step, DaemonError> {
        let item = match self.queue.dequeue().await {
            Ok(Some(item)) => item,
            Ok(None) => {
                if !*idle {
                    tracing::info!("Queue is empty, waiting for jobs");
                    *idle = true;
                }
                return Ok(Step::Idle);
            }
            Err(QueueError::Payload { job_id, message }) => {
                // Claimed but undecodable: release it so it is not stuck.
                *idle = false;
                tracing::error!(%job_id, error = %message, "Discarding job with undecodable payload");
                self.settle(&job_id).await?;
                return Ok(Step::Processed);
            }
            Err(e) => return Err(DaemonError::Queue(e)),
        };
        *idle = false;

        let job_id = item.job_id;
        tracing::info!(
            %job_id,
            plugin_id = %item.payload.plugin_id,
            priority = item.priority,
            "Job claimed",
        );

        let outcome = AssertUnwindSafe(self.executor.execute(&job_id, &item.payload))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(true)) => {
                tracing::info!(%job_id, "Job succeeded");
                None
            }
            Ok(Ok(false)) => {
                tracing::info!(%job_id, "Job failed and was reported");
                None
            }
            Ok(Err(source)) => Some(DaemonError::Pipeline {
                job_id: job_id.clone(),
                source,
            }),
            Err(panic) => Some(DaemonError::Panicked {
                job_id: job_id.clone(),
                message: panic_message(panic.as_ref()),
            }),
        };

        self.settle(&job_id).await?;
        match failure {
            Some(e) => Err(e),
            None => Ok(Step::Processed),
        }
    }

    async fn settle(&self, job_id: &str) -> Result<(), DaemonError> {
        self.queue
            .settle(job_id)
            .await
            .map_err(|source| DaemonError::Settle {
                job_id: job_id.to_string(),
                source,
            })?;
        tracing::info!(job_id, "Job settled");
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settle_failures_are_always_fatal() {
        let err = DaemonError::Settle {
            job_id: "j".into(),
            source: QueueError::NotStarted("j".into()),
        };
        assert!(err.is_fatal());
    }

    #[test]
    fn only_unreachable_queues_are_fatal() {
        assert!(DaemonError::Queue(QueueError::Unavailable("down".into())).is_fatal());
        assert!(!DaemonError::Queue(QueueError::Storage("syntax".into())).is_fatal());
    }

    #[test]
    fn panics_are_not_fatal() {
        let err = DaemonError::Panicked {
            job_id: "j".into(),
            message: "boom".into(),
        };
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "Job j panicked: boom");
    }

    #[test]
    fn panic_payloads_are_rendered() {
        let boxed: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(boxed.as_ref()), "static str");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "non-string panic payload");
    }
}
