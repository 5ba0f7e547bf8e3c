//! One complete container run: create, attach, start, poll until exit,
//! remove, return output.
//!
//! The runner never asks the engine to auto-remove. It removes the
//! container only after it has itself observed the `exited` state, so a
//! container removed by someone else surfaces as
//! [`ContainerError::Disappeared`] instead of a silent success.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};

use crate::engine::{ContainerEngine, ContainerSpec, ContainerStatus, OutputCapture};
use crate::error::ContainerError;

/// Default interval between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// How long to wait for output streams to drain after exit.
const OUTPUT_GRACE: Duration = Duration::from_secs(5);

/// Ordered lifecycle callbacks for one run.
///
/// Callbacks fire in lifecycle order: `created`, `started`, then either
/// `exited` or `timeout`, then `removed` if removal succeeded.
pub trait RunObserver: Send + Sync {
    fn on_created(&self, _container_id: &str) {}
    fn on_started(&self, _container_id: &str) {}
    fn on_exited(&self, _container_id: &str, _exit_code: i64) {}
    fn on_timeout(&self, _container_id: &str) {}
    fn on_removed(&self, _container_id: &str) {}
}

struct NoopObserver;

impl RunObserver for NoopObserver {}

/// Per-run options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Hard limit measured from container creation. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl RunOptions {
    pub fn with_timeout(timeout: Option<Duration>) -> Self {
        Self { timeout }
    }
}

enum WaitError {
    TimedOut,
    /// Still `created` but the attached client has exited with this code.
    NeverStarted(i64),
    Engine(ContainerError),
}

/// Drives containers through their lifecycle on a [`ContainerEngine`].
#[derive(Clone)]
pub struct ContainerRunner {
    engine: Arc<dyn ContainerEngine>,
    poll_interval: Duration,
}

impl ContainerRunner {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            engine,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run a container to completion and return its combined output.
    pub async fn run(
        &self,
        spec: &ContainerSpec,
        options: RunOptions,
    ) -> Result<String, ContainerError> {
        self.run_observed(spec, options, &NoopObserver).await
    }

    /// [`run`](Self::run) with lifecycle callbacks.
    ///
    /// The exit code is reported to the observer but does not affect the
    /// result: callers judge success by the container's output files.
    pub async fn run_observed(
        &self,
        spec: &ContainerSpec,
        options: RunOptions,
        observer: &dyn RunObserver,
    ) -> Result<String, ContainerError> {
        let deadline = options.timeout.map(|t| Instant::now() + t);

        let id = self.engine.create(spec).await?;
        observer.on_created(&id);

        let mut capture = match self.engine.start(&id).await {
            Ok(capture) => capture,
            Err(e) => {
                self.force_cleanup(&id, observer).await;
                return Err(e);
            }
        };
        observer.on_started(&id);

        match self.await_exit(&id, deadline, &mut capture).await {
            Ok(exit_code) => {
                observer.on_exited(&id, exit_code);
                tracing::debug!(container_id = %id, exit_code, "Container exited");
                let output = capture.collect(OUTPUT_GRACE).await;
                match self.engine.remove(&id, false).await {
                    Ok(()) => observer.on_removed(&id),
                    Err(e) if e.is_unavailable() => return Err(e),
                    Err(e) => {
                        tracing::warn!(container_id = %id, error = %e, "Failed to remove container");
                    }
                }
                Ok(output)
            }
            Err(WaitError::TimedOut) => {
                capture.abort();
                observer.on_timeout(&id);
                let limit = options.timeout.unwrap_or_default();
                tracing::warn!(container_id = %id, image = %spec.image, ?limit, "Container timed out");
                self.force_cleanup(&id, observer).await;
                Err(ContainerError::Timeout {
                    container_id: id,
                    limit,
                })
            }
            Err(WaitError::NeverStarted(code)) => {
                let output = capture.collect(OUTPUT_GRACE).await;
                let message = match output.trim() {
                    "" => format!("attached client exited with code {code}"),
                    output => output.to_string(),
                };
                tracing::warn!(container_id = %id, image = %spec.image, %message, "Container failed to start");
                self.force_cleanup(&id, observer).await;
                Err(ContainerError::StartFailed {
                    container_id: id,
                    message,
                })
            }
            Err(WaitError::Engine(e)) => {
                capture.abort();
                if !matches!(e, ContainerError::Disappeared(_)) {
                    self.force_cleanup(&id, observer).await;
                }
                Err(e)
            }
        }
    }

    /// Poll until the container exits, vanishes, fails to start or the
    /// deadline passes.
    ///
    /// Each sleep ends at the next tick or the deadline, whichever is
    /// first, so expiry is detected within one tick of the limit.
    async fn await_exit(
        &self,
        id: &str,
        deadline: Option<Instant>,
        capture: &mut OutputCapture,
    ) -> Result<i64, WaitError> {
        loop {
            match self.engine.inspect(id).await.map_err(WaitError::Engine)? {
                None => {
                    return Err(WaitError::Engine(ContainerError::Disappeared(id.to_string())))
                }
                Some(ContainerStatus::Exited { code }) => return Ok(code),
                Some(ContainerStatus::Failed { error }) => {
                    return Err(WaitError::Engine(ContainerError::StartFailed {
                        container_id: id.to_string(),
                        message: error,
                    }))
                }
                Some(ContainerStatus::Created) => {
                    if let Some(code) = capture.attach_exit_code().filter(|c| *c != 0) {
                        return Err(WaitError::NeverStarted(code));
                    }
                }
                Some(_) => {}
            }

            let now = Instant::now();
            let next_tick = now + self.poll_interval;
            match deadline {
                Some(deadline) if now >= deadline => return Err(WaitError::TimedOut),
                Some(deadline) => sleep_until(next_tick.min(deadline)).await,
                None => sleep_until(next_tick).await,
            }
        }
    }

    /// Stop then force-remove. Secondary errors are logged and swallowed.
    async fn force_cleanup(&self, id: &str, observer: &dyn RunObserver) {
        if let Err(e) = self.engine.stop(id).await {
            tracing::warn!(container_id = %id, error = %e, "Failed to stop container during cleanup");
        }
        match self.engine.remove(id, true).await {
            Ok(()) => observer.on_removed(id),
            Err(e) => {
                tracing::warn!(container_id = %id, error = %e, "Failed to remove container during cleanup");
            }
        }
    }
}
