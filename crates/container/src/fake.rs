//! Scripted in-memory engine for tests.
//!
//! Containers "run" for a configured duration measured on the tokio clock,
//! so tests using a paused clock advance through runs instantly. The
//! behavior closure is invoked when a container starts, which lets tests
//! write files into bind-mounted host directories as the container's work.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::engine::{ContainerEngine, ContainerSpec, ContainerStatus, OutputCapture};
use crate::error::ContainerError;

/// Exit code reported for a container stopped by the runner.
pub const KILLED_EXIT_CODE: i64 = 137;

/// How one fake container behaves once started.
#[derive(Debug, Clone, Default)]
pub struct FakeBehavior {
    pub run_for: Duration,
    pub exit_code: i64,
    pub output: String,
    /// Disappear after `run_for` instead of exiting.
    pub vanishes: bool,
    /// Refuse to start with this error. The container stays `created`.
    pub start_error: Option<String>,
}

/// One recorded engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Create(String),
    Start(String),
    Stop(String),
    Remove { id: String, force: bool },
}

type BehaviorFn = dyn Fn(&ContainerSpec) -> FakeBehavior + Send + Sync;

struct FakeContainer {
    spec: ContainerSpec,
    behavior: FakeBehavior,
    started_at: Option<Instant>,
    stopped: bool,
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    containers: HashMap<String, FakeContainer>,
    calls: Vec<EngineCall>,
    created: Vec<ContainerSpec>,
    unreachable: bool,
    fail_cleanup: bool,
    hide_state_errors: bool,
}

/// In-memory [`ContainerEngine`].
pub struct FakeEngine {
    behavior: Box<BehaviorFn>,
    state: Mutex<FakeState>,
}

impl Default for FakeEngine {
    /// Every container exits immediately with code 0 and no output.
    fn default() -> Self {
        Self::new(|_| FakeBehavior::default())
    }
}

impl FakeEngine {
    pub fn new(behavior: impl Fn(&ContainerSpec) -> FakeBehavior + Send + Sync + 'static) -> Self {
        Self {
            behavior: Box::new(behavior),
            state: Mutex::new(FakeState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent call fail with `EngineUnavailable`.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    /// Make `stop` and forced `remove` fail.
    pub fn fail_cleanup(&self) {
        self.state().fail_cleanup = true;
    }

    /// Report refused starts as plain `created` on inspect, like engines
    /// that do not expose a state error. Only the attached client's exit
    /// code then tells that the start failed.
    pub fn hide_state_errors(&self) {
        self.state().hide_state_errors = true;
    }

    /// Remove a container behind the runner's back.
    pub fn vanish(&self, id: &str) {
        self.state().containers.remove(id);
    }

    /// Lifecycle calls made so far (inspections are not recorded).
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state().calls.clone()
    }

    /// Specs of every container created so far, in creation order.
    pub fn created_specs(&self) -> Vec<ContainerSpec> {
        self.state().created.clone()
    }

    /// Containers created and not yet removed.
    pub fn live_containers(&self) -> usize {
        self.state().containers.len()
    }

    fn check_reachable(state: &FakeState) -> Result<(), ContainerError> {
        if state.unreachable {
            Err(ContainerError::EngineUnavailable("fake engine unreachable".into()))
        } else {
            Ok(())
        }
    }

    fn no_such(id: &str) -> ContainerError {
        ContainerError::Command {
            command: "fake".into(),
            message: format!("No such container: {id}"),
        }
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        let mut state = self.state();
        Self::check_reachable(&state)?;
        state.next_id += 1;
        let id = format!("fake-{}", state.next_id);
        state.calls.push(EngineCall::Create(spec.image.clone()));
        state.created.push(spec.clone());
        state.containers.insert(
            id.clone(),
            FakeContainer {
                spec: spec.clone(),
                behavior: FakeBehavior::default(),
                started_at: None,
                stopped: false,
            },
        );
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<OutputCapture, ContainerError> {
        let spec = {
            let mut state = self.state();
            Self::check_reachable(&state)?;
            state.calls.push(EngineCall::Start(id.to_string()));
            state
                .containers
                .get(id)
                .map(|c| c.spec.clone())
                .ok_or_else(|| Self::no_such(id))?
        };

        // Called without the lock held: the closure may touch the filesystem.
        let behavior = (self.behavior)(&spec);

        let mut state = self.state();
        let container = state.containers.get_mut(id).ok_or_else(|| Self::no_such(id))?;
        if let Some(error) = behavior.start_error.clone() {
            container.behavior = behavior;
            let (exit_tx, exit_rx) = oneshot::channel();
            let _ = exit_tx.send(1);
            return Ok(OutputCapture::ready(format!("{error}\n")).with_attach_exit(exit_rx));
        }
        let output = behavior.output.clone();
        container.behavior = behavior;
        container.started_at = Some(Instant::now());
        Ok(OutputCapture::ready(output))
    }

    async fn inspect(&self, id: &str) -> Result<Option<ContainerStatus>, ContainerError> {
        let mut state = self.state();
        Self::check_reachable(&state)?;

        let hide_state_errors = state.hide_state_errors;
        let Some(container) = state.containers.get(id) else {
            return Ok(None);
        };
        if let Some(error) = &container.behavior.start_error {
            if hide_state_errors {
                return Ok(Some(ContainerStatus::Created));
            }
            return Ok(Some(ContainerStatus::Failed {
                error: error.clone(),
            }));
        }
        let Some(started_at) = container.started_at else {
            return Ok(Some(ContainerStatus::Created));
        };
        if container.stopped {
            return Ok(Some(ContainerStatus::Exited {
                code: KILLED_EXIT_CODE,
            }));
        }
        if started_at.elapsed() < container.behavior.run_for {
            return Ok(Some(ContainerStatus::Running));
        }
        if container.behavior.vanishes {
            state.containers.remove(id);
            return Ok(None);
        }
        Ok(Some(ContainerStatus::Exited {
            code: container.behavior.exit_code,
        }))
    }

    async fn stop(&self, id: &str) -> Result<(), ContainerError> {
        let mut state = self.state();
        Self::check_reachable(&state)?;
        state.calls.push(EngineCall::Stop(id.to_string()));
        if state.fail_cleanup {
            return Err(ContainerError::Command {
                command: "stop".into(),
                message: "stop refused".into(),
            });
        }
        let container = state.containers.get_mut(id).ok_or_else(|| Self::no_such(id))?;
        container.stopped = true;
        Ok(())
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), ContainerError> {
        let mut state = self.state();
        Self::check_reachable(&state)?;
        state.calls.push(EngineCall::Remove {
            id: id.to_string(),
            force,
        });
        if force && state.fail_cleanup {
            return Err(ContainerError::Command {
                command: "rm".into(),
                message: "removal refused".into(),
            });
        }
        state
            .containers
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| Self::no_such(id))
    }
}
