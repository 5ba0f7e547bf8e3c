//! Engine abstraction and the value types passed across it.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::error::ContainerError;

/// A host directory mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bind {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Bind {
    pub fn read_write(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: false,
        }
    }

    pub fn read_only(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            read_only: true,
            ..Self::read_write(host, container)
        }
    }

    /// The `host:container[:ro]` volume argument.
    pub fn to_volume_arg(&self) -> String {
        let mut arg = format!("{}:{}", self.host.display(), self.container);
        if self.read_only {
            arg.push_str(":ro");
        }
        arg
    }
}

/// Everything needed to create one container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    /// Command override. Empty uses the image's default entrypoint.
    pub command: Vec<String>,
    pub binds: Vec<Bind>,
    /// `uid:gid` to run as. `None` leaves the image's user in place.
    pub user: Option<String>,
    pub labels: Vec<(String, String)>,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_bind(mut self, bind: Bind) -> Self {
        self.binds.push(bind);
        self
    }

    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }
}

/// Observed state of a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Exited { code: i64 },
    /// The engine gave up starting the container (bad entrypoint, mount
    /// error, ...). The container will never run.
    Failed { error: String },
    /// Any other engine state (`paused`, `restarting`, `dead`, ...).
    Other(String),
}

impl ContainerStatus {
    /// Parse the engine's `status` word plus exit code.
    pub fn from_engine(status: &str, exit_code: i64) -> Self {
        match status {
            "created" => Self::Created,
            "running" => Self::Running,
            "exited" => Self::Exited { code: exit_code },
            other => Self::Other(other.to_string()),
        }
    }

    /// Like [`from_engine`](Self::from_engine), also taking the engine's
    /// state error. A non-empty error on a container that is not running
    /// means the start was refused.
    pub fn from_state(status: &str, exit_code: i64, error: &str) -> Self {
        let error = error.trim();
        if !error.is_empty() && status != "running" {
            return Self::Failed {
                error: error.to_string(),
            };
        }
        Self::from_engine(status, exit_code)
    }
}

impl fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => f.write_str("created"),
            Self::Running => f.write_str("running"),
            Self::Exited { code } => write!(f, "exited({code})"),
            Self::Failed { error } => write!(f, "failed({error})"),
            Self::Other(s) => f.write_str(s),
        }
    }
}

/// Maximum combined output captured per run (10 MiB).
pub const MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Combined stdout/stderr of a started container.
///
/// Either already complete, or still being collected by a background task
/// that finishes when the container's output streams close.
pub struct OutputCapture {
    inner: CaptureInner,
    attach_exit: Option<oneshot::Receiver<i64>>,
    attach_code: Option<i64>,
}

enum CaptureInner {
    Ready(Vec<u8>),
    Pending(JoinHandle<Vec<u8>>),
}

impl OutputCapture {
    pub fn ready(output: impl Into<Vec<u8>>) -> Self {
        Self {
            inner: CaptureInner::Ready(output.into()),
            attach_exit: None,
            attach_code: None,
        }
    }

    pub fn pending(task: JoinHandle<Vec<u8>>) -> Self {
        Self {
            inner: CaptureInner::Pending(task),
            attach_exit: None,
            attach_code: None,
        }
    }

    /// Receive the exit code of the attached client process once it ends.
    pub fn with_attach_exit(mut self, exit: oneshot::Receiver<i64>) -> Self {
        self.attach_exit = Some(exit);
        self
    }

    /// Exit code of the attached client, if it has exited already.
    ///
    /// Never blocks. `None` while the client is still attached or when the
    /// engine does not attach a client process at all.
    pub fn attach_exit_code(&mut self) -> Option<i64> {
        if self.attach_code.is_none() {
            if let Some(exit) = self.attach_exit.as_mut() {
                match exit.try_recv() {
                    Ok(code) => self.attach_code = Some(code),
                    Err(oneshot::error::TryRecvError::Empty) => {}
                    Err(oneshot::error::TryRecvError::Closed) => self.attach_exit = None,
                }
            }
        }
        self.attach_code
    }

    /// Wait up to `grace` for the output to be fully collected.
    ///
    /// Output still outstanding after `grace` is dropped with a warning;
    /// what was collected so far is not recoverable in that case.
    pub async fn collect(self, grace: Duration) -> String {
        let bytes = match self.inner {
            CaptureInner::Ready(bytes) => bytes,
            CaptureInner::Pending(mut task) => {
                match tokio::time::timeout(grace, &mut task).await {
                    Ok(Ok(bytes)) => bytes,
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "Output capture task failed");
                        Vec::new()
                    }
                    Err(_) => {
                        tracing::warn!(?grace, "Output capture did not finish in time");
                        task.abort();
                        Vec::new()
                    }
                }
            }
        };
        String::from_utf8_lossy(&bytes).into_owned()
    }

    /// Stop collecting and discard the output.
    pub fn abort(self) {
        if let CaptureInner::Pending(task) = self.inner {
            task.abort();
        }
    }
}

/// Low-level container engine operations.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Create (but do not start) a container. Returns its id.
    async fn create(&self, spec: &ContainerSpec) -> Result<String, ContainerError>;

    /// Attach to the container's combined output, then start it.
    async fn start(&self, id: &str) -> Result<OutputCapture, ContainerError>;

    /// Current state, or `None` if the container no longer exists.
    async fn inspect(&self, id: &str) -> Result<Option<ContainerStatus>, ContainerError>;

    /// Stop the container without a grace period.
    async fn stop(&self, id: &str) -> Result<(), ContainerError>;

    /// Remove the container. `force` also removes a running one.
    async fn remove(&self, id: &str, force: bool) -> Result<(), ContainerError>;
}

/// `uid:gid` of the current process, so containers write files the host
/// user owns.
#[cfg(unix)]
pub fn host_user() -> Option<String> {
    // SAFETY: getuid/getgid have no preconditions and cannot fail.
    let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
    Some(format!("{uid}:{gid}"))
}

#[cfg(not(unix))]
pub fn host_user() -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_arg_marks_read_only_binds() {
        assert_eq!(
            Bind::read_only("/work/j1/dicom/1.2", "/dicom").to_volume_arg(),
            "/work/j1/dicom/1.2:/dicom:ro"
        );
        assert_eq!(
            Bind::read_write("/work/j1/in", "/circus/in").to_volume_arg(),
            "/work/j1/in:/circus/in"
        );
    }

    #[test]
    fn engine_status_words_are_parsed() {
        assert_eq!(ContainerStatus::from_engine("running", 0), ContainerStatus::Running);
        assert_eq!(
            ContainerStatus::from_engine("exited", 137),
            ContainerStatus::Exited { code: 137 }
        );
        assert_eq!(
            ContainerStatus::from_engine("paused", 0),
            ContainerStatus::Other("paused".into())
        );
    }

    #[test]
    fn state_error_marks_a_refused_start() {
        assert_eq!(
            ContainerStatus::from_state("created", 127, "exec: \"run\": executable file not found"),
            ContainerStatus::Failed {
                error: "exec: \"run\": executable file not found".into()
            }
        );
        assert_eq!(
            ContainerStatus::from_state("exited", 0, ""),
            ContainerStatus::Exited { code: 0 }
        );
        assert_eq!(ContainerStatus::from_state("running", 0, "stale"), ContainerStatus::Running);
    }

    #[tokio::test]
    async fn attach_exit_code_is_seen_once_sent() {
        let (tx, rx) = oneshot::channel();
        let mut capture = OutputCapture::ready("").with_attach_exit(rx);
        assert_eq!(capture.attach_exit_code(), None);

        tx.send(1).unwrap();
        assert_eq!(capture.attach_exit_code(), Some(1));
        assert_eq!(capture.attach_exit_code(), Some(1));

        let (tx, rx) = oneshot::channel::<i64>();
        drop(tx);
        let mut capture = OutputCapture::ready("").with_attach_exit(rx);
        assert_eq!(capture.attach_exit_code(), None);
    }

    #[tokio::test]
    async fn pending_capture_returns_task_output() {
        let capture = OutputCapture::pending(tokio::spawn(async { b"hello\n".to_vec() }));
        assert_eq!(capture.collect(Duration::from_secs(1)).await, "hello\n");
    }

    #[cfg(unix)]
    #[test]
    fn host_user_is_numeric_pair() {
        let user = host_user().unwrap();
        let (uid, gid) = user.split_once(':').unwrap();
        assert!(uid.parse::<u32>().is_ok());
        assert!(gid.parse::<u32>().is_ok());
    }
}
