//! [`ContainerEngine`] backed by the `docker` command-line client.
//!
//! Each operation spawns one CLI invocation through `tokio::process`. The
//! engine address comes from `DOCKER_HOST`-style configuration and is
//! passed with `-H`, so either a unix socket or a `tcp://host:port`
//! endpoint works.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

use crate::engine::{ContainerEngine, ContainerSpec, ContainerStatus, OutputCapture, MAX_OUTPUT_BYTES};
use crate::error::ContainerError;

/// Stderr fragments meaning the daemon itself is unreachable.
const UNAVAILABLE_MARKERS: &[&str] = &[
    "Cannot connect to the Docker daemon",
    "error during connect",
    "Is the docker daemon running",
];

/// Stderr fragments meaning the container does not exist.
const MISSING_MARKERS: &[&str] = &["No such object", "No such container"];

/// Docker CLI engine.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
    host: Option<String>,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>, host: Option<String>) -> Self {
        Self {
            binary: binary.into(),
            host,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(host) = &self.host {
            cmd.arg("-H").arg(host);
        }
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    /// Run a CLI command to completion and return trimmed stdout.
    async fn run(&self, args: &[&str]) -> Result<String, ContainerError> {
        let output = self.command().args(args).output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ContainerError::EngineUnavailable(format!("{} not found", self.binary))
            } else {
                ContainerError::Io(e)
            }
        })?;

        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).trim().to_string());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if UNAVAILABLE_MARKERS.iter().any(|m| stderr.contains(m)) {
            return Err(ContainerError::EngineUnavailable(stderr));
        }
        Err(ContainerError::Command {
            command: args.first().copied().unwrap_or_default().to_string(),
            message: stderr,
        })
    }
}

/// Build the `docker create` argument list for a spec.
pub fn create_args(spec: &ContainerSpec) -> Vec<String> {
    let mut args = vec!["create".to_string()];
    if let Some(user) = &spec.user {
        args.push("--user".into());
        args.push(user.clone());
    }
    for bind in &spec.binds {
        args.push("--volume".into());
        args.push(bind.to_volume_arg());
    }
    for (key, value) in &spec.labels {
        args.push("--label".into());
        args.push(format!("{key}={value}"));
    }
    args.push(spec.image.clone());
    args.extend(spec.command.iter().cloned());
    args
}

/// `inspect` format: status word, exit code, then the free-form state error.
const STATE_FORMAT: &str = "{{.State.Status}} {{.State.ExitCode}} {{.State.Error}}";

/// Parse one line produced by [`STATE_FORMAT`].
fn parse_state(line: &str) -> Option<ContainerStatus> {
    let mut parts = line.trim().splitn(3, ' ');
    let status = parts.next()?;
    let code = parts.next()?.trim().parse().ok()?;
    let error = parts.next().unwrap_or_default();
    Some(ContainerStatus::from_state(status, code, error))
}

#[async_trait]
impl ContainerEngine for DockerCli {
    async fn create(&self, spec: &ContainerSpec) -> Result<String, ContainerError> {
        let args = create_args(spec);
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let id = self.run(&refs).await?;
        tracing::debug!(container_id = %id, image = %spec.image, "Container created");
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<OutputCapture, ContainerError> {
        // `start --attach` streams the container's output until it exits.
        let mut child = self
            .command()
            .args(["start", "--attach", id])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward(stderr, tx.clone()));
        }
        drop(tx);

        // The client exits with the container's code, or non-zero right away
        // when the engine refuses to start it.
        let (exit_tx, exit_rx) = oneshot::channel();
        let container_id = id.to_string();
        let task = tokio::spawn(async move {
            let mut output = Vec::new();
            while let Some(chunk) = rx.recv().await {
                let room = MAX_OUTPUT_BYTES.saturating_sub(output.len());
                output.extend_from_slice(&chunk[..chunk.len().min(room)]);
            }
            match child.wait().await {
                Ok(status) => {
                    let _ = exit_tx.send(status.code().map_or(-1, i64::from));
                }
                Err(e) => {
                    tracing::warn!(container_id = %container_id, error = %e, "Failed to wait for attached client");
                }
            }
            output
        });

        tracing::debug!(container_id = %id, "Container started");
        Ok(OutputCapture::pending(task).with_attach_exit(exit_rx))
    }

    async fn inspect(&self, id: &str) -> Result<Option<ContainerStatus>, ContainerError> {
        match self.run(&["inspect", "--format", STATE_FORMAT, id]).await {
            Ok(line) => parse_state(&line).map(Some).ok_or_else(|| ContainerError::Command {
                command: "inspect".into(),
                message: format!("unexpected state line: {line}"),
            }),
            Err(ContainerError::Command { message, .. })
                if MISSING_MARKERS.iter().any(|m| message.contains(m)) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn stop(&self, id: &str) -> Result<(), ContainerError> {
        self.run(&["stop", "--time", "0", id]).await?;
        tracing::debug!(container_id = %id, "Container stopped");
        Ok(())
    }

    async fn remove(&self, id: &str, force: bool) -> Result<(), ContainerError> {
        let args: &[&str] = if force {
            &["rm", "--force", id]
        } else {
            &["rm", id]
        };
        self.run(args).await?;
        tracing::debug!(container_id = %id, force, "Container removed");
        Ok(())
    }
}

/// Forward one output stream to the collector in arrival order.
async fn forward<R: AsyncRead + Unpin>(mut stream: R, tx: mpsc::UnboundedSender<Vec<u8>>) {
    let mut buf = vec![0u8; 8192];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::engine::Bind;

    #[test]
    fn create_args_carry_user_binds_and_labels() {
        let spec = ContainerSpec::new("circus/lung:1.0")
            .with_user(Some("1000:1000".into()))
            .with_bind(Bind::read_write("/work/j1/in", "/circus/in"))
            .with_bind(Bind::read_only("/work/j1/dicom/1.2", "/dicom"))
            .with_label("circus.job", "j1")
            .with_command(["run", "--fast"]);

        assert_eq!(
            create_args(&spec),
            [
                "create",
                "--user",
                "1000:1000",
                "--volume",
                "/work/j1/in:/circus/in",
                "--volume",
                "/work/j1/dicom/1.2:/dicom:ro",
                "--label",
                "circus.job=j1",
                "circus/lung:1.0",
                "run",
                "--fast",
            ]
        );
    }

    #[test]
    fn create_args_without_options_is_just_the_image() {
        assert_eq!(create_args(&ContainerSpec::new("busybox")), ["create", "busybox"]);
    }

    #[test]
    fn state_line_is_parsed() {
        assert_eq!(parse_state("exited 3 \n"), Some(ContainerStatus::Exited { code: 3 }));
        assert_eq!(parse_state("running 0"), Some(ContainerStatus::Running));
        assert_eq!(parse_state("garbage"), None);
    }

    #[test]
    fn state_error_on_created_container_is_a_failed_start() {
        assert_eq!(
            parse_state("created 127 exec: \"/run.sh\": executable file not found in $PATH\n"),
            Some(ContainerStatus::Failed {
                error: "exec: \"/run.sh\": executable file not found in $PATH".into()
            })
        );
    }

    #[tokio::test]
    async fn missing_binary_means_engine_unavailable() {
        let engine = DockerCli::new("circus-no-such-docker-binary", None);
        let err = engine.inspect("abc").await.unwrap_err();
        assert_matches!(err, ContainerError::EngineUnavailable(_));
    }
}
