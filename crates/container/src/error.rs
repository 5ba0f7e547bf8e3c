use std::time::Duration;

/// Errors from the container engine or a container run.
#[derive(Debug, thiserror::Error)]
pub enum ContainerError {
    /// The run exceeded its deadline. The container has been stopped and
    /// removed on a best-effort basis.
    #[error("Container {container_id} timed out after {limit:?}")]
    Timeout {
        container_id: String,
        limit: Duration,
    },

    /// The container vanished before this runner observed it exit.
    #[error("Container {0} disappeared before it exited")]
    Disappeared(String),

    /// The engine refused to start the container.
    #[error("Container {container_id} failed to start: {message}")]
    StartFailed {
        container_id: String,
        message: String,
    },

    /// The engine itself cannot be reached.
    #[error("Container engine unavailable: {0}")]
    EngineUnavailable(String),

    /// An engine command failed.
    #[error("Container engine command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ContainerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::EngineUnavailable(_))
    }
}
