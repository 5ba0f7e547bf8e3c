//! Durable priority queue contract.
//!
//! A [`JobQueue`] holds one [`QueueItem`] per job id. Items enter in the
//! `wait` state, are claimed atomically by [`JobQueue::dequeue`]
//! (`wait -> processing`), and disappear on [`JobQueue::settle`]. The claim
//! is the only mutual exclusion the daemon relies on: two concurrent
//! callers of `dequeue` must never receive the same item.
//!
//! Retrieval order everywhere is `priority DESC, insertion ASC`.

mod memory;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{DbId, Timestamp};

pub use memory::MemoryQueue;

/// Lifecycle state of a queued item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueState {
    Wait,
    Processing,
}

impl QueueState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wait => "wait",
            Self::Processing => "processing",
        }
    }
}

impl fmt::Display for QueueState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueState {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "wait" => Ok(Self::Wait),
            "processing" => Ok(Self::Processing),
            other => Err(QueueError::Storage(format!("Unknown queue state: {other}"))),
        }
    }
}

/// Which items [`JobQueue::list`] returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueFilter {
    State(QueueState),
    All,
}

impl QueueFilter {
    pub fn matches(self, state: QueueState) -> bool {
        match self {
            Self::State(s) => s == state,
            Self::All => true,
        }
    }

    /// The state to filter on, or `None` for all.
    pub fn state(self) -> Option<QueueState> {
        match self {
            Self::State(s) => Some(s),
            Self::All => None,
        }
    }
}

/// One job held by the queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem<P> {
    /// Store-assigned id; ascending in insertion order.
    pub id: DbId,
    pub job_id: String,
    pub priority: i32,
    pub payload: P,
    pub state: QueueState,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub started_at: Option<Timestamp>,
}

/// Errors from a queue backend.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Unique-constraint violation on `job_id`.
    #[error("Job {0} is already in the queue")]
    DuplicateJobId(String),

    /// `settle` on an item that is not `processing` (or no longer exists).
    #[error("Tried to settle a job before it gets started: {0}")]
    NotStarted(String),

    /// The store cannot be reached (connection refused, pool closed, ...).
    #[error("Queue store unavailable: {0}")]
    Unavailable(String),

    #[error("Queue store error: {0}")]
    Storage(String),

    /// The claimed item's payload could not be decoded. The item has
    /// already transitioned to `processing`.
    #[error("Undecodable payload for job {job_id}: {message}")]
    Payload { job_id: String, message: String },
}

impl QueueError {
    /// Connection-level failures that should stop the daemon.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// A persistent, priority-ordered job store with an atomic claim.
#[async_trait]
pub trait JobQueue<P>: Send + Sync
where
    P: Send + Sync + 'static,
{
    /// Insert a new `wait` item. Fails with [`QueueError::DuplicateJobId`]
    /// if `job_id` is already present.
    async fn enqueue(&self, job_id: &str, payload: P, priority: i32) -> Result<DbId, QueueError>;

    /// Claim the next `wait` item, transitioning it to `processing` and
    /// stamping `started_at`. Returns `None` when nothing is waiting.
    async fn dequeue(&self) -> Result<Option<QueueItem<P>>, QueueError>;

    /// Remove a `processing` item. Fails with [`QueueError::NotStarted`]
    /// for waiting, unknown, or already settled job ids.
    async fn settle(&self, job_id: &str) -> Result<(), QueueError>;

    /// Snapshot of the matching items in dequeue order.
    async fn list(&self, filter: QueueFilter) -> Result<Vec<QueueItem<P>>, QueueError>;
}
