//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is shared via `Arc<EventBus>` between the reporter that
//! publishes and any number of subscribers.

use chrono::{DateTime, Utc};
use circus_core::report::JobReport;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// A status change of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    /// Id of the job the event belongs to.
    pub job_id: String,

    /// Report type: `processing`, `results`, `finished` or `failed`.
    pub kind: String,

    /// Results blob for `results`, `{"message": ...}` for `failed`, empty
    /// object otherwise.
    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    /// Create an event with an empty payload.
    pub fn new(job_id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            kind: kind.into(),
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Set the JSON payload for the event.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Build the event for a [`JobReport`].
    pub fn from_report(job_id: &str, report: &JobReport) -> Self {
        let event = Self::new(job_id, report.kind());
        match report {
            JobReport::Results(results) => event.with_payload(results.clone()),
            JobReport::Failed(message) => {
                event.with_payload(serde_json::json!({ "message": message }))
            }
            JobReport::Processing | JobReport::Finished => event,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// In-process fan-out event bus.
///
/// # Usage
///
/// ```rust
/// use circus_events::bus::{EventBus, JobEvent};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(JobEvent::new("job.1", "processing"));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<JobEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full the oldest unconsumed events are dropped and
    /// slow receivers observe `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns the number of subscribers that received it. With no
    /// subscribers the event is dropped.
    pub fn publish(&self, event: JobEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let delivered = bus.publish(
            JobEvent::new("job.7", "results").with_payload(serde_json::json!({"score": 3})),
        );
        assert_eq!(delivered, 1);

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.job_id, "job.7");
        assert_eq!(received.kind, "results");
        assert_eq!(received.payload["score"], 3);
    }

    #[test]
    fn publish_with_no_subscribers_is_dropped() {
        let bus = EventBus::default();
        assert_eq!(bus.publish(JobEvent::new("job.1", "processing")), 0);
    }

    #[test]
    fn failed_report_carries_message() {
        let event = JobEvent::from_report("job.2", &JobReport::Failed("boom".into()));
        assert_eq!(event.kind, "failed");
        assert_eq!(event.payload["message"], "boom");
    }

    #[test]
    fn processing_report_has_empty_payload() {
        let event = JobEvent::from_report("job.3", &JobReport::Processing);
        assert_eq!(event.kind, "processing");
        assert!(event.payload.as_object().is_some_and(|o| o.is_empty()));
    }
}
