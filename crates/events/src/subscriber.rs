//! Background subscriber writing job events to the tracing log.
//!
//! [`EventLogger`] runs as a long-lived task and exits when the bus is
//! dropped.

use tokio::sync::broadcast;

use crate::bus::JobEvent;

/// Logs every event received from the bus.
pub struct EventLogger;

impl EventLogger {
    /// Run the logging loop until the channel closes. Returns the number of
    /// events logged.
    pub async fn run(mut receiver: broadcast::Receiver<JobEvent>) -> u64 {
        let mut logged = 0;
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    Self::log(&event);
                    logged += 1;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Event logger lagged, some events were dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::debug!("Event bus closed, event logger shutting down");
                    break;
                }
            }
        }
        logged
    }

    fn log(event: &JobEvent) {
        match event.kind.as_str() {
            "failed" => tracing::warn!(
                job_id = %event.job_id,
                message = %event.payload["message"],
                "Job failed"
            ),
            "results" => tracing::info!(
                job_id = %event.job_id,
                results = %event.payload,
                "Job results stored"
            ),
            kind => tracing::info!(job_id = %event.job_id, status = kind, "Job status changed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::bus::EventBus;

    #[tokio::test]
    async fn exits_when_bus_is_dropped() {
        let bus = Arc::new(EventBus::default());
        let handle = tokio::spawn(EventLogger::run(bus.subscribe()));

        bus.publish(JobEvent::new("job.1", "processing"));
        bus.publish(JobEvent::new("job.1", "finished"));
        drop(bus);

        assert_eq!(handle.await.unwrap(), 2);
    }
}
