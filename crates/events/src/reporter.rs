//! [`JobReporter`] that publishes onto an [`EventBus`].

use std::sync::Arc;

use async_trait::async_trait;
use circus_core::report::{JobReport, JobReporter, ReportError};

use crate::bus::{EventBus, JobEvent};

/// Publishes every report as a [`JobEvent`].
///
/// Publishing never fails: with no subscribers the event is dropped.
#[derive(Clone)]
pub struct EventReporter {
    bus: Arc<EventBus>,
}

impl EventReporter {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl JobReporter for EventReporter {
    async fn report(&self, job_id: &str, report: JobReport) -> Result<(), ReportError> {
        let receivers = self.bus.publish(JobEvent::from_report(job_id, &report));
        tracing::trace!(job_id, kind = report.kind(), receivers, "Job event published");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_arrive_in_order() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let reporter = EventReporter::new(bus.clone());

        reporter.report("job.1", JobReport::Processing).await.unwrap();
        reporter
            .report("job.1", JobReport::Results(serde_json::json!({"ok": true})))
            .await
            .unwrap();
        reporter.report("job.1", JobReport::Finished).await.unwrap();

        let kinds: Vec<String> = vec![
            rx.recv().await.unwrap().kind,
            rx.recv().await.unwrap().kind,
            rx.recv().await.unwrap().kind,
        ];
        assert_eq!(kinds, ["processing", "results", "finished"]);
    }

    #[tokio::test]
    async fn reporting_without_subscribers_succeeds() {
        let reporter = EventReporter::new(Arc::new(EventBus::default()));
        assert!(reporter.report("job.1", JobReport::Finished).await.is_ok());
    }
}
