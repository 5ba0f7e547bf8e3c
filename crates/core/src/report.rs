//! Status sink for job progress.
//!
//! The pipeline emits a [`JobReport`] at every externally visible status
//! change. Implementations must tolerate repeated identical reports: each
//! call is an idempotent write.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

/// A status transition or side-effect of one job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobReport {
    /// The job was claimed and staging is about to begin.
    Processing,
    /// The parsed `results.json` of a successful run.
    Results(serde_json::Value),
    /// Results were archived; the job is complete.
    Finished,
    /// The job failed with the given message.
    Failed(String),
}

impl JobReport {
    /// The wire name of the report type.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Results(_) => "results",
            Self::Finished => "finished",
            Self::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind())
    }
}

/// Errors from a report sink.
#[derive(Debug, thiserror::Error)]
pub enum ReportError {
    #[error("Report sink unavailable: {0}")]
    Unavailable(String),

    #[error("Report sink error: {0}")]
    Sink(String),
}

impl ReportError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Receiver of job status transitions.
#[async_trait]
pub trait JobReporter: Send + Sync {
    async fn report(&self, job_id: &str, report: JobReport) -> Result<(), ReportError>;
}

/// Forwards every report to each inner reporter in order.
///
/// All reporters are attempted even if an earlier one fails; the first
/// error is returned.
#[derive(Clone, Default)]
pub struct FanoutReporter {
    reporters: Vec<Arc<dyn JobReporter>>,
}

impl FanoutReporter {
    pub fn new(reporters: Vec<Arc<dyn JobReporter>>) -> Self {
        Self { reporters }
    }
}

#[async_trait]
impl JobReporter for FanoutReporter {
    async fn report(&self, job_id: &str, report: JobReport) -> Result<(), ReportError> {
        let mut first_error = None;
        for reporter in &self.reporters {
            if let Err(e) = reporter.report(job_id, report.clone()).await {
                tracing::warn!(job_id, kind = report.kind(), error = %e, "Reporter failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::Mutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(String, &'static str)>>,
    }

    #[async_trait]
    impl JobReporter for Recorder {
        async fn report(&self, job_id: &str, report: JobReport) -> Result<(), ReportError> {
            self.seen.lock().await.push((job_id.to_string(), report.kind()));
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl JobReporter for Broken {
        async fn report(&self, _job_id: &str, _report: JobReport) -> Result<(), ReportError> {
            Err(ReportError::Unavailable("down".into()))
        }
    }

    #[test]
    fn kinds_match_wire_names() {
        assert_eq!(JobReport::Processing.kind(), "processing");
        assert_eq!(JobReport::Results(serde_json::json!({})).kind(), "results");
        assert_eq!(JobReport::Finished.kind(), "finished");
        assert_eq!(JobReport::Failed("x".into()).to_string(), "failed");
    }

    #[tokio::test]
    async fn fanout_reaches_every_reporter_despite_failures() {
        let recorder = Arc::new(Recorder::default());
        let fanout = FanoutReporter::new(vec![Arc::new(Broken), recorder.clone()]);

        let err = fanout.report("j1", JobReport::Finished).await.unwrap_err();
        assert!(err.is_unavailable());
        assert_eq!(
            *recorder.seen.lock().await,
            vec![("j1".to_string(), "finished")]
        );
    }
}
