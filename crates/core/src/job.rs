//! Plugin job request model.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::partial_volume::PartialVolumeDescriptor;

/// Job ids become a directory-name component of the working and results
/// trees, so only ASCII alphanumerics and dots are allowed.
static JOB_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9.]+$").expect("valid regex"));

/// Check a job id against the allowed character set.
pub fn validate_job_id(job_id: &str) -> Result<(), CoreError> {
    if JOB_ID_RE.is_match(job_id) {
        Ok(())
    } else {
        Err(CoreError::Validation(format!("Invalid job id: \"{job_id}\"")))
    }
}

/// One series referenced by a job, optionally narrowed to a strided window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSeries {
    pub series_uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_volume_descriptor: Option<PartialVolumeDescriptor>,
}

impl JobSeries {
    pub fn full(series_uid: impl Into<String>) -> Self {
        Self {
            series_uid: series_uid.into(),
            partial_volume_descriptor: None,
        }
    }

    pub fn partial(series_uid: impl Into<String>, descriptor: PartialVolumeDescriptor) -> Self {
        Self {
            series_uid: series_uid.into(),
            partial_volume_descriptor: Some(descriptor),
        }
    }
}

/// The payload stored in the queue for every plugin job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginJobRequest {
    pub plugin_id: String,
    pub series: Vec<JobSeries>,
}

impl PluginJobRequest {
    /// Distinct series UIDs in order of first appearance.
    pub fn distinct_series_uids(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::with_capacity(self.series.len());
        for s in &self.series {
            if !seen.contains(&s.series_uid.as_str()) {
                seen.push(&s.series_uid);
            }
        }
        seen
    }
}
