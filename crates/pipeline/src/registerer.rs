//! Validate-then-enqueue job registration.
//!
//! Every check runs before the queue is touched: a request that fails on
//! any series leaves no trace in the queue.

use std::collections::HashMap;
use std::sync::Arc;

use circus_core::dicom::{DicomRepository, RepositoryError};
use circus_core::job::{validate_job_id, PluginJobRequest};
use circus_core::multirange::MultiRange;
use circus_core::partial_volume::PartialVolumeDescriptor;
use circus_core::plugin::{CatalogError, PluginCatalog};
use circus_core::queue::{JobQueue, QueueError};
use circus_core::types::DbId;

/// Why a job was not registered.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("Invalid job id: \"{0}\"")]
    InvalidJobId(String),

    #[error("No such plugin installed: {0}")]
    NoSuchPlugin(String),

    #[error("The job does not reference any series")]
    EmptySeries,

    #[error("Series {0} has no images")]
    SeriesHasNoImages(String),

    #[error(
        "Invalid partial volume descriptor for series {series_uid}: \
         start {}, end {}, delta {}",
        descriptor.start, descriptor.end, descriptor.delta
    )]
    InvalidPartialVolume {
        series_uid: String,
        descriptor: PartialVolumeDescriptor,
    },

    #[error(
        "Partial volume descriptor for series {series_uid} is out of range \
         (available images: {available})"
    )]
    PartialVolumeOutOfRange {
        series_uid: String,
        available: MultiRange,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl RegistrationError {
    /// Whether the request itself was rejected, as opposed to a lookup or
    /// storage failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidJobId(_)
                | Self::NoSuchPlugin(_)
                | Self::EmptySeries
                | Self::SeriesHasNoImages(_)
                | Self::InvalidPartialVolume { .. }
                | Self::PartialVolumeOutOfRange { .. }
                | Self::Repository(RepositoryError::SeriesNotFound(_))
                | Self::Queue(QueueError::DuplicateJobId(_))
        )
    }

    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Catalog(e) => e.is_unavailable(),
            Self::Repository(e) => e.is_unavailable(),
            Self::Queue(e) => e.is_unavailable(),
            _ => false,
        }
    }
}

/// Validates plugin job requests and writes them to the queue.
#[derive(Clone)]
pub struct JobRegisterer {
    queue: Arc<dyn JobQueue<PluginJobRequest>>,
    plugins: Arc<dyn PluginCatalog>,
    dicom: Arc<dyn DicomRepository>,
}

impl JobRegisterer {
    pub fn new(
        queue: Arc<dyn JobQueue<PluginJobRequest>>,
        plugins: Arc<dyn PluginCatalog>,
        dicom: Arc<dyn DicomRepository>,
    ) -> Self {
        Self {
            queue,
            plugins,
            dicom,
        }
    }

    /// Validate `request` and enqueue it under `job_id`.
    pub async fn register(
        &self,
        job_id: &str,
        request: PluginJobRequest,
        priority: i32,
    ) -> Result<DbId, RegistrationError> {
        if validate_job_id(job_id).is_err() {
            return Err(RegistrationError::InvalidJobId(job_id.to_string()));
        }

        if self.plugins.get(&request.plugin_id).await?.is_none() {
            return Err(RegistrationError::NoSuchPlugin(request.plugin_id.clone()));
        }

        if request.series.is_empty() {
            return Err(RegistrationError::EmptySeries);
        }

        let mut available: HashMap<&str, MultiRange> = HashMap::new();
        for series in &request.series {
            let uid = series.series_uid.as_str();
            if !available.contains_key(uid) {
                let images = self.dicom.get_series(uid).await?.images().clone();
                if images.is_empty() {
                    return Err(RegistrationError::SeriesHasNoImages(uid.to_string()));
                }
                available.insert(uid, images);
            }

            let Some(descriptor) = series.partial_volume_descriptor else {
                continue;
            };
            if !descriptor.is_well_formed() {
                return Err(RegistrationError::InvalidPartialVolume {
                    series_uid: uid.to_string(),
                    descriptor,
                });
            }
            if let Some(images) = available.get(uid) {
                if !descriptor.is_within(images) {
                    return Err(RegistrationError::PartialVolumeOutOfRange {
                        series_uid: uid.to_string(),
                        available: images.clone(),
                    });
                }
            }
        }

        let plugin_id = request.plugin_id.clone();
        let series = request.series.len();
        let id = self.queue.enqueue(job_id, request, priority).await?;
        tracing::info!(job_id, %plugin_id, series, priority, id, "Job registered");
        Ok(id)
    }
}
