//! Read access to stored DICOM series.
//!
//! The daemon never parses DICOM; it only needs to know which image numbers
//! a series holds and to copy each image's raw bytes into the job's staging
//! directory. [`DicomRepository`] is that contract. Two implementations are
//! provided: [`FileDicomRepository`] reads `<root>/<seriesUid>/<NNNNNNNN>.dcm`
//! files, and [`MemoryDicomRepository`] serves series held in memory.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::multirange::MultiRange;

/// Errors from a DICOM repository backend.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Series not found: {0}")]
    SeriesNotFound(String),

    #[error("Image {image_no} of series {series_uid} not found")]
    ImageNotFound { series_uid: String, image_no: u32 },

    /// The backing store cannot be reached.
    #[error("DICOM repository unavailable: {0}")]
    Unavailable(String),

    #[error("DICOM repository I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RepositoryError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Handle on one stored series.
#[async_trait]
pub trait DicomSeries: Send + Sync {
    /// Image numbers present in the series.
    fn images(&self) -> &MultiRange;

    /// Raw bytes of one image.
    async fn load(&self, image_no: u32) -> Result<Vec<u8>, RepositoryError>;
}

/// Lookup of stored series by UID.
#[async_trait]
pub trait DicomRepository: Send + Sync {
    async fn get_series(&self, series_uid: &str) -> Result<Box<dyn DicomSeries>, RepositoryError>;
}

/// File name of an image inside a series directory.
pub fn image_file_name(image_no: u32) -> String {
    format!("{image_no:08}.dcm")
}

// ---------------------------------------------------------------------------
// Filesystem repository
// ---------------------------------------------------------------------------

/// Series stored as one directory per UID under a common root.
#[derive(Debug, Clone)]
pub struct FileDicomRepository {
    root: PathBuf,
}

impl FileDicomRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn series_dir(&self, series_uid: &str) -> Result<PathBuf, RepositoryError> {
        // UIDs are dotted decimal strings; anything else could escape the root.
        if series_uid.is_empty()
            || !series_uid.chars().all(|c| c.is_ascii_digit() || c == '.')
        {
            return Err(RepositoryError::SeriesNotFound(series_uid.to_string()));
        }
        Ok(self.root.join(series_uid))
    }
}

#[async_trait]
impl DicomRepository for FileDicomRepository {
    async fn get_series(&self, series_uid: &str) -> Result<Box<dyn DicomSeries>, RepositoryError> {
        let dir = self.series_dir(series_uid)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RepositoryError::SeriesNotFound(series_uid.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut numbers = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".dcm")) else {
                continue;
            };
            if let Ok(n) = stem.parse::<u32>() {
                numbers.push(n);
            }
        }

        Ok(Box::new(FileSeries {
            series_uid: series_uid.to_string(),
            dir,
            images: numbers.into_iter().collect(),
        }))
    }
}

struct FileSeries {
    series_uid: String,
    dir: PathBuf,
    images: MultiRange,
}

#[async_trait]
impl DicomSeries for FileSeries {
    fn images(&self) -> &MultiRange {
        &self.images
    }

    async fn load(&self, image_no: u32) -> Result<Vec<u8>, RepositoryError> {
        if !self.images.contains(image_no) {
            return Err(RepositoryError::ImageNotFound {
                series_uid: self.series_uid.clone(),
                image_no,
            });
        }
        Ok(tokio::fs::read(self.dir.join(image_file_name(image_no))).await?)
    }
}

// ---------------------------------------------------------------------------
// In-memory repository
// ---------------------------------------------------------------------------

/// Series held entirely in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryDicomRepository {
    series: HashMap<String, Arc<BTreeMap<u32, Vec<u8>>>>,
}

impl MemoryDicomRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a series with explicit image contents.
    pub fn with_series(
        mut self,
        series_uid: impl Into<String>,
        images: impl IntoIterator<Item = (u32, Vec<u8>)>,
    ) -> Self {
        self.series
            .insert(series_uid.into(), Arc::new(images.into_iter().collect()));
        self
    }

    /// Add a series whose images are small placeholder blobs, one per
    /// member of `images`.
    pub fn with_placeholder_series(self, series_uid: impl Into<String>, images: &MultiRange) -> Self {
        let uid = series_uid.into();
        let blobs: Vec<(u32, Vec<u8>)> = images
            .iter()
            .map(|n| (n, format!("{uid}:{n}").into_bytes()))
            .collect();
        self.with_series(uid, blobs)
    }
}

#[async_trait]
impl DicomRepository for MemoryDicomRepository {
    async fn get_series(&self, series_uid: &str) -> Result<Box<dyn DicomSeries>, RepositoryError> {
        let images = self
            .series
            .get(series_uid)
            .ok_or_else(|| RepositoryError::SeriesNotFound(series_uid.to_string()))?;
        Ok(Box::new(MemorySeries {
            series_uid: series_uid.to_string(),
            range: images.keys().copied().collect(),
            images: Arc::clone(images),
        }))
    }
}

struct MemorySeries {
    series_uid: String,
    range: MultiRange,
    images: Arc<BTreeMap<u32, Vec<u8>>>,
}

#[async_trait]
impl DicomSeries for MemorySeries {
    fn images(&self) -> &MultiRange {
        &self.range
    }

    async fn load(&self, image_no: u32) -> Result<Vec<u8>, RepositoryError> {
        self.images
            .get(&image_no)
            .cloned()
            .ok_or_else(|| RepositoryError::ImageNotFound {
                series_uid: self.series_uid.clone(),
                image_no,
            })
    }
}
