//! Job-scoped working directory tree.
//!
//! ```text
//! <working_dir>/<jobId>/
//!     in/      volumes produced by the volume builder, plugin input
//!     out/     plugin output
//!     dicom/   fetched images, one subdirectory per series UID
//! ```

use std::io;
use std::path::{Path, PathBuf};

/// The working tree of one job. Owned by the pipeline while the job is
/// being processed.
#[derive(Debug)]
pub struct JobDirectory {
    root: PathBuf,
}

impl JobDirectory {
    /// Create a fresh tree for `job_id`.
    ///
    /// A tree left over from an earlier attempt of the same job is removed
    /// first, so every run starts empty.
    pub async fn create(working_dir: &Path, job_id: &str) -> io::Result<Self> {
        if !is_safe_component(job_id) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("job id {job_id:?} is not a valid directory name"),
            ));
        }
        let root = working_dir.join(job_id);
        if tokio::fs::try_exists(&root).await? {
            tracing::warn!(job_id, path = %root.display(), "Removing stale working directory");
            tokio::fs::remove_dir_all(&root).await?;
        }

        let dir = Self { root };
        for sub in [dir.in_dir(), dir.out_dir(), dir.dicom_dir()] {
            tokio::fs::create_dir_all(sub).await?;
        }
        Ok(dir)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn in_dir(&self) -> PathBuf {
        self.root.join("in")
    }

    pub fn out_dir(&self) -> PathBuf {
        self.root.join("out")
    }

    pub fn dicom_dir(&self) -> PathBuf {
        self.root.join("dicom")
    }

    /// Directory holding the fetched images of one series.
    pub fn series_dir(&self, series_uid: &str) -> io::Result<PathBuf> {
        if !is_safe_component(series_uid) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("series UID {series_uid:?} is not a valid directory name"),
            ));
        }
        Ok(self.dicom_dir().join(series_uid))
    }

    /// Delete the whole tree.
    pub async fn remove(self) -> io::Result<()> {
        tokio::fs::remove_dir_all(&self.root).await
    }
}

/// A single, non-traversing path component.
fn is_safe_component(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_the_three_subdirectories() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = JobDirectory::create(tmp.path(), "job.1").await.unwrap();

        assert_eq!(dir.root(), tmp.path().join("job.1"));
        assert!(dir.in_dir().is_dir());
        assert!(dir.out_dir().is_dir());
        assert!(dir.dicom_dir().is_dir());
    }

    #[tokio::test]
    async fn stale_tree_is_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let first = JobDirectory::create(tmp.path(), "job.1").await.unwrap();
        std::fs::write(first.out_dir().join("results.json"), "{}").unwrap();

        let second = JobDirectory::create(tmp.path(), "job.1").await.unwrap();
        assert!(!second.out_dir().join("results.json").exists());
    }

    #[tokio::test]
    async fn remove_deletes_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = JobDirectory::create(tmp.path(), "job.1").await.unwrap();
        let root = dir.root().to_path_buf();
        dir.remove().await.unwrap();
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn traversing_names_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(JobDirectory::create(tmp.path(), "..").await.is_err());

        let dir = JobDirectory::create(tmp.path(), "job.2").await.unwrap();
        assert!(dir.series_dir("../../etc").is_err());
        assert!(dir.series_dir("1.2.840.10008").is_ok());
    }
}
