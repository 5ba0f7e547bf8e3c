//! Stage-out: validate plugin results and archive the output directory.

use std::path::{Path, PathBuf};

use crate::error::PipelineError;

/// File every plugin must write into its output directory.
pub const RESULTS_FILE: &str = "results.json";

/// Captured plugin output, written next to the results.
pub const PLUGIN_LOG_FILE: &str = "plugin-log.txt";

/// Read and validate `results.json`.
///
/// The document must parse as JSON and its top level must be an object.
pub async fn read_results(out_dir: &Path) -> Result<serde_json::Value, PipelineError> {
    let path = out_dir.join(RESULTS_FILE);
    let text = match tokio::fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PipelineError::ResultValidation(format!(
                "{RESULTS_FILE} was not produced by the plugin"
            )));
        }
        Err(e) => {
            return Err(PipelineError::ResultValidation(format!(
                "failed to read {RESULTS_FILE}: {e}"
            )));
        }
    };

    let value: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
        PipelineError::ResultValidation(format!("{RESULTS_FILE} is not valid JSON: {e}"))
    })?;
    if !value.is_object() {
        return Err(PipelineError::ResultValidation(format!(
            "{RESULTS_FILE} must contain a JSON object"
        )));
    }
    Ok(value)
}

/// Copy the tree under `src` into `dest`, creating `dest` as needed.
///
/// Existing files at the destination are overwritten. Symlinks are
/// skipped. Returns the number of files copied.
pub async fn copy_tree(src: &Path, dest: &Path) -> Result<u64, PipelineError> {
    let mut copied = 0;
    let mut pending: Vec<(PathBuf, PathBuf)> = vec![(src.to_path_buf(), dest.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        tokio::fs::create_dir_all(&to)
            .await
            .map_err(|e| archive_err(&to, e))?;
        let mut entries = tokio::fs::read_dir(&from)
            .await
            .map_err(|e| archive_err(&from, e))?;
        while let Some(entry) = entries.next_entry().await.map_err(|e| archive_err(&from, e))? {
            let file_type = entry.file_type().await.map_err(|e| archive_err(&from, e))?;
            let target = to.join(entry.file_name());
            if file_type.is_dir() {
                pending.push((entry.path(), target));
            } else if file_type.is_file() {
                tokio::fs::copy(entry.path(), &target)
                    .await
                    .map_err(|e| archive_err(&target, e))?;
                copied += 1;
            }
        }
    }
    Ok(copied)
}

fn archive_err(path: &Path, e: std::io::Error) -> PipelineError {
    PipelineError::Archive(format!("{}: {e}", path.display()))
}
