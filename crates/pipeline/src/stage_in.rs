//! Stage-in: fetch DICOM images and build plugin input volumes.

use std::path::Path;

use circus_container::{Bind, ContainerRunner, ContainerSpec, RunOptions};
use circus_core::dicom::{image_file_name, DicomRepository};
use circus_core::job::{JobSeries, PluginJobRequest};

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::workdir::JobDirectory;

/// Label attached to every container started for a job.
pub const JOB_LABEL: &str = "circus.job";

/// Mount point of the fetched DICOM directory inside the volume builder.
const BUILDER_INPUT_MOUNT: &str = "/dicom";

/// Mount point of the job's `in/` directory inside the volume builder.
const BUILDER_OUTPUT_MOUNT: &str = "/out";

/// Header file the volume builder writes for volume `index`.
pub fn volume_header_name(index: usize) -> String {
    format!("{index}.mhd")
}

/// Copy every image of every distinct series into `dicom/<seriesUid>/`.
///
/// Returns the number of images written.
pub async fn fetch_series(
    repository: &dyn DicomRepository,
    request: &PluginJobRequest,
    dir: &JobDirectory,
) -> Result<u64, PipelineError> {
    let mut written = 0;
    for series_uid in request.distinct_series_uids() {
        let dest = dir
            .series_dir(series_uid)
            .map_err(|e| PipelineError::Staging(e.to_string()))?;
        written += fetch_one(repository, series_uid, &dest).await?;
    }
    Ok(written)
}

async fn fetch_one(
    repository: &dyn DicomRepository,
    series_uid: &str,
    dest: &Path,
) -> Result<u64, PipelineError> {
    let series = repository.get_series(series_uid).await?;
    tokio::fs::create_dir_all(dest)
        .await
        .map_err(|e| PipelineError::Staging(format!("{}: {e}", dest.display())))?;

    let mut count = 0;
    for image_no in series.images().iter() {
        let bytes = series.load(image_no).await?;
        let path = dest.join(image_file_name(image_no));
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| PipelineError::Staging(format!("{}: {e}", path.display())))?;
        count += 1;
    }
    tracing::debug!(series_uid, images = count, "Series fetched");
    Ok(count)
}

/// Container spec of the volume-builder run for series entry `index`.
pub fn volume_builder_spec(
    config: &PipelineConfig,
    dir: &JobDirectory,
    job_id: &str,
    index: usize,
    series: &JobSeries,
) -> Result<ContainerSpec, PipelineError> {
    let series_dir = dir
        .series_dir(&series.series_uid)
        .map_err(|e| PipelineError::Staging(e.to_string()))?;

    let mut command = vec![
        "dicom_voxel_dump".to_string(),
        "combined".into(),
        "--input".into(),
        BUILDER_INPUT_MOUNT.into(),
        "--out".into(),
        BUILDER_OUTPUT_MOUNT.into(),
        "--name".into(),
        index.to_string(),
    ];
    if let Some(pvd) = &series.partial_volume_descriptor {
        command.extend([
            "--start".to_string(),
            pvd.start.to_string(),
            "--end".into(),
            pvd.end.to_string(),
            "--delta".into(),
            pvd.delta.to_string(),
        ]);
    }

    Ok(ContainerSpec::new(&config.volume_builder_image)
        .with_command(command)
        .with_bind(Bind::read_only(series_dir, BUILDER_INPUT_MOUNT))
        .with_bind(Bind::read_write(dir.in_dir(), BUILDER_OUTPUT_MOUNT))
        .with_user(config.container_user())
        .with_label(JOB_LABEL, job_id))
}

/// Run the volume builder once per series entry, in request order.
///
/// Volume `i` must appear as `in/<i>.mhd` afterwards; a run that leaves no
/// header behind fails with the builder's output in the message.
pub async fn build_volumes(
    runner: &ContainerRunner,
    config: &PipelineConfig,
    dir: &JobDirectory,
    job_id: &str,
    request: &PluginJobRequest,
) -> Result<(), PipelineError> {
    let options = RunOptions::with_timeout(config.volume_builder_timeout);
    for (index, series) in request.series.iter().enumerate() {
        let spec = volume_builder_spec(config, dir, job_id, index, series)?;
        let output = runner.run(&spec, options).await.map_err(|e| {
            PipelineError::from_container("volume builder", Some(&series.series_uid), e)
        })?;

        let header = dir.in_dir().join(volume_header_name(index));
        if !tokio::fs::try_exists(&header).await.unwrap_or(false) {
            return Err(PipelineError::VolumeBuild {
                series_uid: series.series_uid.clone(),
                message: format!("no volume was produced: {}", output.trim()),
            });
        }
        tracing::debug!(job_id, index, series_uid = %series.series_uid, "Volume built");
    }
    Ok(())
}
