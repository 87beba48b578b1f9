use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use tempfile::TempDir;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

use crate::engine::ImageEngine;
use crate::error::AcquisitionError;
use crate::progress::{ProgressTracker, TaskProgress};

pub const FETCH_TASK: &str = "fetch";
const EXPORT_FILE_NAME: &str = "image.tar";

/// An exported image on local disk. The temporary directory holding it is
/// removed when this value is dropped or closed.
#[derive(Debug)]
pub struct AcquiredImage {
    dir: TempDir,
    tar_path: PathBuf,
    size: u64,
}

impl AcquiredImage {
    pub fn tar_path(&self) -> &Path {
        &self.tar_path
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Number of bytes written from the export stream.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Remove the temporary directory, reporting failures instead of
    /// swallowing them on drop.
    pub fn close(self) -> std::io::Result<()> {
        self.dir.close()
    }
}

async fn guarded<T, F>(
    future: F,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<T, AcquisitionError>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(AcquisitionError::Cancelled),
        result = tokio::time::timeout(timeout, future) => {
            result.map_err(|_| AcquisitionError::Timeout(timeout))
        }
    }
}

/// Export `image_id` from `engine` into a fresh temporary directory.
///
/// `timeout` bounds the inspection call, opening the export, and every chunk
/// read. The stream is drained completely before returning.
pub async fn acquire<E: ImageEngine>(
    engine: &E,
    image_id: &str,
    timeout: Duration,
    tmp_parent: Option<&Path>,
    tracker: &dyn ProgressTracker,
    cancel: &CancellationToken,
) -> Result<AcquiredImage, AcquisitionError> {
    let inspect = guarded(engine.inspect_image(image_id), timeout, cancel).await??;
    tracing::info!(image = image_id, size = inspect.size, "fetching image");

    let builder = {
        let mut builder = tempfile::Builder::new();
        builder.prefix("strata");
        builder
    };
    let dir = match tmp_parent {
        Some(parent) => builder.tempdir_in(parent)?,
        None => builder.tempdir()?,
    };
    let tar_path = dir.path().join(EXPORT_FILE_NAME);

    let mut stream = guarded(engine.export_image(image_id), timeout, cancel).await??;
    let mut writer = BufWriter::new(File::create(&tar_path).await?);
    let mut progress = TaskProgress::start(FETCH_TASK, inspect.size, tracker);
    let mut observed = 0u64;

    while let Some(chunk) = guarded(stream.next(), timeout, cancel).await? {
        let chunk = chunk?;
        writer.write_all(&chunk).await?;
        observed += chunk.len() as u64;
        progress.update(observed);
    }
    writer.flush().await?;
    progress.finish();

    if observed != inspect.size {
        tracing::debug!(
            expected = inspect.size,
            written = observed,
            "export size differs from inspected size"
        );
    }

    Ok(AcquiredImage {
        dir,
        tar_path,
        size: observed,
    })
}
