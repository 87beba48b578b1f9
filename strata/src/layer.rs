use tar::EntryType;
use tokio_util::sync::CancellationToken;

use crate::archive_utils;
use crate::error::{ImageError, Result};
use crate::progress::{ProgressTracker, TaskProgress};
use crate::tree::{FileInfo, FileTree};
use crate::walker::Anomaly;

/// Finished tree of one layer plus whatever was skipped while reading it.
#[derive(Debug)]
pub struct LayerReport {
    pub tree: FileTree,
    pub anomalies: Vec<Anomaly>,
}

pub(crate) fn is_pseudo_header(entry_type: EntryType) -> bool {
    matches!(
        entry_type,
        EntryType::XGlobalHeader
            | EntryType::XHeader
            | EntryType::GNULongName
            | EntryType::GNULongLink
    )
}

/// Parse one embedded layer archive into a fresh tree named `name`.
///
/// Runs synchronously; callers dispatch it onto a blocking worker. Progress is
/// reported under the task key `name`, as processed / total entries.
pub fn build_layer_tree(
    name: &str,
    bytes: &[u8],
    tracker: &dyn ProgressTracker,
    cancel: &CancellationToken,
) -> Result<LayerReport> {
    let layer_error = |e: std::io::Error| ImageError::archive(&format!("layer {name}"), e);

    let mut anomalies = Vec::new();
    let mut infos = Vec::new();

    let mut archive = archive_utils::read_layer_bytes(bytes).map_err(layer_error)?;
    for entry in archive.entries().map_err(layer_error)? {
        if cancel.is_cancelled() {
            return Err(ImageError::Cancelled);
        }
        let entry = entry.map_err(layer_error)?;
        let entry_type = entry.header().entry_type();
        if is_pseudo_header(entry_type) {
            let path = entry.path().map(|p| p.to_string_lossy().to_string());
            let anomaly = Anomaly::new(
                name,
                &path.unwrap_or_default(),
                &format!("pseudo header {entry_type:?}"),
            );
            tracing::warn!(layer = name, entry = %anomaly.entry, "skipping {}", anomaly.reason);
            anomalies.push(anomaly);
            continue;
        }
        infos.push(FileInfo::from_entry(&entry).map_err(layer_error)?);
    }

    let mut tree = FileTree::new(name);
    let mut progress = TaskProgress::start(name, infos.len() as u64, tracker);
    for (idx, info) in infos.into_iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(ImageError::Cancelled);
        }
        let path = info.path.clone();
        tree.add_path(path, info);
        progress.update(idx as u64 + 1);
    }
    progress.finish();

    tracing::debug!(
        layer = name,
        entries = tree.entry_count(),
        size = tree.file_size(),
        "layer tree built"
    );

    Ok(LayerReport { tree, anomalies })
}
