use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use tar::EntryType;
use tokio::runtime::Handle;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;

use crate::archive_utils;
use crate::error::{ImageError, Result};
use crate::layer::{self, LayerReport};
use crate::manifest::ImageManifest;
use crate::progress::{ProgressTracker, TaskProgress};
use crate::tree::FileTree;

pub const MANIFEST_NAME: &str = "manifest.json";
pub const LAYER_SUFFIX: &str = "layer.tar";
pub const DISCOVER_TASK: &str = "discover";

/// An entry that was skipped instead of failing the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Anomaly {
    /// Archive the entry lives in: the outer export or a layer name.
    pub archive: String,
    pub entry: String,
    pub reason: String,
}

impl Anomaly {
    pub fn new(archive: &str, entry: &str, reason: &str) -> Self {
        Self {
            archive: archive.to_string(),
            entry: entry.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Everything the outer archive yielded, after every layer task was joined.
#[derive(Debug)]
pub struct WalkOutput {
    pub manifest: ImageManifest,
    pub config: Vec<u8>,
    /// Layer trees keyed by raw entry name. A failed layer keeps its error so
    /// the caller decides whether siblings are still usable.
    pub trees: HashMap<String, Result<FileTree>>,
    pub anomalies: Vec<Anomaly>,
}

struct LayerResult {
    name: String,
    result: Result<LayerReport>,
}

#[derive(Default)]
struct ScanSummary {
    manifest: Option<ImageManifest>,
    config: Option<Vec<u8>>,
    json_candidates: HashMap<String, Vec<u8>>,
    dispatched: Vec<String>,
    anomalies: Vec<Anomaly>,
}

/// Hands layer blobs to a bounded pool of blocking workers. Results go back
/// over `tx`; the receiver sees the channel close once the scan and every
/// worker have dropped their sender.
struct Dispatcher {
    handle: Handle,
    slots: Arc<Semaphore>,
    tx: mpsc::UnboundedSender<LayerResult>,
    tracker: Arc<dyn ProgressTracker>,
    cancel: CancellationToken,
}

impl Dispatcher {
    fn dispatch(&self, name: String, bytes: Vec<u8>) -> Result<()> {
        let permit = self.handle.block_on(async {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(ImageError::Cancelled),
                permit = self.slots.clone().acquire_owned() => {
                    permit.map_err(|_| ImageError::Cancelled)
                }
            }
        })?;

        tracing::debug!(layer = %name, bytes = bytes.len(), "dispatching layer");

        let tx = self.tx.clone();
        let tracker = Arc::clone(&self.tracker);
        let cancel = self.cancel.clone();
        self.handle.spawn_blocking(move || {
            let result = layer::build_layer_tree(&name, &bytes, tracker.as_ref(), &cancel);
            drop(permit);
            // the receiver only goes away when the walk itself was dropped
            let _ = tx.send(LayerResult { name, result });
        });
        Ok(())
    }
}

/// Stream the exported image at `path`, building one tree per layer entry on
/// at most `max_concurrent_layers` workers.
///
/// Returns only after every dispatched layer task has finished, whether the
/// walk succeeded or not.
pub async fn walk_archive(
    path: &Path,
    max_concurrent_layers: usize,
    tracker: Arc<dyn ProgressTracker>,
    cancel: &CancellationToken,
) -> Result<WalkOutput> {
    let (tx, rx) = mpsc::unbounded_channel();
    let dispatcher = Dispatcher {
        handle: Handle::current(),
        slots: Arc::new(Semaphore::new(max_concurrent_layers.max(1))),
        tx,
        tracker: Arc::clone(&tracker),
        cancel: cancel.child_token(),
    };

    let scan = {
        let path = path.to_path_buf();
        let cancel = cancel.clone();
        tokio::task::spawn_blocking(move || {
            let result = scan_archive(&path, &dispatcher, tracker.as_ref(), &cancel);
            if result.is_err() {
                dispatcher.cancel.cancel();
            }
            result
        })
    };

    let (scan, mut collected) = tokio::join!(scan, collect_layers(rx));
    let mut summary = scan.map_err(|e| ImageError::Io(std::io::Error::other(e)))??;

    if cancel.is_cancelled() {
        return Err(ImageError::Cancelled);
    }

    let manifest = summary
        .manifest
        .take()
        .ok_or_else(|| ImageError::ArchiveFormat(format!("{MANIFEST_NAME} not found")))?;
    let config = match summary.config.take() {
        Some(config) => config,
        None => summary
            .json_candidates
            .remove(&manifest.config_path)
            .ok_or_else(|| {
                ImageError::ArchiveFormat(format!(
                    "config {} not found in archive",
                    manifest.config_path
                ))
            })?,
    };
    for name in summary.json_candidates.keys() {
        summary
            .anomalies
            .push(Anomaly::new(DISCOVER_TASK, name, "unrecognized entry"));
    }

    let mut trees = HashMap::new();
    for name in summary.dispatched {
        let result = match collected.remove(&name) {
            Some(Ok(report)) => {
                summary.anomalies.extend(report.anomalies);
                Ok(report.tree)
            }
            Some(Err(e)) => {
                tracing::warn!(layer = %name, "layer failed: {e}");
                Err(e)
            }
            None if trees.contains_key(&name) => {
                summary
                    .anomalies
                    .push(Anomaly::new(DISCOVER_TASK, &name, "duplicate layer entry"));
                continue;
            }
            None => Err(ImageError::ArchiveFormat(format!(
                "layer task for {name} ended without a result"
            ))),
        };
        trees.insert(name, result);
    }

    tracing::info!(
        layers = trees.len(),
        anomalies = summary.anomalies.len(),
        "archive walk finished"
    );

    Ok(WalkOutput {
        manifest,
        config,
        trees,
        anomalies: summary.anomalies,
    })
}

async fn collect_layers(
    mut rx: mpsc::UnboundedReceiver<LayerResult>,
) -> HashMap<String, Result<LayerReport>> {
    let mut results = HashMap::new();
    while let Some(LayerResult { name, result }) = rx.recv().await {
        results.insert(name, result);
    }
    results
}

fn outer_error(e: std::io::Error) -> ImageError {
    ImageError::archive("outer archive", e)
}

/// Reads the body of `entry`, refusing sizes the archive of `archive_len`
/// bytes cannot hold.
fn read_entry<R: Read>(
    entry: &mut tar::Entry<'_, R>,
    name: &str,
    archive_len: u64,
) -> Result<Vec<u8>> {
    let size = entry.size();
    let remaining = archive_len.saturating_sub(entry.raw_file_position());
    if size > remaining {
        return Err(ImageError::ArchiveFormat(format!(
            "entry {name} declares {size} bytes but only {remaining} remain in the archive"
        )));
    }
    let mut bytes = Vec::with_capacity(size as usize);
    entry.read_to_end(&mut bytes).map_err(outer_error)?;
    if bytes.len() as u64 != size {
        return Err(ImageError::ArchiveFormat(format!(
            "entry {name} declares {size} bytes but {} were read",
            bytes.len()
        )));
    }
    Ok(bytes)
}

fn scan_archive(
    path: &Path,
    dispatcher: &Dispatcher,
    tracker: &dyn ProgressTracker,
    cancel: &CancellationToken,
) -> Result<ScanSummary> {
    let total = std::fs::metadata(path)?.len();
    let mut archive = archive_utils::read_tar_file(path)?;
    let mut progress = TaskProgress::start(DISCOVER_TASK, total, tracker);
    let mut summary = ScanSummary::default();
    let mut observed = 0u64;

    for entry in archive.entries().map_err(outer_error)? {
        if cancel.is_cancelled() {
            return Err(ImageError::Cancelled);
        }
        let mut entry = entry.map_err(outer_error)?;
        let name = entry.path().map_err(outer_error)?.to_string_lossy().to_string();
        let size = entry.size();
        observed += size;
        progress.update(observed);

        match entry.header().entry_type() {
            EntryType::Directory => continue,
            EntryType::Regular | EntryType::Continuous => {
                if name.ends_with(LAYER_SUFFIX) {
                    let bytes = read_entry(&mut entry, &name, total)?;
                    summary.dispatched.push(name.clone());
                    dispatcher.dispatch(name, bytes)?;
                } else if name == MANIFEST_NAME {
                    let bytes = read_entry(&mut entry, &name, total)?;
                    let manifest = ImageManifest::from_slice(&bytes)?;
                    tracing::debug!(config = %manifest.config_path, "found manifest");
                    summary.manifest = Some(manifest);
                } else if summary
                    .manifest
                    .as_ref()
                    .is_some_and(|m| m.config_path == name)
                {
                    summary.config = Some(read_entry(&mut entry, &name, total)?);
                } else if summary.manifest.is_none() && name.ends_with(".json") {
                    // config may precede the manifest
                    let bytes = read_entry(&mut entry, &name, total)?;
                    summary.json_candidates.insert(name, bytes);
                } else {
                    tracing::debug!(entry = %name, "skipping unrecognized entry");
                    summary
                        .anomalies
                        .push(Anomaly::new(DISCOVER_TASK, &name, "unrecognized entry"));
                }
            }
            other => {
                tracing::warn!(entry = %name, "skipping {other:?} entry");
                summary.anomalies.push(Anomaly::new(
                    DISCOVER_TASK,
                    &name,
                    &format!("unsupported entry type {other:?}"),
                ));
            }
        }
    }
    progress.finish();

    if let Some(manifest) = &summary.manifest {
        if summary.config.is_none() && !summary.json_candidates.contains_key(&manifest.config_path)
        {
            tracing::debug!(config = %manifest.config_path, "rescanning archive for config");
            summary.config = find_entry(path, &manifest.config_path, total, cancel)?;
            if summary.config.is_some() {
                summary.anomalies.retain(|a| a.entry != manifest.config_path);
            }
        }
    }

    Ok(summary)
}

/// Second pass over the archive looking for a single named entry.
fn find_entry(
    path: &Path,
    target: &str,
    archive_len: u64,
    cancel: &CancellationToken,
) -> Result<Option<Vec<u8>>> {
    let mut archive = archive_utils::read_tar_file(path)?;
    for entry in archive.entries().map_err(outer_error)? {
        if cancel.is_cancelled() {
            return Err(ImageError::Cancelled);
        }
        let mut entry = entry.map_err(outer_error)?;
        let name = entry.path().map_err(outer_error)?.to_string_lossy().to_string();
        if name == target {
            return read_entry(&mut entry, &name, archive_len).map(Some);
        }
    }
    Ok(None)
}
