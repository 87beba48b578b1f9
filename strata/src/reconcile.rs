use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ImageError, Result};
use crate::manifest::{HistoryEntry, ImageConfig, ImageManifest};
use crate::tree::FileTree;
use crate::walker::{Anomaly, DISCOVER_TASK};

/// One filesystem layer of the image, oldest at index 0.
#[derive(Debug, Clone)]
pub struct Layer {
    pub history: HistoryEntry,
    pub index: usize,
    pub tree: Arc<FileTree>,
    /// Every layer tree in manifest order, shared by all layers of an image.
    pub ref_trees: Arc<Vec<Arc<FileTree>>>,
    pub tar_path: Option<String>,
    /// Set when the layer archive could not be read; `tree` is then empty.
    pub error: Option<String>,
}

impl Layer {
    pub fn is_usable(&self) -> bool {
        self.error.is_none()
    }
}

/// Layer trees arranged in manifest order.
#[derive(Debug)]
pub struct OrderedTrees {
    pub trees: Arc<Vec<Arc<FileTree>>>,
    pub failures: HashMap<usize, String>,
}

/// Arrange trees keyed by entry name into the manifest's oldest-first order.
///
/// A failed tree aborts unless `allow_partial` is set, in which case an empty
/// tree stands in and the failure is kept by position.
pub fn order_trees(
    manifest: &ImageManifest,
    mut by_name: HashMap<String, Result<FileTree>>,
    allow_partial: bool,
) -> Result<(OrderedTrees, Vec<Anomaly>)> {
    let mut resolved: HashMap<String, Arc<FileTree>> = HashMap::new();
    let mut trees = Vec::with_capacity(manifest.layer_tar_paths.len());
    let mut failures = HashMap::new();

    for (index, path) in manifest.layer_tar_paths.iter().enumerate() {
        if let Some(tree) = resolved.get(path) {
            trees.push(Arc::clone(tree));
            continue;
        }
        let tree = match by_name.remove(path) {
            Some(Ok(tree)) => tree,
            Some(Err(e)) if allow_partial => {
                tracing::warn!(layer = %path, "keeping unusable layer: {e}");
                failures.insert(index, e.to_string());
                FileTree::new(path)
            }
            Some(Err(e)) => return Err(e),
            None => {
                return Err(ImageError::DataConsistency(format!(
                    "manifest declares layer {path} but the archive has no such entry"
                )));
            }
        };
        let tree = Arc::new(tree);
        resolved.insert(path.clone(), Arc::clone(&tree));
        trees.push(tree);
    }

    let anomalies = by_name
        .into_keys()
        .map(|name| Anomaly::new(DISCOVER_TASK, &name, "layer not referenced by manifest"))
        .collect();

    Ok((
        OrderedTrees {
            trees: Arc::new(trees),
            failures,
        },
        anomalies,
    ))
}

/// Pair history with layer trees.
///
/// History is walked from its first element while the layer cursor runs down
/// from the newest tree; empty history entries do not move the cursor.
pub fn reconcile_layers(
    manifest: &ImageManifest,
    config: &ImageConfig,
    ordered: &OrderedTrees,
) -> Result<Vec<Layer>> {
    let trees = &ordered.trees;
    let non_empty = config.non_empty_history_count();
    if non_empty != trees.len() {
        return Err(ImageError::DataConsistency(format!(
            "image has {} layers but {non_empty} non-empty history entries",
            trees.len()
        )));
    }

    let mut slots: Vec<Option<Layer>> = (0..trees.len()).map(|_| None).collect();
    let mut cursor = trees.len();
    for entry in config.history.iter().filter(|h| !h.empty_layer) {
        let index = cursor.checked_sub(1).ok_or_else(|| {
            ImageError::Reconciliation("more non-empty history entries than layers".to_string())
        })?;
        cursor = index;

        if slots[index].is_some() {
            return Err(ImageError::Reconciliation(format!(
                "layer index {index} assigned twice"
            )));
        }

        let tree = Arc::clone(&trees[index]);
        let mut history = entry.clone();
        history.size = tree.file_size();
        slots[index] = Some(Layer {
            history,
            index,
            tree,
            ref_trees: Arc::clone(trees),
            tar_path: manifest.layer_tar_paths.get(index).cloned(),
            error: ordered.failures.get(&index).cloned(),
        });
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| {
                ImageError::Reconciliation(format!("no history entry for layer index {index}"))
            })
        })
        .collect()
}
