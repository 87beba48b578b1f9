use serde::{Deserialize, Serialize};

use crate::error::{ImageError, Result};

/// Content id assigned to history entries that carry no filesystem diff.
pub const MISSING_ID: &str = "<missing>";

/// One element of the `manifest.json` array written by `docker save`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageManifest {
    #[serde(rename = "Config")]
    pub config_path: String,

    #[serde(rename = "RepoTags", default)]
    pub repo_tags: Vec<String>,

    /// Layer archive entry names, oldest first.
    #[serde(rename = "Layers", default)]
    pub layer_tar_paths: Vec<String>,
}

impl ImageManifest {
    /// Parse `manifest.json`; only the first image of the array is used.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let manifests: Vec<ImageManifest> = serde_json::from_slice(bytes)
            .map_err(|e| ImageError::archive("invalid manifest.json", e))?;
        manifests
            .into_iter()
            .next()
            .ok_or_else(|| ImageError::ArchiveFormat("manifest.json lists no images".to_string()))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub architecture: Option<String>,

    #[serde(default)]
    pub os: Option<String>,

    #[serde(default)]
    pub created: Option<String>,

    #[serde(default)]
    pub history: Vec<HistoryEntry>,

    pub rootfs: RootFs,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HistoryEntry {
    /// Diff id of the layer this step produced, or [`MISSING_ID`].
    #[serde(skip)]
    pub id: String,

    /// Aggregate size of the layer tree, filled in during reconciliation.
    #[serde(skip)]
    pub size: u64,

    #[serde(default)]
    pub created: String,

    #[serde(default)]
    pub author: String,

    #[serde(default)]
    pub created_by: String,

    #[serde(default)]
    pub empty_layer: bool,

    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RootFs {
    #[serde(rename = "type", default)]
    pub fs_type: String,

    #[serde(default)]
    pub diff_ids: Vec<String>,
}

impl ImageConfig {
    /// Parse the config blob and assign each history entry its content id.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let mut config: ImageConfig = serde_json::from_slice(bytes)
            .map_err(|e| ImageError::archive("invalid image config", e))?;
        config.resolve_history_ids()?;
        Ok(config)
    }

    pub fn non_empty_history_count(&self) -> usize {
        self.history.iter().filter(|h| !h.empty_layer).count()
    }

    /// Walk history in array order, handing out diff ids to non-empty entries.
    pub fn resolve_history_ids(&mut self) -> Result<()> {
        let non_empty = self.non_empty_history_count();
        if non_empty != self.rootfs.diff_ids.len() {
            return Err(ImageError::DataConsistency(format!(
                "config lists {non_empty} non-empty history entries but {} diff ids",
                self.rootfs.diff_ids.len()
            )));
        }

        let mut diff_ids = self.rootfs.diff_ids.iter();
        for entry in self.history.iter_mut() {
            entry.id = if entry.empty_layer {
                MISSING_ID.to_string()
            } else {
                // counts were checked above
                diff_ids.next().cloned().unwrap_or_default()
            };
        }

        Ok(())
    }
}
