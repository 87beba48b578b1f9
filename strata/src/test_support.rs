//! In-memory fixtures shaped like `docker save` output.

use std::io;
use std::path::{Path, PathBuf};

use tar::{Builder, EntryType, Header};
use tokio_util::sync::CancellationToken;

use crate::progress::ProgressTracker;
use crate::source::FETCH_TASK;
use crate::walker::DISCOVER_TASK;

/// Cancels `token` as soon as a layer task reports that it started.
pub(crate) struct CancelOnLayerStart {
    pub token: CancellationToken,
}

impl ProgressTracker for CancelOnLayerStart {
    fn start(&self, task: &str, _total: u64) {
        if task != FETCH_TASK && task != DISCOVER_TASK {
            self.token.cancel();
        }
    }
    fn update(&self, _task: &str, _current: u64, _percent: u8) {}
    fn finish(&self, _task: &str) {}
}

pub(crate) struct LayerSpec {
    pub files: Vec<(String, usize)>,
    pub global_header: bool,
}

impl LayerSpec {
    pub fn files(files: &[(&str, usize)]) -> Self {
        Self {
            files: files.iter().map(|(p, s)| (p.to_string(), *s)).collect(),
            global_header: false,
        }
    }

    pub fn many(count: usize) -> Self {
        Self {
            files: (0..count).map(|i| (format!("data/f{i:05}"), 1)).collect(),
            global_header: false,
        }
    }
}

fn append_file(builder: &mut Builder<Vec<u8>>, path: &str, data: &[u8]) {
    let mut header = Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    builder.append_data(&mut header, path, data).unwrap();
}

fn append_dir(builder: &mut Builder<Vec<u8>>, path: &str) {
    let mut header = Header::new_gnu();
    header.set_entry_type(EntryType::Directory);
    header.set_size(0);
    header.set_mode(0o755);
    builder.append_data(&mut header, path, io::empty()).unwrap();
}

fn append_global_header(builder: &mut Builder<Vec<u8>>) {
    let data = b"15 comment=abc\n";
    let mut header = Header::new_ustar();
    header.set_entry_type(EntryType::XGlobalHeader);
    header.set_size(data.len() as u64);
    builder
        .append_data(&mut header, "pax_global_header", &data[..])
        .unwrap();
}

pub(crate) fn layer_tar(spec: &LayerSpec) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    if spec.global_header {
        append_global_header(&mut builder);
    }
    for (path, size) in &spec.files {
        append_file(&mut builder, path, &vec![b'x'; *size]);
    }
    builder.into_inner().unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum EntryOrder {
    ManifestFirst,
    ConfigFirst,
    ManifestLast,
}

pub(crate) struct ImageSpec {
    pub layers: Vec<LayerSpec>,
    /// `(created_by, empty_layer)` in config array order.
    pub history: Vec<(String, bool)>,
    pub diff_ids: Option<Vec<String>>,
    pub config_name: String,
    pub order: EntryOrder,
    pub include_manifest: bool,
    pub include_config: bool,
    pub corrupt_layer: Option<usize>,
    pub corrupt_manifest: bool,
}

impl ImageSpec {
    /// An image whose history is one non-empty entry per layer.
    pub fn new(layers: Vec<LayerSpec>) -> Self {
        let history = (0..layers.len())
            .map(|i| (format!("step {i}"), false))
            .collect();
        Self {
            layers,
            history,
            diff_ids: None,
            config_name: "config.json".to_string(),
            order: EntryOrder::ManifestFirst,
            include_manifest: true,
            include_config: true,
            corrupt_layer: None,
            corrupt_manifest: false,
        }
    }

    pub fn layer_path(idx: usize) -> String {
        format!("layer{idx:02}-0123456789abcdef/layer.tar")
    }

    pub fn layer_paths(&self) -> Vec<String> {
        (0..self.layers.len()).map(Self::layer_path).collect()
    }

    fn manifest_json(&self) -> String {
        serde_json::json!([{
            "Config": self.config_name,
            "RepoTags": ["strata/test:latest"],
            "Layers": self.layer_paths(),
        }])
        .to_string()
    }

    fn config_json(&self) -> String {
        let non_empty = self.history.iter().filter(|(_, empty)| !empty).count();
        let diff_ids = self
            .diff_ids
            .clone()
            .unwrap_or_else(|| (0..non_empty).map(|i| format!("sha256:d{i}")).collect());
        let history: Vec<_> = self
            .history
            .iter()
            .map(|(created_by, empty)| {
                serde_json::json!({
                    "created": "2024-01-01T00:00:00Z",
                    "author": "strata",
                    "created_by": created_by,
                    "empty_layer": empty,
                })
            })
            .collect();
        serde_json::json!({
            "architecture": "amd64",
            "os": "linux",
            "history": history,
            "rootfs": {"type": "layers", "diff_ids": diff_ids},
        })
        .to_string()
    }
}

pub(crate) fn image_tar(spec: &ImageSpec) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    let manifest = if spec.corrupt_manifest {
        "[{\"Config\": ".to_string()
    } else {
        spec.manifest_json()
    };
    let config = spec.config_json();

    let write_manifest = |builder: &mut Builder<Vec<u8>>| {
        if spec.include_manifest {
            append_file(builder, "manifest.json", manifest.as_bytes());
        }
    };
    let write_config = |builder: &mut Builder<Vec<u8>>| {
        if spec.include_config {
            append_file(builder, &spec.config_name, config.as_bytes());
        }
    };

    match spec.order {
        EntryOrder::ManifestFirst => {
            write_manifest(&mut builder);
            write_config(&mut builder);
        }
        EntryOrder::ConfigFirst => write_config(&mut builder),
        EntryOrder::ManifestLast => {}
    }

    for (idx, layer) in spec.layers.iter().enumerate() {
        let path = ImageSpec::layer_path(idx);
        let dir = path.trim_end_matches("layer.tar");
        append_dir(&mut builder, dir);
        append_file(&mut builder, &format!("{dir}VERSION"), b"1.0");
        let mut bytes = layer_tar(layer);
        if spec.corrupt_layer == Some(idx) {
            bytes = b"definitely not a tar archive, just some plain bytes".repeat(20);
        }
        append_file(&mut builder, &path, &bytes);
    }

    match spec.order {
        EntryOrder::ManifestFirst => {}
        EntryOrder::ConfigFirst => write_manifest(&mut builder),
        EntryOrder::ManifestLast => {
            write_config(&mut builder);
            write_manifest(&mut builder);
        }
    }

    builder.into_inner().unwrap()
}

pub(crate) fn write_image_tar(dir: &Path, spec: &ImageSpec) -> PathBuf {
    let path = dir.join("image.tar");
    std::fs::write(&path, image_tar(spec)).unwrap();
    path
}
