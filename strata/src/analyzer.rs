use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config;
use crate::engine::ImageEngine;
use crate::error::Result;
use crate::manifest::{ImageConfig, ImageManifest};
use crate::progress::ProgressTracker;
use crate::reconcile::{self, Layer};
use crate::source;
use crate::tree::FileTree;
use crate::walker::{self, Anomaly};

#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    pub max_concurrent_layers: usize,
    pub acquire_timeout: Duration,
    pub tmp_dir: Option<PathBuf>,
    /// Keep going when a layer archive is corrupt, marking that layer unusable.
    pub allow_partial: bool,
}

impl Default for AnalyzeOptions {
    fn default() -> Self {
        Self {
            max_concurrent_layers: config::DEFAULT_MAX_CONCURRENT_LAYERS,
            acquire_timeout: Duration::from_secs(config::DEFAULT_ACQUIRE_TIMEOUT_SECS),
            tmp_dir: None,
            allow_partial: false,
        }
    }
}

impl AnalyzeOptions {
    pub fn from_env() -> Self {
        Self {
            max_concurrent_layers: config::get_max_concurrent_layers(),
            acquire_timeout: config::get_acquire_timeout(),
            tmp_dir: config::get_tmp_dir(),
            allow_partial: false,
        }
    }

    pub fn with_max_concurrent_layers(mut self, max: usize) -> Self {
        self.max_concurrent_layers = max.max(1);
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn with_tmp_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.tmp_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn with_allow_partial(mut self, allow_partial: bool) -> Self {
        self.allow_partial = allow_partial;
        self
    }
}

/// Result of a complete pipeline run. Owned by the caller; nothing on disk
/// outlives it.
#[derive(Debug)]
pub struct ImageAnalysis {
    pub manifest: ImageManifest,
    pub config: ImageConfig,
    /// Dense, indexed by `Layer::index`, oldest first.
    pub layers: Vec<Layer>,
    pub trees: Arc<Vec<Arc<FileTree>>>,
    pub anomalies: Vec<Anomaly>,
}

impl ImageAnalysis {
    pub fn total_size(&self) -> u64 {
        self.layers.iter().map(|l| l.history.size).sum()
    }
}

/// Analyze an image already exported to `path` in `docker save` format.
pub async fn analyze_archive(
    path: &Path,
    options: &AnalyzeOptions,
    tracker: Arc<dyn ProgressTracker>,
    cancel: &CancellationToken,
) -> Result<ImageAnalysis> {
    let walk =
        walker::walk_archive(path, options.max_concurrent_layers, tracker, cancel).await?;
    let config = ImageConfig::from_slice(&walk.config)?;

    tracing::info!(layers = walk.manifest.layer_tar_paths.len(), "building layers");
    let (ordered, stray) =
        reconcile::order_trees(&walk.manifest, walk.trees, options.allow_partial)?;
    let layers = reconcile::reconcile_layers(&walk.manifest, &config, &ordered)?;

    let mut anomalies = walk.anomalies;
    anomalies.extend(stray);

    Ok(ImageAnalysis {
        manifest: walk.manifest,
        config,
        layers,
        trees: ordered.trees,
        anomalies,
    })
}

/// Export `image_id` from the engine and analyze it. The temporary export is
/// removed before returning, on success and on failure.
pub async fn analyze_image<E: ImageEngine>(
    engine: &E,
    image_id: &str,
    options: &AnalyzeOptions,
    tracker: Arc<dyn ProgressTracker>,
    cancel: &CancellationToken,
) -> Result<ImageAnalysis> {
    let image = source::acquire(
        engine,
        image_id,
        options.acquire_timeout,
        options.tmp_dir.as_deref(),
        tracker.as_ref(),
        cancel,
    )
    .await?;

    let result = analyze_archive(image.tar_path(), options, tracker, cancel).await;

    let dir = image.dir().to_path_buf();
    if let Err(e) = image.close() {
        tracing::warn!(dir = %dir.display(), "failed to remove temporary export: {e}");
    }
    result
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::error::ErrorKind;
    use crate::manifest::MISSING_ID;
    use crate::progress::NoopProgress;
    use crate::source::tests::FakeEngine;
    use crate::test_support::{
        CancelOnLayerStart, EntryOrder, ImageSpec, LayerSpec, image_tar, write_image_tar,
    };

    fn noop() -> Arc<dyn ProgressTracker> {
        Arc::new(NoopProgress)
    }

    async fn analyze(spec: &ImageSpec, options: &AnalyzeOptions) -> Result<ImageAnalysis> {
        let dir = tempfile::tempdir().unwrap();
        let path = write_image_tar(dir.path(), spec);
        analyze_archive(&path, options, noop(), &CancellationToken::new()).await
    }

    fn assert_dense(analysis: &ImageAnalysis, expected: usize) {
        assert_eq!(analysis.layers.len(), expected);
        let indices: HashSet<usize> = analysis.layers.iter().map(|l| l.index).collect();
        assert_eq!(indices, (0..expected).collect::<HashSet<_>>());
        for (position, layer) in analysis.layers.iter().enumerate() {
            assert_eq!(layer.index, position);
            assert!(Arc::ptr_eq(&layer.ref_trees, &analysis.trees));
            assert_eq!(layer.ref_trees.len(), analysis.manifest.layer_tar_paths.len());
            assert_eq!(layer.history.size, layer.tree.file_size());
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_layers_of_very_different_sizes_join() {
        let layers = vec![
            LayerSpec::files(&[]),
            LayerSpec::files(&[("etc/os-release", 42)]),
            LayerSpec::many(10_000),
        ];
        let mut spec = ImageSpec::new(layers);
        spec.history = vec![
            ("COPY data".to_string(), false),
            ("ENV A=1".to_string(), true),
            ("RUN release".to_string(), false),
            ("ADD rootfs".to_string(), false),
        ];

        let analysis = analyze(&spec, &AnalyzeOptions::default()).await.unwrap();
        assert_dense(&analysis, 3);

        let sizes: Vec<u64> = analysis.trees.iter().map(|t| t.file_size()).collect();
        assert_eq!(sizes, vec![0, 42, 10_000]);
        assert_eq!(analysis.trees[2].entry_count(), 10_000);

        assert_eq!(analysis.layers[2].history.created_by, "COPY data");
        assert_eq!(analysis.layers[2].history.size, 10_000);
        assert_eq!(analysis.layers[0].history.created_by, "ADD rootfs");
        assert_eq!(
            analysis.layers[1].tar_path.as_deref(),
            Some(ImageSpec::layer_path(1).as_str())
        );
        assert_eq!(analysis.config.history[1].id, MISSING_ID);
        assert_eq!(analysis.manifest.repo_tags, vec!["strata/test:latest"]);
        assert_eq!(analysis.total_size(), 10_042);
    }

    #[tokio::test]
    async fn test_entry_order_does_not_matter() {
        for order in [
            EntryOrder::ManifestFirst,
            EntryOrder::ConfigFirst,
            EntryOrder::ManifestLast,
        ] {
            let mut spec = ImageSpec::new(vec![
                LayerSpec::files(&[("a", 1)]),
                LayerSpec::files(&[("b", 2)]),
            ]);
            spec.order = order;
            let analysis = analyze(&spec, &AnalyzeOptions::default()).await.unwrap();
            assert_dense(&analysis, 2);
        }
    }

    #[tokio::test]
    async fn test_single_worker_handles_many_layers() {
        let layers = (0..6)
            .map(|i| LayerSpec::files(&[("file", i + 1)]))
            .collect();
        let spec = ImageSpec::new(layers);
        let options = AnalyzeOptions::default().with_max_concurrent_layers(1);

        let analysis = analyze(&spec, &options).await.unwrap();
        assert_dense(&analysis, 6);
        for (idx, tree) in analysis.trees.iter().enumerate() {
            assert_eq!(tree.file_size(), idx as u64 + 1);
        }
    }

    #[tokio::test]
    async fn test_missing_manifest() {
        let mut spec = ImageSpec::new(vec![LayerSpec::files(&[("a", 1)])]);
        spec.include_manifest = false;
        let err = analyze(&spec, &AnalyzeOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArchiveFormat);
    }

    #[tokio::test]
    async fn test_missing_config() {
        let mut spec = ImageSpec::new(vec![LayerSpec::files(&[("a", 1)])]);
        spec.include_config = false;
        let err = analyze(&spec, &AnalyzeOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArchiveFormat);
    }

    #[tokio::test]
    async fn test_diff_id_mismatch() {
        let mut spec = ImageSpec::new(vec![
            LayerSpec::files(&[("a", 1)]),
            LayerSpec::files(&[("b", 1)]),
        ]);
        spec.diff_ids = Some(vec!["sha256:only-one".to_string()]);
        let err = analyze(&spec, &AnalyzeOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataConsistency);
    }

    #[tokio::test]
    async fn test_corrupt_layer() {
        let mut spec = ImageSpec::new(vec![
            LayerSpec::files(&[("a", 1)]),
            LayerSpec::files(&[("b", 2)]),
            LayerSpec::files(&[("c", 3)]),
        ]);
        spec.corrupt_layer = Some(1);

        let err = analyze(&spec, &AnalyzeOptions::default()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArchiveFormat);

        let options = AnalyzeOptions::default().with_allow_partial(true);
        let analysis = analyze(&spec, &options).await.unwrap();
        assert_dense(&analysis, 3);
        assert!(analysis.layers[0].is_usable());
        assert!(!analysis.layers[1].is_usable());
        assert!(analysis.layers[2].is_usable());
        assert_eq!(analysis.layers[2].history.size, 3);
    }

    #[tokio::test]
    async fn test_unrecognized_entries_are_reported() {
        let spec = ImageSpec::new(vec![LayerSpec::files(&[("a", 1)])]);
        let analysis = analyze(&spec, &AnalyzeOptions::default()).await.unwrap();
        assert!(
            analysis
                .anomalies
                .iter()
                .any(|a| a.entry.ends_with("VERSION"))
        );
    }

    #[tokio::test]
    async fn test_cancelled_walk() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ImageSpec::new(vec![LayerSpec::files(&[("a", 1)])]);
        let path = write_image_tar(dir.path(), &spec);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = analyze_archive(&path, &AnalyzeOptions::default(), noop(), &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancel_while_layers_run() {
        let dir = tempfile::tempdir().unwrap();
        let spec = ImageSpec::new((0..6).map(|_| LayerSpec::many(200)).collect());
        let path = write_image_tar(dir.path(), &spec);
        let cancel = CancellationToken::new();
        let tracker = Arc::new(CancelOnLayerStart {
            token: cancel.clone(),
        });

        let options = AnalyzeOptions::default().with_max_concurrent_layers(1);
        let err = analyze_archive(&path, &options, tracker, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_cancelled_image_removes_temporary_files() {
        let parent = tempfile::tempdir().unwrap();
        let options = AnalyzeOptions::default()
            .with_tmp_dir(parent.path())
            .with_max_concurrent_layers(1);
        let spec = ImageSpec::new((0..6).map(|_| LayerSpec::many(200)).collect());
        let engine = FakeEngine::new(image_tar(&spec));
        let cancel = CancellationToken::new();
        let tracker = Arc::new(CancelOnLayerStart {
            token: cancel.clone(),
        });

        let err = analyze_image(&engine, "busybox", &options, tracker, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(std::fs::read_dir(parent.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_analyze_image_removes_temporary_files() {
        let parent = tempfile::tempdir().unwrap();
        let options = AnalyzeOptions::default().with_tmp_dir(parent.path());
        let spec = ImageSpec::new(vec![
            LayerSpec::files(&[("a", 10)]),
            LayerSpec::files(&[("b", 20)]),
        ]);

        let engine = FakeEngine::new(image_tar(&spec));
        let cancel = CancellationToken::new();
        let analysis = analyze_image(&engine, "busybox", &options, noop(), &cancel)
            .await
            .unwrap();
        assert_dense(&analysis, 2);
        assert_eq!(std::fs::read_dir(parent.path()).unwrap().count(), 0);

        let mut broken = ImageSpec::new(vec![LayerSpec::files(&[("a", 10)])]);
        broken.include_manifest = false;
        let engine = FakeEngine::new(image_tar(&broken));
        let err = analyze_image(&engine, "busybox", &options, noop(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArchiveFormat);
        assert_eq!(std::fs::read_dir(parent.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_analyze_image_acquisition_failure() {
        let engine = FakeEngine::new(Vec::new());
        let err = analyze_image(
            &engine,
            "missing",
            &AnalyzeOptions::default(),
            noop(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Acquisition);
    }
}
