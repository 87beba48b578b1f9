//! Core library for reconstructing the layers of a container image. The crate
//! exports an image from a container engine into a temporary tar file, walks
//! the archive while building one file tree per layer concurrently, and
//! reconciles those trees with the image history into an ordered layer set.

mod archive_utils;
/// Pipeline entry points tying acquisition, walking and reconciliation together.
pub mod analyzer;
/// Environment-driven defaults.
pub mod config;
/// Container engine abstraction and a Docker Engine API client.
pub mod engine;
pub mod error;
/// Per-layer tree construction.
pub mod layer;
/// Types that model `docker save` manifests and image configs.
pub mod manifest;
/// Progress tracking and display hooks.
pub mod progress;
/// Alignment of layer trees with image history.
pub mod reconcile;
/// Acquisition of image archives from the engine.
pub mod source;
pub mod tree;
/// Streaming walk over the exported image archive.
pub mod walker;

#[cfg(test)]
mod test_support;

pub use analyzer::{AnalyzeOptions, ImageAnalysis, analyze_archive, analyze_image};
pub use engine::{DockerEngine, ImageEngine};
pub use error::{AcquisitionError, ErrorKind, ImageError, Result};
pub use reconcile::Layer;
pub use tree::FileTree;
