//! Contract for the external embedding model.
//!
//! The engine never runs inference itself. Whatever produces embeddings —
//! an ONNX session, a sidecar process, a remote service — sits behind this
//! trait, and its failure modes are reported distinctly so callers can
//! re-prompt for capture problems instead of guessing.

use thiserror::Error;

use crate::types::Embedding;

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("no face detected in the supplied image")]
    NoFaceDetected,
    #[error("multiple faces detected; supply an image containing exactly one face")]
    MultipleFacesDetected,
    #[error("image quality too low for reliable extraction")]
    LowImageQuality,
    #[error("extraction backend: {0}")]
    Backend(String),
}

/// Maps one face image to a fixed-length embedding.
///
/// Every embedding an implementation returns must have `dimensionality()`
/// values and carry `version()` as its extractor version — the matcher
/// refuses to compare across versions.
pub trait FeatureExtractor: Send {
    /// Fixed output dimensionality of this extractor.
    fn dimensionality(&self) -> usize;

    /// Model version stamped on every produced embedding.
    fn version(&self) -> &str;

    /// Extract an embedding from an encoded face image.
    fn extract(&mut self, image: &[u8]) -> Result<Embedding, ExtractionError>;
}
