//! The optional Re-ID feature extractor collaborator.

use thiserror::Error;

use pitchid_models::{BBox, FeatureVector};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Feature extraction failed: {0}")]
    Failed(String),
}

/// Extracts appearance features for a player crop.
///
/// Implementations own their video/frame access; the engine only knows the
/// frame number and the crop. Extraction runs on the *original* detection
/// bbox, not the expanded one, and a failure degrades that detection to
/// unmatched without aborting the frame.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, frame_num: u32, bbox: &BBox) -> Result<FeatureVector, ExtractError>;
}
