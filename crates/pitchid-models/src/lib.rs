//! Shared data models for the PitchID identity engine.
//!
//! This crate provides Serde-serializable types for:
//! - Pixel-space bounding boxes with IoU/center-distance geometry
//! - Re-ID feature vectors and cosine similarity
//! - Player profiles and gallery reference frames
//! - Anchor tags (user-authored ground-truth identity pins)
//! - Raw and merged detections
//! - Per-frame identity assignments
//! - Timeline event markers

pub mod anchor;
pub mod assignment;
pub mod bbox;
pub mod detection;
pub mod event;
pub mod feature;
pub mod profile;

// Re-export common types
pub use anchor::{AnchorFile, AnchorTag};
pub use assignment::{Assignment, AssignmentSource};
pub use bbox::BBox;
pub use detection::{Detection, MergedDetection};
pub use event::{
    DetectedEvent, EventMarker, EventMarkerFile, EventType, MergedEvent, EVENT_MARKER_FILE_VERSION,
};
pub use feature::FeatureVector;
pub use profile::{ConfidenceMetrics, PlayerProfile, ReferenceFrame};
