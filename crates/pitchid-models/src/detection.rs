//! Raw detector output and merged per-frame detections.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::bbox::BBox;
use crate::feature::FeatureVector;

/// One raw detection as emitted by the object detector for a single frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Detection {
    pub bbox: BBox,

    /// Detector confidence in [0, 1]
    pub confidence: f32,

    /// Re-ID feature for this crop, when the detector-side extractor ran
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<FeatureVector>,

    /// Tracker id carried through to hint lookup, when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<i64>,
}

impl Detection {
    pub fn new(bbox: BBox, confidence: f32) -> Self {
        Self {
            bbox,
            confidence,
            feature: None,
            track_id: None,
        }
    }

    pub fn with_feature(mut self, feature: FeatureVector) -> Self {
        self.feature = Some(feature);
        self
    }

    pub fn with_track_id(mut self, track_id: i64) -> Self {
        self.track_id = Some(track_id);
        self
    }
}

/// The representative of a group of near-duplicate detections collapsed by
/// the merger.
///
/// `bbox` is the expanded representative box that downstream consumers see;
/// `original_bbox` is the pre-expansion box of the representative, which is
/// what feature extraction should crop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MergedDetection {
    pub bbox: BBox,
    pub original_bbox: BBox,

    /// Expanded boxes of every group member, representative included
    pub members: Vec<BBox>,

    /// Highest detector confidence within the group
    pub confidence: f32,

    /// Feature of the highest-confidence member that had one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<FeatureVector>,

    /// Tracker id of the representative member, when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<i64>,
}

impl MergedDetection {
    /// Number of raw detections collapsed into this one.
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}
