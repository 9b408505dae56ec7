//! Player profiles and gallery reference frames.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::bbox::BBox;
use crate::feature::FeatureVector;

/// A stored crop of a player at a specific video frame.
///
/// Anchor-authored frames carry `confidence = 1.0`; frames harvested from
/// automatic matching carry the match similarity instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReferenceFrame {
    /// Absolute path of the source video
    pub video_path: String,
    /// Frame number within the video
    pub frame_num: u32,
    /// Player crop within the frame
    pub bbox: BBox,
    /// Detection confidence in [0, 1]; 1.0 for user-authored frames
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    /// Match similarity in [0, 1] when harvested from matching
    #[serde(default)]
    pub similarity: f32,
    /// Crop quality score in [0, 1]
    #[serde(default)]
    pub quality: f32,
    /// Whether this is the profile's primary crop
    #[serde(default)]
    pub is_primary: bool,
}

fn default_confidence() -> f32 {
    1.0
}

impl ReferenceFrame {
    /// Create a user-authored reference frame (confidence 1.0).
    pub fn authored(video_path: impl Into<String>, frame_num: u32, bbox: BBox) -> Self {
        Self {
            video_path: video_path.into(),
            frame_num,
            bbox,
            confidence: 1.0,
            similarity: 0.0,
            quality: 0.0,
            is_primary: false,
        }
    }
}

/// A known player in the persistent gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PlayerProfile {
    /// Stable opaque identifier, derived from the name on creation and
    /// never changed afterwards. Filled from the gallery map key on load.
    #[serde(default)]
    pub id: String,

    /// Display name
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jersey_number: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// General appearance features used for matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureVector>,

    /// Explicit full-body features (the original tool writes both slots)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_features: Option<FeatureVector>,

    /// Torso/jersey region features
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jersey_features: Option<FeatureVector>,

    /// Foot/shoe region features
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foot_features: Option<FeatureVector>,

    /// Stored crops, in insertion order; the first entry is treated as
    /// primary unless another is flagged
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reference_frames: Vec<ReferenceFrame>,

    /// Opaque rendering preferences, not interpreted by the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visualization_settings: Option<Map<String, Value>>,

    /// Creation time, used for "recent" ordering and match tie-breaking
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl PlayerProfile {
    /// Create an empty profile with the given id and display name.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            jersey_number: None,
            team: None,
            position: None,
            notes: None,
            tags: Vec::new(),
            features: None,
            body_features: None,
            jersey_features: None,
            foot_features: None,
            reference_frames: Vec::new(),
            visualization_settings: None,
            created_at: Utc::now(),
        }
    }

    /// The primary reference frame: the one flagged `is_primary`, or the
    /// first stored frame.
    pub fn primary_reference_frame(&self) -> Option<&ReferenceFrame> {
        self.reference_frames
            .iter()
            .find(|rf| rf.is_primary)
            .or_else(|| self.reference_frames.first())
    }
}

/// Aggregate identification-quality metrics for one profile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConfidenceMetrics {
    /// Monotone combination of the other three fields, clamped to [0, 1]
    pub overall_confidence: f32,
    /// Mean stored match similarity across reference frames
    pub avg_similarity: f32,
    /// Number of stored reference frames
    pub ref_frame_count: usize,
    /// Mean detection confidence across reference frames
    pub avg_detection_confidence: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_reference_frame_prefers_flagged() {
        let mut profile = PlayerProfile::new("alice", "Alice");
        let bbox = BBox::new(0.0, 0.0, 10.0, 20.0);
        profile
            .reference_frames
            .push(ReferenceFrame::authored("/v.mp4", 1, bbox));
        let mut flagged = ReferenceFrame::authored("/v.mp4", 7, bbox);
        flagged.is_primary = true;
        profile.reference_frames.push(flagged);

        assert_eq!(profile.primary_reference_frame().unwrap().frame_num, 7);
    }

    #[test]
    fn test_primary_reference_frame_falls_back_to_first() {
        let mut profile = PlayerProfile::new("bob", "Bob");
        let bbox = BBox::new(0.0, 0.0, 10.0, 20.0);
        profile
            .reference_frames
            .push(ReferenceFrame::authored("/v.mp4", 3, bbox));
        profile
            .reference_frames
            .push(ReferenceFrame::authored("/v.mp4", 9, bbox));

        assert_eq!(profile.primary_reference_frame().unwrap().frame_num, 3);
    }

    #[test]
    fn test_profile_deserializes_with_minimal_fields() {
        let json = r#"{ "name": "Carol" }"#;
        let profile: PlayerProfile = serde_json::from_str(json).unwrap();
        assert_eq!(profile.name, "Carol");
        assert!(profile.reference_frames.is_empty());
        assert!(profile.features.is_none());
    }
}
