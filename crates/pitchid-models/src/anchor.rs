//! Anchor tags: user-authored ground-truth identity pins.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::bbox::BBox;

/// A ground-truth tag pinning a player identity to a specific bbox at a
/// specific frame. Anchors always carry confidence 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
pub struct AnchorTag {
    /// Tracker id, if the tag was authored on top of a live track.
    /// Absent when authored from a still frame.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_id: Option<i64>,

    #[validate(length(min = 1, message = "player_name must be non-empty"))]
    pub player_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jersey_number: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,

    pub bbox: BBox,

    /// Always 1.0; anchors are ground truth
    #[serde(default = "default_anchor_confidence")]
    pub confidence: f32,
}

fn default_anchor_confidence() -> f32 {
    1.0
}

impl AnchorTag {
    /// Create a tag with confidence pinned to 1.0.
    pub fn new(player_name: impl Into<String>, bbox: BBox) -> Self {
        Self {
            track_id: None,
            player_name: player_name.into(),
            jersey_number: None,
            team: None,
            bbox,
            confidence: 1.0,
        }
    }

    /// Two tags are the same pin when name and bbox agree to the pixel.
    pub fn same_pin(&self, other: &AnchorTag) -> bool {
        self.player_name == other.player_name && self.bbox == other.bbox
    }
}

/// On-disk anchor record for one video.
///
/// `anchor_frames` keys arrive from the wild as either `"123"` or bare
/// integers that some writers stringify differently; keys are kept raw here
/// and normalized through [`AnchorFile::normalized_frames`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnchorFile {
    /// Absolute path of the video the tags belong to. Used for strict
    /// validation on load; files without it are only filename-matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<String>,

    /// frame number (stringified) -> tags at that frame
    #[serde(default)]
    pub anchor_frames: BTreeMap<String, Vec<AnchorTag>>,
}

impl AnchorFile {
    /// Build a file record from normalized in-memory frames.
    pub fn from_frames(
        video_path: impl Into<String>,
        frames: &BTreeMap<u32, Vec<AnchorTag>>,
    ) -> Self {
        Self {
            video_path: Some(video_path.into()),
            anchor_frames: frames
                .iter()
                .map(|(frame, tags)| (frame.to_string(), tags.clone()))
                .collect(),
        }
    }

    /// Parse frame keys to integers, merging entries whose keys are
    /// different spellings of the same frame (e.g. `"5"` and `"05"`).
    ///
    /// Returns the normalized map and a list of warnings: one per
    /// unparseable key (dropped) and one per merged duplicate spelling.
    /// Tags that are exact pins of an already-merged tag are deduplicated.
    pub fn normalized_frames(&self) -> (BTreeMap<u32, Vec<AnchorTag>>, Vec<String>) {
        let mut frames: BTreeMap<u32, Vec<AnchorTag>> = BTreeMap::new();
        let mut warnings = Vec::new();

        for (key, tags) in &self.anchor_frames {
            let frame: u32 = match key.trim().parse() {
                Ok(f) => f,
                Err(_) => {
                    warnings.push(format!("dropping anchor entry with invalid frame key {key:?}"));
                    continue;
                }
            };

            let entry = frames.entry(frame).or_default();
            if !entry.is_empty() {
                warnings.push(format!(
                    "frame {frame} appears under multiple key spellings; merging"
                ));
            }
            for tag in tags {
                if !entry.iter().any(|existing| existing.same_pin(tag)) {
                    entry.push(tag.clone());
                }
            }
        }

        (frames, warnings)
    }

    /// Total number of tags across all frames.
    pub fn tag_count(&self) -> usize {
        self.anchor_frames.values().map(Vec::len).sum()
    }
}
