//! Per-detection identity decisions.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Where an assignment's identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentSource {
    /// Ground-truth anchor tag within its protection window
    Anchor,
    /// Re-ID similarity match against the gallery
    Gallery,
    /// Positional match against an external tracking CSV
    CsvHint,
    /// No source produced an identity
    Unmatched,
}

/// The identity decision for one merged detection in one frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Assignment {
    /// Gallery id, when the player is known to the gallery
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<String>,

    /// Display name; absent only for unmatched detections
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,

    /// Confidence in [0, 1]; 1.0 when sourced from an anchor
    pub confidence: f32,

    pub source: AssignmentSource,
}

impl Assignment {
    /// An anchor-sourced assignment, always at confidence 1.0.
    pub fn anchor(player_id: Option<String>, player_name: impl Into<String>) -> Self {
        Self {
            player_id,
            player_name: Some(player_name.into()),
            confidence: 1.0,
            source: AssignmentSource::Anchor,
        }
    }

    /// A gallery match at the given similarity.
    pub fn gallery(player_id: impl Into<String>, player_name: impl Into<String>, similarity: f32) -> Self {
        Self {
            player_id: Some(player_id.into()),
            player_name: Some(player_name.into()),
            confidence: similarity,
            source: AssignmentSource::Gallery,
        }
    }

    /// A CSV-hint match, at the fixed hint confidence.
    pub fn csv_hint(player_id: Option<String>, player_name: impl Into<String>, confidence: f32) -> Self {
        Self {
            player_id,
            player_name: Some(player_name.into()),
            confidence,
            source: AssignmentSource::CsvHint,
        }
    }

    /// No identity could be established.
    pub fn unmatched() -> Self {
        Self {
            player_id: None,
            player_name: None,
            confidence: 0.0,
            source: AssignmentSource::Unmatched,
        }
    }

    /// Whether this assignment names a player.
    pub fn is_matched(&self) -> bool {
        self.player_name.is_some()
    }
}
