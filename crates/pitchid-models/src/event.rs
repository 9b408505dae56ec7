//! Timeline event markers.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Version of the event marker file format.
pub const EVENT_MARKER_FILE_VERSION: &str = "1.0";

/// Kinds of match events that can be marked on the timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Pass,
    Shot,
    Goal,
    Tackle,
    Save,
    Corner,
    FreeKick,
    Penalty,
    Offside,
    Custom,
}

impl EventType {
    /// All known event kinds, for statistics iteration.
    pub const ALL: [EventType; 10] = [
        EventType::Pass,
        EventType::Shot,
        EventType::Goal,
        EventType::Tackle,
        EventType::Save,
        EventType::Corner,
        EventType::FreeKick,
        EventType::Penalty,
        EventType::Offside,
        EventType::Custom,
    ];
}

/// A single user-authored event marker on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EventMarker {
    pub frame_num: u32,
    pub event_type: EventType,

    /// Timestamp in seconds from the start of the video
    pub timestamp: f64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team: Option<String>,

    /// Manual markers are always full confidence
    #[serde(default = "default_marker_confidence")]
    pub confidence: f32,

    /// Pitch position in normalized [0, 1] coordinates
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<[f32; 2]>,

    /// Event-specific extras, opaque to the engine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

fn default_marker_confidence() -> f32 {
    1.0
}

impl EventMarker {
    /// Create a manual marker at the given frame and timestamp.
    pub fn new(frame_num: u32, event_type: EventType, timestamp: f64) -> Self {
        Self {
            frame_num,
            event_type,
            timestamp,
            player_name: None,
            player_id: None,
            team: None,
            confidence: 1.0,
            position: None,
            metadata: None,
            notes: None,
            created_at: Some(Utc::now()),
        }
    }

    pub fn with_player(mut self, player_name: impl Into<String>) -> Self {
        self.player_name = Some(player_name.into());
        self
    }

    pub fn with_position(mut self, x: f32, y: f32) -> Self {
        self.position = Some([x, y]);
        self
    }
}

/// On-disk marker list for one video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EventMarkerFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_path: Option<String>,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub markers: Vec<EventMarker>,
}

/// An event produced by the automatic detector, consumed by marker merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectedEvent {
    pub frame_num: u32,
    pub event_type: EventType,
    pub confidence: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

/// One entry of the merged manual + detected event stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MergedEvent {
    pub frame_num: u32,
    pub event_type: EventType,
    pub confidence: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_name: Option<String>,

    /// Whether this entry came from a manual marker
    pub is_manual: bool,

    /// Original detector confidence when a manual marker replaced a
    /// detected event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_confidence: Option<f32>,
}
