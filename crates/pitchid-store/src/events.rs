//! The per-video event marker store.
//!
//! Markers are user-authored timeline annotations (passes, shots, goals, …)
//! kept sorted by frame number. They can be merged with detector-produced
//! events, where manual markers always win within the merge window.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::info;

use pitchid_models::{
    DetectedEvent, EventMarker, EventMarkerFile, EventType, MergedEvent, EVENT_MARKER_FILE_VERSION,
};

use crate::error::StoreResult;
use crate::json_io::{safe_json_load, safe_json_save};

/// Detected events within this many frames of a manual marker of the same
/// type are replaced by the marker.
pub const EVENT_MERGE_WINDOW_FRAMES: u32 = 5;

/// Aggregate marker statistics.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MarkerStatistics {
    pub total: usize,
    pub by_type: HashMap<EventType, usize>,
    pub frame_range: Option<(u32, u32)>,
}

/// Sorted list of event markers for one video.
#[derive(Debug, Default)]
pub struct EventMarkerStore {
    video_path: Option<String>,
    markers: Vec<EventMarker>,
}

impl EventMarkerStore {
    pub fn new(video_path: Option<String>) -> Self {
        Self {
            video_path,
            markers: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// Add a marker, keeping the list sorted by frame number.
    pub fn add_marker(&mut self, marker: EventMarker) {
        let at = self
            .markers
            .partition_point(|m| m.frame_num <= marker.frame_num);
        self.markers.insert(at, marker);
    }

    /// Remove markers at `frame`, optionally only of one type. Returns
    /// whether anything was removed.
    pub fn remove_at(&mut self, frame: u32, event_type: Option<EventType>) -> bool {
        let before = self.markers.len();
        self.markers.retain(|m| {
            m.frame_num != frame || event_type.is_some_and(|t| m.event_type != t)
        });
        self.markers.len() != before
    }

    /// All markers at exactly `frame`.
    pub fn markers_at(&self, frame: u32) -> Vec<&EventMarker> {
        self.markers.iter().filter(|m| m.frame_num == frame).collect()
    }

    /// Markers in the inclusive frame range.
    pub fn markers_in_range(&self, start: u32, end: u32) -> Vec<&EventMarker> {
        self.markers
            .iter()
            .filter(|m| m.frame_num >= start && m.frame_num <= end)
            .collect()
    }

    pub fn markers_by_type(&self, event_type: EventType) -> Vec<&EventMarker> {
        self.markers
            .iter()
            .filter(|m| m.event_type == event_type)
            .collect()
    }

    /// All markers, sorted by frame number.
    pub fn all_markers(&self) -> &[EventMarker] {
        &self.markers
    }

    /// Clear everything, or only one event type.
    pub fn clear(&mut self, event_type: Option<EventType>) {
        match event_type {
            None => self.markers.clear(),
            Some(t) => self.markers.retain(|m| m.event_type != t),
        }
    }

    pub fn statistics(&self) -> MarkerStatistics {
        let mut by_type = HashMap::new();
        for marker in &self.markers {
            *by_type.entry(marker.event_type).or_insert(0) += 1;
        }
        MarkerStatistics {
            total: self.markers.len(),
            by_type,
            frame_range: match (self.markers.first(), self.markers.last()) {
                (Some(first), Some(last)) => Some((first.frame_num, last.frame_num)),
                _ => None,
            },
        }
    }

    /// Default marker file path for a video: `<dir>/<basename>_event_markers.json`.
    pub fn default_path(video_path: &Path) -> PathBuf {
        let stem = video_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        video_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{stem}_event_markers.json"))
    }

    /// Save markers atomically. With `path = None` the default path derived
    /// from the attached video is used.
    pub fn save(&self, path: Option<&Path>) -> StoreResult<PathBuf> {
        let target = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let video = self
                    .video_path
                    .as_ref()
                    .ok_or(crate::error::StoreError::NoVideoLoaded)?;
                Self::default_path(Path::new(video))
            }
        };

        let file = EventMarkerFile {
            video_path: self.video_path.clone(),
            version: EVENT_MARKER_FILE_VERSION.to_string(),
            created_at: Utc::now(),
            markers: self.markers.clone(),
        };
        safe_json_save(&target, &file, true)?;
        info!(file = %target.display(), markers = self.markers.len(), "Saved event markers");
        Ok(target)
    }

    /// Load markers from `path`, replacing the current list. Returns the
    /// number of markers loaded.
    pub fn load(&mut self, path: &Path) -> StoreResult<usize> {
        let file: EventMarkerFile = safe_json_load(path)?;
        self.video_path = file.video_path.or(self.video_path.take());
        self.markers = file.markers;
        self.markers.sort_by_key(|m| m.frame_num);
        info!(file = %path.display(), markers = self.markers.len(), "Loaded event markers");
        Ok(self.markers.len())
    }

    /// Merge detector-produced events with the manual markers.
    ///
    /// A detected event within `window` frames of a manual marker of the
    /// same type is replaced by that marker; manual markers not consumed by
    /// any detected event are appended. The result is sorted by frame.
    pub fn merge_with_detected(
        &self,
        detected: &[DetectedEvent],
        window: u32,
    ) -> Vec<MergedEvent> {
        let mut merged = Vec::with_capacity(detected.len() + self.markers.len());
        let mut used_markers = vec![false; self.markers.len()];

        for event in detected {
            let nearby = self.markers.iter().enumerate().find(|(idx, m)| {
                !used_markers[*idx]
                    && m.event_type == event.event_type
                    && m.frame_num.abs_diff(event.frame_num) <= window
            });

            match nearby {
                Some((idx, marker)) => {
                    used_markers[idx] = true;
                    merged.push(MergedEvent {
                        frame_num: marker.frame_num,
                        event_type: marker.event_type,
                        confidence: marker.confidence,
                        player_name: marker.player_name.clone(),
                        is_manual: true,
                        detected_confidence: Some(event.confidence),
                    });
                }
                None => merged.push(MergedEvent {
                    frame_num: event.frame_num,
                    event_type: event.event_type,
                    confidence: event.confidence,
                    player_name: event.player_name.clone(),
                    is_manual: false,
                    detected_confidence: None,
                }),
            }
        }

        for (idx, marker) in self.markers.iter().enumerate() {
            if !used_markers[idx] {
                merged.push(MergedEvent {
                    frame_num: marker.frame_num,
                    event_type: marker.event_type,
                    confidence: marker.confidence,
                    player_name: marker.player_name.clone(),
                    is_manual: true,
                    detected_confidence: None,
                });
            }
        }

        merged.sort_by_key(|e| e.frame_num);
        merged
    }
}
