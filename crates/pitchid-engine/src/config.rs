//! Engine configuration.

use std::path::PathBuf;

/// All tunables of the identity engine, grouped by the component that
/// consumes them. Constructed once and passed by reference; components
/// never mutate it.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Where the player gallery JSON lives
    pub gallery_path: PathBuf,

    /// Half-width of an anchor's protection window, in frames
    pub anchor_protection_window_frames: u32,

    /// IoU above which two detections are considered duplicates
    pub merge_iou_threshold: f32,
    /// Appearance similarity above which two detections are duplicates
    pub merge_similarity_threshold: f32,
    /// How much each surviving bbox is expanded per side
    pub bbox_expand_ratio: f32,

    /// Gallery similarity floor for display-grade matches
    pub gallery_display_threshold: f32,
    /// Gallery similarity floor for authoritative matches
    pub gallery_authoritative_threshold: f32,

    /// IoU above which a detection matches a protected anchor bbox
    pub anchor_match_iou: f32,
    /// Center distance (px) below which a detection matches a protected
    /// anchor bbox; lenient because players move within the window
    pub anchor_match_center_distance_px: f32,

    /// How long a fresh manual tag shields its player from gallery flips
    pub short_term_tag_protection_frames: u32,

    /// Whether the ball/small-object pre-filter runs at all
    pub ball_filter_enabled: bool,
    /// Area below which a roughly square detection is treated as the ball
    pub min_player_area_px: u32,
    /// Minimum detection height for a player
    pub min_player_height_px: u32,
    /// Minimum height/width ratio for a player
    pub min_player_aspect_ratio: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gallery_path: PathBuf::from("player_gallery.json"),
            anchor_protection_window_frames: 150,
            merge_iou_threshold: 0.5,
            merge_similarity_threshold: 0.85,
            bbox_expand_ratio: 0.05,
            gallery_display_threshold: 0.5,
            gallery_authoritative_threshold: 0.6,
            anchor_match_iou: 0.05,
            anchor_match_center_distance_px: 200.0,
            short_term_tag_protection_frames: 2,
            ball_filter_enabled: true,
            min_player_area_px: 3000,
            min_player_height_px: 80,
            min_player_aspect_ratio: 1.3,
        }
    }
}

impl EngineConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            gallery_path: std::env::var("PITCHID_GALLERY_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.gallery_path),
            anchor_protection_window_frames: env_parse(
                "PITCHID_ANCHOR_WINDOW_FRAMES",
                defaults.anchor_protection_window_frames,
            ),
            merge_iou_threshold: env_parse("PITCHID_MERGE_IOU", defaults.merge_iou_threshold),
            merge_similarity_threshold: env_parse(
                "PITCHID_MERGE_SIMILARITY",
                defaults.merge_similarity_threshold,
            ),
            bbox_expand_ratio: env_parse("PITCHID_BBOX_EXPAND_RATIO", defaults.bbox_expand_ratio),
            gallery_display_threshold: env_parse(
                "PITCHID_GALLERY_DISPLAY_THRESHOLD",
                defaults.gallery_display_threshold,
            ),
            gallery_authoritative_threshold: env_parse(
                "PITCHID_GALLERY_AUTHORITATIVE_THRESHOLD",
                defaults.gallery_authoritative_threshold,
            ),
            anchor_match_iou: env_parse("PITCHID_ANCHOR_MATCH_IOU", defaults.anchor_match_iou),
            anchor_match_center_distance_px: env_parse(
                "PITCHID_ANCHOR_MATCH_CENTER_DISTANCE_PX",
                defaults.anchor_match_center_distance_px,
            ),
            short_term_tag_protection_frames: env_parse(
                "PITCHID_TAG_PROTECTION_FRAMES",
                defaults.short_term_tag_protection_frames,
            ),
            ball_filter_enabled: env_parse("PITCHID_BALL_FILTER", defaults.ball_filter_enabled),
            min_player_area_px: env_parse("PITCHID_MIN_PLAYER_AREA", defaults.min_player_area_px),
            min_player_height_px: env_parse(
                "PITCHID_MIN_PLAYER_HEIGHT",
                defaults.min_player_height_px,
            ),
            min_player_aspect_ratio: env_parse(
                "PITCHID_MIN_PLAYER_ASPECT",
                defaults.min_player_aspect_ratio,
            ),
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_contract() {
        let config = EngineConfig::default();
        assert_eq!(config.anchor_protection_window_frames, 150);
        assert_eq!(config.merge_iou_threshold, 0.5);
        assert_eq!(config.merge_similarity_threshold, 0.85);
        assert_eq!(config.gallery_display_threshold, 0.5);
        assert_eq!(config.gallery_authoritative_threshold, 0.6);
        assert_eq!(config.anchor_match_iou, 0.05);
        assert_eq!(config.anchor_match_center_distance_px, 200.0);
        assert_eq!(config.short_term_tag_protection_frames, 2);
        assert!(config.ball_filter_enabled);
        assert_eq!(config.min_player_area_px, 3000);
        assert_eq!(config.min_player_height_px, 80);
        assert_eq!(config.min_player_aspect_ratio, 1.3);
    }
}
