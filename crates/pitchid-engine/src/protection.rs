//! Anchor protection and short-term tag protection.
//!
//! Two distinct shields keep user-authored identities from being flipped by
//! the gallery:
//!
//! - **Anchor protection** is persistent and wide: every anchor tag owns a
//!   `[frame - W, frame + W]` window (W = 150 frames by default) inside
//!   which its player identity dominates all other sources.
//! - **Short-term tag protection** is ephemeral and narrow: for a couple of
//!   frames after a manual tag, a gallery match that lands on the tagged
//!   bbox but names a different player is overridden.

use std::collections::HashMap;

use tracing::debug;

use pitchid_models::{AnchorTag, BBox};

use crate::config::EngineConfig;

/// Gallery overrides require this much overlap with the freshly tagged bbox.
const TAG_PROTECTION_IOU: f32 = 0.3;

/// One anchor whose protection window covers the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtectedRecord {
    pub player_name: String,
    pub anchor_frame: u32,
    pub bbox: BBox,
}

/// Resolves which anchors protect which positions at a given frame.
#[derive(Debug, Clone)]
pub struct ProtectionResolver {
    window_frames: u32,
    match_iou: f32,
    match_center_distance_px: f32,
}

impl ProtectionResolver {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            window_frames: config.anchor_protection_window_frames,
            match_iou: config.anchor_match_iou,
            match_center_distance_px: config.anchor_match_center_distance_px,
        }
    }

    /// All `(player, anchor_frame, bbox)` records whose protection windows
    /// cover `frame`.
    pub fn records_for_frame<'a, I>(&self, anchors: I, frame: u32) -> Vec<ProtectedRecord>
    where
        I: IntoIterator<Item = (&'a u32, &'a Vec<AnchorTag>)>,
    {
        let mut records = Vec::new();
        for (&anchor_frame, tags) in anchors {
            let start = anchor_frame.saturating_sub(self.window_frames);
            let end = anchor_frame + self.window_frames;
            if frame < start || frame > end {
                continue;
            }
            for tag in tags {
                if tag.player_name.is_empty() {
                    continue;
                }
                records.push(ProtectedRecord {
                    player_name: tag.player_name.clone(),
                    anchor_frame,
                    bbox: tag.bbox,
                });
            }
        }
        records
    }

    /// Lenient positional test between a live detection and a protected
    /// anchor bbox: players move a lot inside a 150-frame window.
    pub fn matches(&self, detection: &BBox, anchor: &BBox) -> bool {
        detection.iou(anchor) > self.match_iou
            || detection.center_distance(anchor) < self.match_center_distance_px
    }

    /// The winning record for a detection, among records whose player is
    /// still assignable.
    ///
    /// When several anchors' windows cover the detection, the nearest
    /// anchor frame wins; ties break toward larger IoU, then the earliest
    /// anchor frame.
    pub fn best_match<'a>(
        &self,
        records: &'a [ProtectedRecord],
        detection: &BBox,
        current_frame: u32,
        is_assignable: impl Fn(&str) -> bool,
    ) -> Option<&'a ProtectedRecord> {
        records
            .iter()
            .filter(|r| is_assignable(&r.player_name) && self.matches(detection, &r.bbox))
            .min_by(|a, b| {
                let da = a.anchor_frame.abs_diff(current_frame);
                let db = b.anchor_frame.abs_diff(current_frame);
                da.cmp(&db)
                    .then_with(|| {
                        detection
                            .iou(&b.bbox)
                            .partial_cmp(&detection.iou(&a.bbox))
                            .unwrap_or(std::cmp::Ordering::Equal)
                    })
                    .then_with(|| a.anchor_frame.cmp(&b.anchor_frame))
            })
    }
}

/// The ephemeral `{player -> (frame, bbox)}` map of recent manual tags.
#[derive(Debug, Default)]
pub struct TagProtection {
    window_frames: u32,
    entries: HashMap<String, (u32, BBox)>,
}

impl TagProtection {
    pub fn new(window_frames: u32) -> Self {
        Self {
            window_frames,
            entries: HashMap::new(),
        }
    }

    /// Record a manual tag. Keyed case-insensitively by player name.
    pub fn record(&mut self, player_name: &str, frame: u32, bbox: BBox) {
        self.entries
            .insert(player_name.to_lowercase(), (frame, bbox));
    }

    /// Drop entries whose window has passed. Called lazily per frame.
    pub fn expire(&mut self, current_frame: u32) {
        let window = self.window_frames as i64;
        self.entries
            .retain(|_, (frame, _)| current_frame as i64 - *frame as i64 <= window);
    }

    /// Whether a gallery match on `detection` naming `gallery_name` must be
    /// overridden by a recently tagged player.
    ///
    /// Returns the protected player's name when the detection overlaps the
    /// tagged bbox (IoU > 0.3), the tag is still inside its window, and the
    /// gallery named someone else.
    pub fn override_for(
        &self,
        current_frame: u32,
        detection: &BBox,
        gallery_name: &str,
    ) -> Option<&str> {
        let window = self.window_frames as i64;
        for (name, (frame, bbox)) in &self.entries {
            if current_frame as i64 - *frame as i64 > window {
                continue;
            }
            if detection.iou(bbox) > TAG_PROTECTION_IOU && !name.eq_ignore_ascii_case(gallery_name)
            {
                debug!(
                    protected = %name,
                    gallery = %gallery_name,
                    frame = current_frame,
                    "Recent manual tag overrides gallery match"
                );
                return Some(name);
            }
        }
        None
    }

    /// Whether `player_name` currently has an active tag entry.
    pub fn is_protected(&self, player_name: &str, current_frame: u32) -> bool {
        let window = self.window_frames as i64;
        self.entries
            .get(&player_name.to_lowercase())
            .is_some_and(|(frame, _)| current_frame as i64 - *frame as i64 <= window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn resolver() -> ProtectionResolver {
        ProtectionResolver::from_config(&EngineConfig::default())
    }

    fn anchors_at(entries: &[(u32, &str, BBox)]) -> BTreeMap<u32, Vec<AnchorTag>> {
        let mut map: BTreeMap<u32, Vec<AnchorTag>> = BTreeMap::new();
        for (frame, name, bbox) in entries {
            map.entry(*frame)
                .or_default()
                .push(AnchorTag::new(*name, *bbox));
        }
        map
    }

    #[test]
    fn test_window_covers_frame() {
        let anchors = anchors_at(&[(100, "Bob", BBox::new(100.0, 100.0, 200.0, 300.0))]);
        let r = resolver();

        assert_eq!(r.records_for_frame(&anchors, 100).len(), 1);
        assert_eq!(r.records_for_frame(&anchors, 250).len(), 1);
        assert_eq!(r.records_for_frame(&anchors, 251).len(), 0);
        // Window start clamps at zero
        assert_eq!(r.records_for_frame(&anchors, 0).len(), 1);
    }

    #[test]
    fn test_match_is_lenient() {
        let r = resolver();
        let anchor = BBox::new(100.0, 100.0, 200.0, 300.0);

        // Tiny overlap is enough
        assert!(r.matches(&BBox::new(190.0, 280.0, 290.0, 480.0), &anchor));
        // Disjoint but nearby centers
        assert!(r.matches(&BBox::new(250.0, 100.0, 350.0, 300.0), &anchor));
        // Far away
        assert!(!r.matches(&BBox::new(900.0, 100.0, 1000.0, 300.0), &anchor));
    }

    #[test]
    fn test_conflict_prefers_nearest_anchor_frame() {
        let bbox = BBox::new(100.0, 100.0, 200.0, 300.0);
        let anchors = anchors_at(&[(100, "Near", bbox), (240, "Far", bbox)]);
        let r = resolver();

        let records = r.records_for_frame(&anchors, 120);
        let best = r.best_match(&records, &bbox, 120, |_| true).unwrap();
        assert_eq!(best.player_name, "Near");
    }

    #[test]
    fn test_conflict_tie_prefers_larger_iou() {
        let on_target = BBox::new(100.0, 100.0, 200.0, 300.0);
        let offset = BBox::new(160.0, 100.0, 260.0, 300.0);
        let anchors = anchors_at(&[(90, "Offset", offset), (110, "OnTarget", on_target)]);
        let r = resolver();

        let records = r.records_for_frame(&anchors, 100);
        let best = r.best_match(&records, &on_target, 100, |_| true).unwrap();
        assert_eq!(best.player_name, "OnTarget");
    }

    #[test]
    fn test_best_match_skips_unassignable_players() {
        let bbox = BBox::new(100.0, 100.0, 200.0, 300.0);
        let anchors = anchors_at(&[(100, "Taken", bbox), (110, "Free", bbox)]);
        let r = resolver();

        let records = r.records_for_frame(&anchors, 105);
        let best = r
            .best_match(&records, &bbox, 105, |name| name != "Taken")
            .unwrap();
        assert_eq!(best.player_name, "Free");
    }

    #[test]
    fn test_tag_protection_expires() {
        let mut tp = TagProtection::new(2);
        let bbox = BBox::new(300.0, 100.0, 380.0, 300.0);
        tp.record("Carol", 500, bbox);

        assert!(tp.is_protected("Carol", 501));
        assert!(tp.is_protected("carol", 502));
        assert!(!tp.is_protected("Carol", 503));

        tp.expire(503);
        assert!(!tp.is_protected("Carol", 500));
    }

    #[test]
    fn test_tag_protection_overrides_different_gallery_name() {
        let mut tp = TagProtection::new(2);
        let tagged = BBox::new(300.0, 100.0, 380.0, 300.0);
        tp.record("Carol", 500, tagged);

        let detection = BBox::new(302.0, 101.0, 379.0, 301.0);
        assert_eq!(tp.override_for(501, &detection, "Dave"), Some("carol"));
        // Same player: no override needed
        assert_eq!(tp.override_for(501, &detection, "Carol"), None);
        // Window passed
        assert_eq!(tp.override_for(510, &detection, "Dave"), None);
    }
}
