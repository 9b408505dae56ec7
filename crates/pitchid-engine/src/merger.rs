//! The detection merger.
//!
//! Collapses near-duplicate detections of the same player before identity
//! assignment. A group is formed by walking detections in detector order
//! and pulling in every later detection that overlaps the seed (IoU) or
//! looks like the same player (Re-ID cosine similarity). The group's
//! representative is its largest box.

use tracing::debug;

use pitchid_models::{BBox, Detection, MergedDetection};

use crate::config::EngineConfig;

/// Detections below this area are dropped outright as non-players.
const MIN_DETECTION_AREA_PX: f32 = 2000.0;
/// Aspect-ratio band (height/width) treated as ball-shaped.
const BALL_ASPECT_MIN: f32 = 0.8;
const BALL_ASPECT_MAX: f32 = 1.2;

/// Order-stable, deterministic detection merger.
#[derive(Debug, Clone)]
pub struct DetectionMerger {
    iou_threshold: f32,
    similarity_threshold: f32,
    expand_ratio: f32,
    ball_filter_enabled: bool,
    min_area: f32,
    min_height: f32,
    min_aspect_ratio: f32,
    frame_bounds: Option<(f32, f32)>,
}

impl DetectionMerger {
    pub fn from_config(config: &EngineConfig, frame_bounds: Option<(f32, f32)>) -> Self {
        Self {
            iou_threshold: config.merge_iou_threshold,
            similarity_threshold: config.merge_similarity_threshold,
            expand_ratio: config.bbox_expand_ratio,
            ball_filter_enabled: config.ball_filter_enabled,
            min_area: config.min_player_area_px as f32,
            min_height: config.min_player_height_px as f32,
            min_aspect_ratio: config.min_player_aspect_ratio,
            frame_bounds,
        }
    }

    /// Whether the pre-filter rejects this detection as a ball or other
    /// non-player object.
    fn is_filtered(&self, bbox: &BBox) -> bool {
        if !self.ball_filter_enabled {
            return false;
        }

        let area = bbox.area();
        let aspect = bbox.aspect_ratio();

        // Small and roughly square: the ball
        if area < self.min_area && (BALL_ASPECT_MIN..=BALL_ASPECT_MAX).contains(&aspect) {
            return true;
        }

        // Not player-shaped
        area < MIN_DETECTION_AREA_PX || bbox.height() < self.min_height || aspect < self.min_aspect_ratio
    }

    /// Merge one frame's detections.
    ///
    /// The output order follows the input order of each group's seed, and
    /// every output bbox is one of the (expanded) input boxes.
    pub fn merge(&self, detections: &[Detection]) -> Vec<MergedDetection> {
        // Pre-filter, keeping the original boxes for feature extraction
        let surviving: Vec<&Detection> = detections
            .iter()
            .filter(|d| d.bbox.is_valid() && !self.is_filtered(&d.bbox))
            .collect();

        if surviving.len() < detections.len() {
            debug!(
                raw = detections.len(),
                kept = surviving.len(),
                "Pre-filter dropped non-player detections"
            );
        }

        let expanded: Vec<BBox> = surviving
            .iter()
            .map(|d| d.bbox.expand(self.expand_ratio, self.frame_bounds))
            .collect();

        let mut merged = Vec::new();
        let mut used = vec![false; surviving.len()];

        for i in 0..surviving.len() {
            if used[i] {
                continue;
            }
            used[i] = true;

            let mut group = vec![i];
            for j in (i + 1)..surviving.len() {
                if used[j] {
                    continue;
                }

                let iou = expanded[i].iou(&expanded[j]);
                let similarity = match (&surviving[i].feature, &surviving[j].feature) {
                    (Some(a), Some(b)) => a.cosine(b),
                    _ => 0.0,
                };

                if iou > self.iou_threshold || similarity > self.similarity_threshold {
                    used[j] = true;
                    group.push(j);
                }
            }

            merged.push(self.build_merged(&group, &surviving, &expanded));
            if group.len() > 1 {
                debug!(members = group.len(), "Merged duplicate detections");
            }
        }

        merged
    }

    fn build_merged(
        &self,
        group: &[usize],
        detections: &[&Detection],
        expanded: &[BBox],
    ) -> MergedDetection {
        // Representative: largest expanded box (most complete view); the
        // earliest member keeps the spot on equal areas
        let mut rep = group[0];
        for &idx in &group[1..] {
            if expanded[idx].area() > expanded[rep].area() {
                rep = idx;
            }
        }

        // Feature: from the highest-confidence member that has one, again
        // first-wins on ties
        let mut feature_idx: Option<usize> = None;
        for &idx in group {
            if detections[idx].feature.is_none() {
                continue;
            }
            let replace = match feature_idx {
                Some(best) => detections[idx].confidence > detections[best].confidence,
                None => true,
            };
            if replace {
                feature_idx = Some(idx);
            }
        }
        let feature = feature_idx.and_then(|idx| detections[idx].feature.clone());

        let confidence = group
            .iter()
            .map(|idx| detections[*idx].confidence)
            .fold(0.0_f32, f32::max);

        MergedDetection {
            bbox: expanded[rep],
            original_bbox: detections[rep].bbox,
            members: group.iter().map(|idx| expanded[*idx]).collect(),
            confidence,
            feature,
            track_id: detections[rep].track_id,
        }
    }
}
