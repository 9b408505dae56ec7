//! The identity assigner.
//!
//! For each merged detection, identity is resolved in strict precedence
//! order: anchor protection, then gallery similarity, then CSV hints, then
//! unmatched. A per-frame `assigned` set guarantees that no player name is
//! emitted twice within one frame. When two detections contest the same
//! gallery player, the higher similarity wins and the loser falls through
//! to the next source.

use std::collections::HashSet;

use tracing::{debug, warn};

use pitchid_models::{Assignment, MergedDetection};
use pitchid_store::GalleryStore;

use crate::config::EngineConfig;
use crate::engine::CancelFlag;
use crate::extractor::FeatureExtractor;
use crate::hints::HintTable;
use crate::protection::{ProtectedRecord, ProtectionResolver, TagProtection};

/// Confidence reported for CSV-hint assignments.
const CSV_HINT_CONFIDENCE: f32 = 0.9;

/// Everything the assigner consults for one frame. Snapshotted at frame
/// start; the assigner never mutates shared state.
pub struct FrameInputs<'a> {
    pub frame_num: u32,
    pub gallery: &'a GalleryStore,
    pub resolver: &'a ProtectionResolver,
    pub protected: &'a [ProtectedRecord],
    pub tag_protection: &'a TagProtection,
    pub hints: Option<&'a dyn HintTable>,
    pub extractor: Option<&'a dyn FeatureExtractor>,
}

/// One gallery candidate awaiting contention resolution.
struct GalleryCandidate {
    det_idx: usize,
    player_id: String,
    player_name: String,
    similarity: f32,
}

#[derive(Debug, Clone)]
pub struct IdentityAssigner {
    display_threshold: f32,
}

impl IdentityAssigner {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            display_threshold: config.gallery_display_threshold,
        }
    }

    /// Assign identities for one frame's merged detections.
    ///
    /// Returns one assignment per detection, in input order, plus whether
    /// the run was cancelled part-way (remaining detections come back
    /// unmatched).
    pub fn assign_frame(
        &self,
        inputs: &FrameInputs<'_>,
        detections: &[MergedDetection],
        cancel: &CancelFlag,
    ) -> (Vec<Assignment>, bool) {
        let mut slots: Vec<Option<Assignment>> = vec![None; detections.len()];
        let mut assigned: HashSet<String> = HashSet::new();
        let mut cancelled = false;

        // Anchor pass: ground truth first, in input order.
        for (idx, det) in detections.iter().enumerate() {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let record = inputs.resolver.best_match(
                inputs.protected,
                &det.bbox,
                inputs.frame_num,
                |name| !assigned.contains(&name.to_lowercase()),
            );
            if let Some(record) = record {
                let player_id = inputs
                    .gallery
                    .find_by_name(&record.player_name)
                    .map(|p| p.id.clone());
                assigned.insert(record.player_name.to_lowercase());
                debug!(
                    frame = inputs.frame_num,
                    player = %record.player_name,
                    anchor_frame = record.anchor_frame,
                    "Anchor protection forced assignment"
                );
                slots[idx] = Some(Assignment::anchor(player_id, record.player_name.clone()));
            }
        }

        // Gallery pass: gather each remaining detection's best match, then
        // award contested names to the highest similarity.
        let mut candidates: Vec<GalleryCandidate> = Vec::new();
        if !cancelled {
            for (idx, det) in detections.iter().enumerate() {
                if slots[idx].is_some() {
                    continue;
                }
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }

                let feature = match (&det.feature, inputs.extractor) {
                    (Some(f), _) => Some(f.clone()),
                    (None, Some(extractor)) => {
                        match extractor.extract(inputs.frame_num, &det.original_bbox) {
                            Ok(f) => Some(f),
                            Err(e) => {
                                // Best effort: this detection degrades to
                                // unmatched, the frame continues
                                warn!(
                                    frame = inputs.frame_num,
                                    error = %e,
                                    "Feature extraction failed for detection"
                                );
                                None
                            }
                        }
                    }
                    (None, None) => None,
                };

                let Some(feature) = feature else { continue };
                let Some((id, name, sim)) =
                    inputs.gallery.match_player(&feature, self.display_threshold)
                else {
                    continue;
                };

                if assigned.contains(&name.to_lowercase()) {
                    debug!(
                        frame = inputs.frame_num,
                        player = %name,
                        "Skipping gallery match; player already assigned"
                    );
                    continue;
                }

                candidates.push(GalleryCandidate {
                    det_idx: idx,
                    player_id: id,
                    player_name: name,
                    similarity: sim,
                });
            }
        }

        candidates.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.det_idx.cmp(&b.det_idx))
        });

        for candidate in candidates {
            if slots[candidate.det_idx].is_some()
                || assigned.contains(&candidate.player_name.to_lowercase())
            {
                continue;
            }

            // A fresh manual tag on this position overrides a divergent
            // gallery answer.
            let bbox = &detections[candidate.det_idx].bbox;
            if let Some(protected) = inputs.tag_protection.override_for(
                inputs.frame_num,
                bbox,
                &candidate.player_name,
            ) {
                if !assigned.contains(protected) {
                    let (player_id, display_name) = match inputs.gallery.find_by_name(protected) {
                        Some(p) => (Some(p.id.clone()), p.name.clone()),
                        None => (None, protected.to_string()),
                    };
                    assigned.insert(protected.to_string());
                    slots[candidate.det_idx] = Some(Assignment::anchor(player_id, display_name));
                }
                continue;
            }

            assigned.insert(candidate.player_name.to_lowercase());
            slots[candidate.det_idx] = Some(Assignment::gallery(
                candidate.player_id,
                candidate.player_name,
                candidate.similarity,
            ));
        }

        // CSV hint pass for whatever is still unassigned.
        if let Some(hints) = inputs.hints {
            for (idx, det) in detections.iter().enumerate() {
                if slots[idx].is_some() || cancelled {
                    continue;
                }
                if cancel.is_cancelled() {
                    cancelled = true;
                    break;
                }

                let hit = det
                    .track_id
                    .and_then(|tid| hints.lookup_track(inputs.frame_num, tid))
                    .or_else(|| hints.lookup_bbox(inputs.frame_num, &det.bbox));

                let Some(hit) = hit else { continue };
                if hit.player_name.is_empty() || assigned.contains(&hit.player_name.to_lowercase())
                {
                    continue;
                }

                let player_id = inputs
                    .gallery
                    .find_by_name(&hit.player_name)
                    .map(|p| p.id.clone());
                assigned.insert(hit.player_name.to_lowercase());
                slots[idx] = Some(Assignment::csv_hint(
                    player_id,
                    hit.player_name,
                    CSV_HINT_CONFIDENCE,
                ));
            }
        }

        let assignments = slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(Assignment::unmatched))
            .collect();
        (assignments, cancelled)
    }
}
