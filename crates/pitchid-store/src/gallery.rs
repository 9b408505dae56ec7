//! The persistent player gallery.
//!
//! Profiles are keyed by a stable id derived from the player name at
//! creation. Every successful mutation is persisted immediately through the
//! atomic JSON layer; a failed write rolls the in-memory state back so disk
//! and memory never diverge.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use pitchid_models::{ConfidenceMetrics, FeatureVector, PlayerProfile, ReferenceFrame};

use crate::error::{StoreError, StoreResult};
use crate::json_io::{safe_json_load, safe_json_save};
use crate::probe::FrameProber;

/// Weight of the mean match similarity in overall confidence.
const W_SIMILARITY: f32 = 0.4;
/// Weight of the reference-frame count term in overall confidence.
const W_REF_COUNT: f32 = 0.2;
/// Weight of the mean detection confidence in overall confidence.
const W_DETECTION: f32 = 0.4;
/// Reference-frame count at which the count term saturates.
const REF_COUNT_SATURATION: f32 = 10.0;

/// Ordering for [`GalleryStore::list_players`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameOrder {
    /// Case-insensitive alphabetical by display name
    Alphabetical,
    /// Insertion order: ascending creation time. Callers wanting a
    /// "latest additions" view reverse or tail this themselves.
    Recent,
}

/// Which feature slot a regional match searches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSlot {
    General,
    Jersey,
    Foot,
}

/// Partial profile update. `None` fields are left untouched; a present
/// `reference_frame` is appended, never replacing the stored list.
#[derive(Debug, Clone, Default)]
pub struct PlayerFields {
    pub jersey_number: Option<String>,
    pub team: Option<String>,
    pub position: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<Vec<String>>,
    pub features: Option<FeatureVector>,
    pub body_features: Option<FeatureVector>,
    pub jersey_features: Option<FeatureVector>,
    pub foot_features: Option<FeatureVector>,
    pub reference_frame: Option<ReferenceFrame>,
    pub visualization_settings: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Result of a duplicate-image sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DuplicateStats {
    pub removed: usize,
    pub players_touched: usize,
}

/// The gallery store: id -> profile, persisted as a single JSON object.
#[derive(Debug)]
pub struct GalleryStore {
    path: PathBuf,
    players: BTreeMap<String, PlayerProfile>,
}

impl GalleryStore {
    /// Open a gallery file, treating a missing file as an empty gallery.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let mut players: BTreeMap<String, PlayerProfile> = match safe_json_load(&path) {
            Ok(map) => map,
            Err(e) if e.is_not_found() => BTreeMap::new(),
            Err(e) => return Err(e),
        };

        // Ids live in the map keys on disk; mirror them into the profiles.
        for (id, profile) in players.iter_mut() {
            profile.id = id.clone();
        }

        info!(
            gallery = %path.display(),
            players = players.len(),
            "Opened player gallery"
        );
        Ok(Self { path, players })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Derive the stable id for a new player: lowercased, whitespace runs
    /// collapsed to `_`, everything else non-alphanumeric stripped.
    pub fn derive_player_id(name: &str) -> String {
        let mut id = String::with_capacity(name.len());
        let mut last_was_sep = false;
        for ch in name.trim().to_lowercase().chars() {
            if ch.is_whitespace() {
                if !last_was_sep && !id.is_empty() {
                    id.push('_');
                    last_was_sep = true;
                }
            } else if ch.is_alphanumeric() || ch == '_' {
                id.push(ch);
                last_was_sep = false;
            }
        }
        id.trim_end_matches('_').to_string()
    }

    /// Case-insensitive lookup by display name.
    pub fn find_by_name(&self, name: &str) -> Option<&PlayerProfile> {
        self.players
            .values()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    /// Add a player, or update the existing profile when a
    /// case-insensitive name match already exists. Returns the player id.
    pub fn add_player(&mut self, name: &str, fields: PlayerFields) -> StoreResult<String> {
        if let Some(existing) = self.find_by_name(name) {
            let id = existing.id.clone();
            debug!(player_id = %id, name, "Player exists, updating instead");
            self.update_player(&id, fields)?;
            return Ok(id);
        }

        let id = Self::derive_player_id(name);
        let mut profile = PlayerProfile::new(id.clone(), name);
        apply_fields(&mut profile, fields);

        self.players.insert(id.clone(), profile);
        if let Err(e) = self.persist() {
            self.players.remove(&id);
            return Err(e);
        }

        info!(player_id = %id, name, "Added player to gallery");
        Ok(id)
    }

    /// Partial update of an existing profile.
    pub fn update_player(&mut self, id: &str, fields: PlayerFields) -> StoreResult<()> {
        let profile = self
            .players
            .get_mut(id)
            .ok_or_else(|| StoreError::UnknownPlayer(id.to_string()))?;

        let previous = profile.clone();
        apply_fields(profile, fields);

        if let Err(e) = self.persist() {
            self.players.insert(id.to_string(), previous);
            return Err(e);
        }

        debug!(player_id = %id, "Updated player profile");
        Ok(())
    }

    pub fn get_player(&self, id: &str) -> Option<&PlayerProfile> {
        self.players.get(id)
    }

    /// Remove a profile. Returns whether it existed.
    pub fn remove_player(&mut self, id: &str) -> StoreResult<bool> {
        let Some(previous) = self.players.remove(id) else {
            return Ok(false);
        };

        if let Err(e) = self.persist() {
            self.players.insert(id.to_string(), previous);
            return Err(e);
        }

        info!(player_id = %id, "Removed player from gallery");
        Ok(true)
    }

    /// All `(id, name)` pairs in the requested order.
    pub fn list_players(&self, order: NameOrder) -> Vec<(String, String)> {
        let mut entries: Vec<&PlayerProfile> = self.players.values().collect();
        match order {
            NameOrder::Alphabetical => {
                entries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
            }
            NameOrder::Recent => {
                entries.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            }
        }
        entries
            .into_iter()
            .map(|p| (p.id.clone(), p.name.clone()))
            .collect()
    }

    /// Argmax cosine search over the general feature slot.
    ///
    /// Linear scan; galleries hold tens to hundreds of profiles. Ties break
    /// toward the earliest-created profile. Returns `(id, name, similarity)`
    /// only when the best similarity reaches `threshold`.
    pub fn match_player(
        &self,
        query: &FeatureVector,
        threshold: f32,
    ) -> Option<(String, String, f32)> {
        self.match_player_slot(query, FeatureSlot::General, threshold)
    }

    /// Argmax cosine search against a specific feature slot.
    pub fn match_player_slot(
        &self,
        query: &FeatureVector,
        slot: FeatureSlot,
        threshold: f32,
    ) -> Option<(String, String, f32)> {
        let mut ordered: Vec<&PlayerProfile> = self.players.values().collect();
        ordered.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let mut best: Option<(&PlayerProfile, f32)> = None;
        for profile in ordered {
            let stored = match slot {
                FeatureSlot::General => profile.features.as_ref(),
                FeatureSlot::Jersey => profile.jersey_features.as_ref(),
                FeatureSlot::Foot => profile.foot_features.as_ref(),
            };
            let Some(stored) = stored else { continue };

            let sim = query.cosine(stored);
            // Strict comparison keeps the earliest profile on equal scores
            if best.map_or(true, |(_, s)| sim > s) {
                best = Some((profile, sim));
            }
        }

        best.and_then(|(profile, sim)| {
            if sim >= threshold {
                Some((profile.id.clone(), profile.name.clone(), sim))
            } else {
                None
            }
        })
    }

    /// Walk all reference frames and drop every crop the prober rejects.
    ///
    /// Profiles emptied of reference frames are kept; deletion is always
    /// explicit. Returns `(removed_frames, players_touched)`.
    pub fn remove_unavailable_images(
        &mut self,
        prober: &dyn FrameProber,
        mut progress: Option<&mut dyn FnMut(usize, usize)>,
    ) -> StoreResult<(usize, usize)> {
        let snapshot = self.players.clone();
        let total = self.players.len();
        let mut removed = 0usize;
        let mut players_touched = 0usize;

        for (idx, profile) in self.players.values_mut().enumerate() {
            let before = profile.reference_frames.len();
            profile.reference_frames.retain(|rf| {
                let outcome = prober.probe(&rf.video_path, rf.frame_num, &rf.bbox);
                if !outcome.is_usable() {
                    debug!(
                        player_id = %profile.id,
                        video = %rf.video_path,
                        frame = rf.frame_num,
                        ?outcome,
                        "Dropping unavailable reference image"
                    );
                }
                outcome.is_usable()
            });

            let dropped = before - profile.reference_frames.len();
            if dropped > 0 {
                removed += dropped;
                players_touched += 1;
            }
            if let Some(cb) = progress.as_deref_mut() {
                cb(idx + 1, total);
            }
        }

        if removed > 0 {
            if let Err(e) = self.persist() {
                self.players = snapshot;
                return Err(e);
            }
            info!(removed, players_touched, "Removed unavailable gallery images");
        }
        Ok((removed, players_touched))
    }

    /// Drop duplicate reference frames within each profile.
    ///
    /// A frame duplicates an earlier one when it points at the same video
    /// and frame number and its bbox is identical or overlaps with IoU at
    /// or above `similarity_threshold` (default 0.99).
    pub fn remove_duplicate_gallery_images(
        &mut self,
        similarity_threshold: f32,
    ) -> StoreResult<DuplicateStats> {
        let snapshot = self.players.clone();
        let mut stats = DuplicateStats::default();

        for profile in self.players.values_mut() {
            let mut kept: Vec<ReferenceFrame> = Vec::with_capacity(profile.reference_frames.len());
            let mut dropped = 0usize;

            for rf in profile.reference_frames.drain(..) {
                let is_duplicate = kept.iter().any(|k| {
                    k.video_path == rf.video_path
                        && k.frame_num == rf.frame_num
                        && (k.bbox == rf.bbox || k.bbox.iou(&rf.bbox) >= similarity_threshold)
                });
                if is_duplicate {
                    dropped += 1;
                } else {
                    kept.push(rf);
                }
            }

            profile.reference_frames = kept;
            if dropped > 0 {
                stats.removed += dropped;
                stats.players_touched += 1;
            }
        }

        if stats.removed > 0 {
            if let Err(e) = self.persist() {
                self.players = snapshot;
                return Err(e);
            }
            info!(
                removed = stats.removed,
                players = stats.players_touched,
                "Removed duplicate gallery images"
            );
        }
        Ok(stats)
    }

    /// Aggregate identification-quality metrics for one profile.
    ///
    /// `overall_confidence` is monotone non-decreasing in each input and
    /// clamped to [0, 1].
    pub fn get_player_confidence_metrics(&self, id: &str) -> Option<ConfidenceMetrics> {
        let profile = self.players.get(id)?;
        let frames = &profile.reference_frames;
        let count = frames.len();

        let (avg_similarity, avg_detection_confidence) = if count == 0 {
            (0.0, 0.0)
        } else {
            let n = count as f32;
            (
                frames.iter().map(|rf| rf.similarity).sum::<f32>() / n,
                frames.iter().map(|rf| rf.confidence).sum::<f32>() / n,
            )
        };

        let count_term = (count as f32 / REF_COUNT_SATURATION).min(1.0);
        let overall = (W_SIMILARITY * avg_similarity
            + W_REF_COUNT * count_term
            + W_DETECTION * avg_detection_confidence)
            .clamp(0.0, 1.0);

        Some(ConfidenceMetrics {
            overall_confidence: overall,
            avg_similarity,
            ref_frame_count: count,
            avg_detection_confidence,
        })
    }

    /// Iterate all profiles.
    pub fn iter(&self) -> impl Iterator<Item = &PlayerProfile> {
        self.players.values()
    }

    fn persist(&self) -> StoreResult<()> {
        safe_json_save(&self.path, &self.players, true)
    }
}

fn apply_fields(profile: &mut PlayerProfile, fields: PlayerFields) {
    if let Some(v) = fields.jersey_number {
        profile.jersey_number = Some(v);
    }
    if let Some(v) = fields.team {
        profile.team = Some(v);
    }
    if let Some(v) = fields.position {
        profile.position = Some(v);
    }
    if let Some(v) = fields.notes {
        profile.notes = Some(v);
    }
    if let Some(v) = fields.tags {
        profile.tags = v;
    }
    if let Some(v) = fields.features {
        profile.features = Some(v);
    }
    if let Some(v) = fields.body_features {
        profile.body_features = Some(v);
    }
    if let Some(v) = fields.jersey_features {
        profile.jersey_features = Some(v);
    }
    if let Some(v) = fields.foot_features {
        profile.foot_features = Some(v);
    }
    if let Some(rf) = fields.reference_frame {
        profile.reference_frames.push(rf);
    }
    if let Some(v) = fields.visualization_settings {
        profile.visualization_settings = Some(v);
    }
}
