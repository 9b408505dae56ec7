//! The engine facade.
//!
//! `Engine` owns all identity state — gallery, anchors, tag protection,
//! hints — with an explicit lifecycle: construct, attach a video, process
//! frames, save, drop. It performs no blocking work during a frame; I/O
//! happens only in load/save operations.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use pitchid_models::{AnchorTag, Assignment, Detection, FeatureVector, MergedDetection};
use pitchid_store::{
    anchor::normalize_path, AnchorLoadSummary, AnchorState, AnchorStore, GalleryStore,
    PlayerFields,
};

use crate::assigner::{FrameInputs, IdentityAssigner};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::extractor::FeatureExtractor;
use crate::hints::{CsvHintTable, HintTable};
use crate::merger::DetectionMerger;
use crate::protection::{ProtectionResolver, TagProtection};

/// Cooperative cancellation flag, polled between detections and frames.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::Relaxed);
    }
}

/// Result of processing one frame.
///
/// `assignments[i]` is the identity decision for `detections[i]`. When
/// `cancelled` is set the frame was abandoned part-way and the unprocessed
/// detections report as unmatched.
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    pub detections: Vec<MergedDetection>,
    pub assignments: Vec<Assignment>,
    pub cancelled: bool,
}

/// The player identity engine.
pub struct Engine {
    config: EngineConfig,
    instance: String,
    gallery: GalleryStore,
    anchors: AnchorStore,
    tag_protection: TagProtection,
    resolver: ProtectionResolver,
    assigner: IdentityAssigner,
    hints: Option<Box<dyn HintTable>>,
    extractor: Option<Box<dyn FeatureExtractor>>,
    frame_bounds: Option<(f32, f32)>,
    cancel: CancelFlag,
}

impl Engine {
    /// Create an engine, opening (or initializing) the gallery at
    /// `config.gallery_path`.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        let gallery = GalleryStore::open(&config.gallery_path)?;
        let instance = format!("engine-{}", Uuid::new_v4());

        info!(
            instance = %instance,
            gallery = %config.gallery_path.display(),
            players = gallery.len(),
            "Engine created"
        );

        Ok(Self {
            resolver: ProtectionResolver::from_config(&config),
            assigner: IdentityAssigner::from_config(&config),
            tag_protection: TagProtection::new(config.short_term_tag_protection_frames),
            config,
            instance,
            gallery,
            anchors: AnchorStore::new(),
            hints: None,
            extractor: None,
            frame_bounds: None,
            cancel: CancelFlag::new(),
        })
    }

    /// Wire the optional Re-ID extractor collaborator.
    pub fn with_extractor(mut self, extractor: Box<dyn FeatureExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn gallery(&self) -> &GalleryStore {
        &self.gallery
    }

    /// Mutable gallery access for maintenance operations (image cleanup).
    pub fn gallery_mut(&mut self) -> &mut GalleryStore {
        &mut self.gallery
    }

    pub fn anchors(&self) -> &AnchorStore {
        &self.anchors
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Attach a video: load its matching anchor file (strictly validated)
    /// and auto-discover a sibling tracking CSV when no hint table is set.
    pub fn load_video(&mut self, path: &Path) -> EngineResult<AnchorLoadSummary> {
        let summary = self.anchors.load_for_video(path)?;

        if self.hints.is_none() {
            if let Some(csv_path) = CsvHintTable::discover(path) {
                match CsvHintTable::from_path(&csv_path) {
                    Ok(table) => {
                        info!(
                            file = %csv_path.display(),
                            frames = table.frame_count(),
                            "Auto-loaded tracking hints"
                        );
                        self.hints = Some(Box::new(table));
                    }
                    Err(e) => warn!(file = %csv_path.display(), error = %e, "Ignoring unreadable tracking CSV"),
                }
            }
        }

        Ok(summary)
    }

    /// Detach the current video, discarding unsaved anchors (warned) and
    /// any auto-discovered hints.
    pub fn close_video(&mut self) {
        self.anchors.close_video();
        self.hints = None;
    }

    /// Replace the hint table.
    pub fn set_csv_hints(&mut self, table: Box<dyn HintTable>) {
        self.hints = Some(table);
    }

    /// Supply pixel frame dimensions so bbox expansion can clamp. The
    /// engine never decodes video, so bounds come from the caller.
    pub fn set_frame_bounds(&mut self, bounds: Option<(f32, f32)>) {
        self.frame_bounds = bounds;
    }

    /// Author an anchor tag at `frame_num`: validates it, shields the
    /// player with short-term tag protection, appends it to the store, and
    /// persists when a video is attached.
    pub fn add_anchor(&mut self, frame_num: u32, tag: AnchorTag) -> EngineResult<()> {
        tag.validate()
            .map_err(|e| EngineError::invalid_input(e.to_string()))?;
        if !tag.bbox.is_valid() {
            return Err(EngineError::invalid_input("anchor bbox is degenerate"));
        }

        self.tag_protection
            .record(&tag.player_name, frame_num, tag.bbox);
        self.anchors.add_tag(frame_num, tag);

        if self.anchors.video_path().is_some() {
            self.anchors.save_for_video()?;
        }
        Ok(())
    }

    /// Drop all anchors for the active video. With a path argument, the
    /// clear only applies when it names the active video.
    pub fn clear_anchors(&mut self, video_path: Option<&Path>) {
        if let (Some(requested), Some(active)) = (video_path, self.anchors.video_path()) {
            if normalize_path(requested) != normalize_path(active) {
                warn!(
                    requested = %requested.display(),
                    active = %active.display(),
                    "Ignoring clear_anchors for a video that is not loaded"
                );
                return;
            }
        }
        self.anchors.clear();
    }

    /// Create or update a gallery player. Returns the player id.
    pub fn upsert_player(&mut self, name: &str, fields: PlayerFields) -> EngineResult<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::invalid_input("player name must be non-empty"));
        }
        Ok(self.gallery.add_player(name, fields)?)
    }

    /// Authoritative single-crop identification, for identity-altering
    /// callers (auto-naming a selected box, harvesting reference frames).
    /// Uses the stricter authoritative threshold rather than the display
    /// threshold the per-frame pass runs with.
    pub fn identify(&self, feature: &FeatureVector) -> Option<(String, String, f32)> {
        self.gallery
            .match_player(feature, self.config.gallery_authoritative_threshold)
    }

    /// Merge and identify one frame of detections.
    ///
    /// Never fails: per-detection problems degrade that detection to
    /// unmatched, and a cancellation request yields partial results with
    /// the `cancelled` marker set.
    pub fn process_frame(&mut self, frame_num: u32, detections: &[Detection]) -> FrameOutcome {
        self.tag_protection.expire(frame_num);

        let merger = DetectionMerger::from_config(&self.config, self.frame_bounds);
        let merged = merger.merge(detections);

        let protected = self
            .resolver
            .records_for_frame(self.anchors.frames(), frame_num);

        let inputs = FrameInputs {
            frame_num,
            gallery: &self.gallery,
            resolver: &self.resolver,
            protected: &protected,
            tag_protection: &self.tag_protection,
            hints: self.hints.as_deref(),
            extractor: self.extractor.as_deref(),
        };

        let (assignments, cancelled) = self.assigner.assign_frame(&inputs, &merged, &self.cancel);
        FrameOutcome {
            detections: merged,
            assignments,
            cancelled,
        }
    }

    /// Persist everything that has unsaved state.
    ///
    /// The gallery persists on every mutation, so this only flushes dirty
    /// anchors.
    pub fn save_all(&mut self) -> EngineResult<()> {
        if self.anchors.state() == AnchorState::Dirty && self.anchors.video_path().is_some() {
            self.anchors.save_for_video()?;
        }
        Ok(())
    }
}
