//! Reference-frame probing.
//!
//! Video decoding lives outside the engine, so checking whether a stored
//! reference frame can still yield a usable crop is delegated to a
//! collaborator implementing [`FrameProber`]. The gallery's image cleanup
//! walks reference frames and removes every crop the prober rejects.

use std::path::Path;

use pitchid_models::BBox;

/// Crops smaller than this on either side are rejected as unusable.
pub const MIN_CROP_SIDE_PX: f32 = 30.0;

/// Verdict for one stored reference frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The crop can be decoded and looks like a player
    Usable,
    /// The video file no longer exists
    MissingFile,
    /// The frame cannot be decoded
    UnreadableFrame,
    /// The bbox falls outside the frame or is degenerate
    OutOfBounds,
    /// The decoded region is mostly the dominant field color
    FieldColorDominant,
    /// The crop is smaller than the minimum usable size
    TooSmall,
}

impl ProbeOutcome {
    pub fn is_usable(&self) -> bool {
        matches!(self, ProbeOutcome::Usable)
    }
}

/// Collaborator that inspects a stored (video, frame, bbox) triple.
#[cfg_attr(test, mockall::automock)]
pub trait FrameProber: Send + Sync {
    fn probe(&self, video_path: &str, frame_num: u32, bbox: &BBox) -> ProbeOutcome;
}

/// Minimal prober that checks only what can be known without decoding:
/// the video file must exist and the bbox must be a valid crop of usable
/// size. Frame readability and field-color dominance need a decoder and
/// are left to richer implementations.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileExistenceProber;

impl FrameProber for FileExistenceProber {
    fn probe(&self, video_path: &str, _frame_num: u32, bbox: &BBox) -> ProbeOutcome {
        if !Path::new(video_path).exists() {
            return ProbeOutcome::MissingFile;
        }
        if !bbox.is_valid() {
            return ProbeOutcome::OutOfBounds;
        }
        if bbox.width() < MIN_CROP_SIDE_PX || bbox.height() < MIN_CROP_SIDE_PX {
            return ProbeOutcome::TooSmall;
        }
        ProbeOutcome::Usable
    }
}
