//! Persistent stores for the PitchID identity engine.
//!
//! This crate provides:
//! - Atomic JSON persistence with `.backup` sidecars (`json_io`)
//! - The player gallery with cosine-similarity search (`gallery`)
//! - The per-video anchor store with strict path validation (`anchor`)
//! - The event marker store (`events`)
//! - The `FrameProber` collaborator trait used by gallery image cleanup

pub mod anchor;
pub mod error;
pub mod events;
pub mod gallery;
pub mod json_io;
pub mod probe;

pub use anchor::{AnchorLoadSummary, AnchorState, AnchorStore};
pub use error::{StoreError, StoreResult};
pub use events::{EventMarkerStore, MarkerStatistics, EVENT_MERGE_WINDOW_FRAMES};
pub use gallery::{DuplicateStats, FeatureSlot, GalleryStore, NameOrder, PlayerFields};
pub use json_io::{safe_json_load, safe_json_save};
pub use probe::{FileExistenceProber, FrameProber, ProbeOutcome, MIN_CROP_SIDE_PX};
