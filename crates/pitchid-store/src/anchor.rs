//! The per-video anchor store.
//!
//! Anchor tags are ground-truth identity pins persisted next to the video in
//! `PlayerTagsSeed-<basename>.json` (and legacy spellings). Loading is
//! strict: a candidate file is accepted only when its recorded `video_path`,
//! normalized, equals the active video's normalized path. Filename-only
//! matches are allowed solely when the file carries no `video_path`, and
//! always with a warning. This prevents tags authored on a same-named video
//! in another folder from silently re-identifying players.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use tracing::{debug, info, warn};

use pitchid_models::{AnchorFile, AnchorTag};

use crate::error::{StoreError, StoreResult};
use crate::json_io::{safe_json_load, safe_json_save};

/// Per-video lifecycle of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnchorState {
    /// No video attached yet
    Unloaded,
    /// In sync with disk
    Loaded,
    /// Has unsaved tags
    Dirty,
}

/// What a load pass found on disk.
#[derive(Debug, Clone, Default)]
pub struct AnchorLoadSummary {
    /// The accepted file, when one was found
    pub loaded_from: Option<PathBuf>,
    /// Tags merged into the store
    pub tags_loaded: usize,
    /// Candidates rejected by path validation
    pub skipped: Vec<PathBuf>,
}

/// In-memory anchor tags for the active video, keyed by frame number.
#[derive(Debug)]
pub struct AnchorStore {
    video_path: Option<PathBuf>,
    /// File the tags were loaded from; reused as the save target when it
    /// was the `seed_config.json` fallback
    source_file: Option<PathBuf>,
    frames: BTreeMap<u32, Vec<AnchorTag>>,
    state: AnchorState,
}

impl Default for AnchorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AnchorStore {
    pub fn new() -> Self {
        Self {
            video_path: None,
            source_file: None,
            frames: BTreeMap::new(),
            state: AnchorState::Unloaded,
        }
    }

    pub fn state(&self) -> AnchorState {
        self.state
    }

    pub fn video_path(&self) -> Option<&Path> {
        self.video_path.as_deref()
    }

    /// Tags recorded at `frame`, if any.
    pub fn tags_at(&self, frame: u32) -> &[AnchorTag] {
        self.frames.get(&frame).map_or(&[], Vec::as_slice)
    }

    /// The full frame -> tags map.
    pub fn frames(&self) -> &BTreeMap<u32, Vec<AnchorTag>> {
        &self.frames
    }

    pub fn tag_count(&self) -> usize {
        self.frames.values().map(Vec::len).sum()
    }

    /// Append a tag at `frame`. A tag with the same player name and the
    /// same bbox to the pixel is coalesced into the existing entry.
    pub fn add_tag(&mut self, frame: u32, tag: AnchorTag) {
        let entry = self.frames.entry(frame).or_default();
        if entry.iter().any(|existing| existing.same_pin(&tag)) {
            debug!(frame, player = %tag.player_name, "Duplicate anchor pin coalesced");
            return;
        }
        entry.push(tag);
        self.state = AnchorState::Dirty;
    }

    /// Drop all tags. The store stays attached to the current video.
    pub fn clear(&mut self) {
        if !self.frames.is_empty() {
            self.frames.clear();
            self.state = AnchorState::Dirty;
        }
    }

    /// Attach the store to `video_path` and merge in any matching anchor
    /// file found next to it. Replaces previously loaded tags.
    pub fn load_for_video(&mut self, video_path: &Path) -> StoreResult<AnchorLoadSummary> {
        if self.state == AnchorState::Dirty {
            warn!(
                video = ?self.video_path,
                unsaved = self.tag_count(),
                "Discarding unsaved anchor tags on video change"
            );
        }
        self.frames.clear();
        self.source_file = None;
        self.video_path = Some(video_path.to_path_buf());
        self.state = AnchorState::Loaded;

        let mut summary = AnchorLoadSummary::default();
        let Some(dir) = video_path.parent() else {
            return Ok(summary);
        };
        let basename = video_stem(video_path);
        let expected = normalize_path(video_path);

        let mut accepted: Vec<(PathBuf, SystemTime, AnchorFile)> = Vec::new();
        let named = named_candidates(dir, &basename);
        for candidate in &named {
            self.try_accept(candidate, &expected, &mut accepted, &mut summary);
        }

        // Only when no named candidate was *accepted* (all missing or
        // rejected by validation): scan the directory for any other seed
        // file naming this video.
        if accepted.is_empty() {
            for candidate in scanned_candidates(dir, &basename, &named) {
                self.try_accept(&candidate, &expected, &mut accepted, &mut summary);
            }
        }

        // Newest accepted file wins
        accepted.sort_by(|a, b| b.1.cmp(&a.1));
        if let Some((path, _, file)) = accepted.into_iter().next() {
            let (frames, warnings) = file.normalized_frames();
            for w in warnings {
                warn!(file = %path.display(), "{w}");
            }
            for (frame, tags) in frames {
                let entry = self.frames.entry(frame).or_default();
                for tag in tags {
                    if !entry.iter().any(|existing| existing.same_pin(&tag)) {
                        entry.push(tag);
                    }
                }
            }
            summary.tags_loaded = self.tag_count();
            info!(
                file = %path.display(),
                tags = summary.tags_loaded,
                frames = self.frames.len(),
                "Loaded anchor tags"
            );
            self.source_file = Some(path.clone());
            summary.loaded_from = Some(path);
        } else {
            debug!(video = %video_path.display(), "No matching anchor file found");
        }

        self.state = AnchorState::Loaded;
        Ok(summary)
    }

    /// Validate one candidate and record the outcome: accepted files join
    /// `accepted` with their mtime, mismatches are warned and listed in
    /// `summary.skipped`.
    fn try_accept(
        &self,
        candidate: &Path,
        expected: &Path,
        accepted: &mut Vec<(PathBuf, SystemTime, AnchorFile)>,
        summary: &mut AnchorLoadSummary,
    ) {
        match self.inspect_candidate(candidate, expected) {
            Ok(Some(file)) => {
                let mtime = fs::metadata(candidate)
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                accepted.push((candidate.to_path_buf(), mtime, file));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(file = %candidate.display(), error = %e, "Skipping anchor candidate");
                summary.skipped.push(candidate.to_path_buf());
            }
        }
    }

    /// Read one candidate and validate it belongs to the active video.
    ///
    /// Returns `Ok(None)` for unreadable/invalid files (logged, not fatal)
    /// and `Err(VideoPathMismatch)` for files that belong to another video.
    fn inspect_candidate(
        &self,
        candidate: &Path,
        expected: &Path,
    ) -> StoreResult<Option<AnchorFile>> {
        let file: AnchorFile = match safe_json_load(candidate) {
            Ok(f) => f,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => {
                warn!(file = %candidate.display(), error = %e, "Unreadable anchor file");
                return Ok(None);
            }
        };

        match &file.video_path {
            Some(recorded) => {
                let recorded_norm = normalize_path(Path::new(recorded));
                if paths_equal(&recorded_norm, expected) {
                    debug!(file = %candidate.display(), "Anchor file verified by full path");
                    Ok(Some(file))
                } else {
                    Err(StoreError::VideoPathMismatch {
                        path: candidate.to_path_buf(),
                        expected: expected.display().to_string(),
                        found: recorded.clone(),
                    })
                }
            }
            None => {
                // Filename match only; never trusted silently
                warn!(
                    file = %candidate.display(),
                    "Anchor file has no video_path; accepting on filename match only"
                );
                Ok(Some(file))
            }
        }
    }

    /// Persist the current tags atomically next to the video.
    ///
    /// Tags already on disk are merged in first, deduplicating identical
    /// pins, so concurrent authoring sessions do not clobber each other.
    pub fn save_for_video(&mut self) -> StoreResult<PathBuf> {
        let video_path = self.video_path.clone().ok_or(StoreError::NoVideoLoaded)?;
        let target = self.save_target(&video_path);

        // Merge tags an earlier session may have written since our load
        if let Ok(existing) = safe_json_load::<AnchorFile>(&target) {
            let (frames, _) = existing.normalized_frames();
            for (frame, tags) in frames {
                let entry = self.frames.entry(frame).or_default();
                for tag in tags {
                    if !entry.iter().any(|e| e.same_pin(&tag)) {
                        entry.push(tag);
                    }
                }
            }
        }

        let file = AnchorFile::from_frames(video_path.display().to_string(), &self.frames);
        safe_json_save(&target, &file, true)?;

        info!(
            file = %target.display(),
            tags = self.tag_count(),
            "Saved anchor tags"
        );
        self.state = AnchorState::Loaded;
        Ok(target)
    }

    /// Detach from the current video, discarding unsaved tags with a
    /// warning.
    pub fn close_video(&mut self) {
        if self.state == AnchorState::Dirty {
            warn!(
                video = ?self.video_path,
                unsaved = self.tag_count(),
                "Closing video with unsaved anchor tags; changes discarded"
            );
        }
        self.video_path = None;
        self.source_file = None;
        self.frames.clear();
        self.state = AnchorState::Unloaded;
    }

    fn save_target(&self, video_path: &Path) -> PathBuf {
        let dir = video_path.parent().unwrap_or_else(|| Path::new("."));
        let default_target = dir.join(format!("PlayerTagsSeed-{}.json", video_stem(video_path)));

        // Keep writing to seed_config.json when that is where we loaded from
        match &self.source_file {
            Some(src) if src.file_name().is_some_and(|n| n == "seed_config.json") => src.clone(),
            _ => default_target,
        }
    }
}

/// The named anchor filename candidates for a video, in priority order,
/// filtered to those present on disk.
fn named_candidates(dir: &Path, basename: &str) -> Vec<PathBuf> {
    [
        format!("PlayerTagsSeed_{basename}.json"),
        format!("PlayerTagsSeed-{basename}.json"),
        format!("PlayerTagsSeed-{basename}-Project.json"),
        format!("PlayerTagsSeed-{basename}_optimized.json"),
        "seed_config.json".to_string(),
    ]
    .into_iter()
    .map(|name| dir.join(name))
    .filter(|p| p.exists())
    .collect()
}

/// Fallback scan: any `PlayerTagsSeed*.json` in the directory naming the
/// video, excluding the named candidates already tried.
fn scanned_candidates(dir: &Path, basename: &str, exclude: &[PathBuf]) -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with("PlayerTagsSeed")
                && name.ends_with(".json")
                && name.contains(basename)
                && !exclude.contains(&entry.path())
            {
                candidates.push(entry.path());
            }
        }
        candidates.sort();
    }
    candidates
}

fn video_stem(video_path: &Path) -> String {
    video_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Normalize a path for identity comparison: resolve symlinks when the path
/// exists, otherwise fall back to lexical `.`/`..` resolution.
pub fn normalize_path(path: &Path) -> PathBuf {
    if let Ok(canonical) = fs::canonicalize(path) {
        return canonical;
    }

    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(component.as_os_str());
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

#[cfg(windows)]
fn paths_equal(a: &Path, b: &Path) -> bool {
    a.to_string_lossy().to_lowercase() == b.to_string_lossy().to_lowercase()
}

#[cfg(not(windows))]
fn paths_equal(a: &Path, b: &Path) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;
    use pitchid_models::BBox;
    use tempfile::TempDir;

    fn tag(name: &str) -> AnchorTag {
        AnchorTag::new(name, BBox::new(100.0, 100.0, 200.0, 300.0))
    }

    fn write_anchor_file(path: &Path, video_path: Option<&str>, frame: u32, player: &str) {
        let mut frames = BTreeMap::new();
        frames.insert(frame, vec![tag(player)]);
        let mut file = AnchorFile::from_frames(video_path.unwrap_or_default(), &frames);
        if video_path.is_none() {
            file.video_path = None;
        }
        safe_json_save(path, &file, true).unwrap();
    }

    #[test]
    fn test_add_tag_coalesces_duplicates() {
        let mut store = AnchorStore::new();
        store.add_tag(10, tag("Alice"));
        store.add_tag(10, tag("Alice"));
        assert_eq!(store.tag_count(), 1);
        assert_eq!(store.state(), AnchorState::Dirty);
    }

    #[test]
    fn test_load_accepts_matching_video_path() {
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("MatchA.mp4");
        fs::write(&video, b"").unwrap();

        write_anchor_file(
            &dir.path().join("PlayerTagsSeed-MatchA.json"),
            Some(&video.display().to_string()),
            100,
            "Bob",
        );

        let mut store = AnchorStore::new();
        let summary = store.load_for_video(&video).unwrap();
        assert_eq!(summary.tags_loaded, 1);
        assert_eq!(store.tags_at(100)[0].player_name, "Bob");
        assert_eq!(store.state(), AnchorState::Loaded);
    }

    #[test]
    fn test_load_rejects_path_mismatch() {
        // A seed file for a same-named video in a different folder must be
        // ignored and leave the store empty.
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("MatchA.mp4");
        fs::write(&video, b"").unwrap();

        write_anchor_file(
            &dir.path().join("PlayerTagsSeed-MatchA.json"),
            Some("C:/foo/MatchA.mp4"),
            100,
            "Bob",
        );

        let mut store = AnchorStore::new();
        let summary = store.load_for_video(&video).unwrap();
        assert_eq!(summary.tags_loaded, 0);
        assert_eq!(store.tag_count(), 0);
        assert_eq!(summary.skipped.len(), 1);
    }

    #[test]
    fn test_rejected_named_candidate_falls_back_to_directory_scan() {
        // A stale seed file under the preferred name belongs to another
        // video; a matching seed file under a non-standard name must still
        // be found by the scan.
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("MatchA.mp4");
        fs::write(&video, b"").unwrap();
        let video_str = video.display().to_string();

        write_anchor_file(
            &dir.path().join("PlayerTagsSeed-MatchA.json"),
            Some("C:/foo/MatchA.mp4"),
            1,
            "Stale",
        );
        let scanned = dir.path().join("PlayerTagsSeed-MatchA-v2.json");
        write_anchor_file(&scanned, Some(&video_str), 2, "Bob");

        let mut store = AnchorStore::new();
        let summary = store.load_for_video(&video).unwrap();
        assert_eq!(summary.loaded_from.unwrap(), scanned);
        assert_eq!(summary.tags_loaded, 1);
        assert_eq!(store.tags_at(2)[0].player_name, "Bob");
        assert!(store.tags_at(1).is_empty());
        assert_eq!(summary.skipped.len(), 1);
    }

    #[test]
    fn test_load_accepts_pathless_file_on_filename_match() {
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("MatchA.mp4");
        fs::write(&video, b"").unwrap();

        write_anchor_file(&dir.path().join("PlayerTagsSeed-MatchA.json"), None, 7, "Carol");

        let mut store = AnchorStore::new();
        let summary = store.load_for_video(&video).unwrap();
        assert_eq!(summary.tags_loaded, 1);
    }

    #[test]
    fn test_newest_accepted_file_wins() {
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("MatchA.mp4");
        fs::write(&video, b"").unwrap();
        let video_str = video.display().to_string();

        let older = dir.path().join("PlayerTagsSeed-MatchA.json");
        let newer = dir.path().join("PlayerTagsSeed_MatchA.json");
        write_anchor_file(&older, Some(&video_str), 1, "Old");
        write_anchor_file(&newer, Some(&video_str), 2, "New");

        // Make mtimes unambiguous
        let old_time = filetime_secs_ago(&older, 60);
        assert!(old_time.is_ok());

        let mut store = AnchorStore::new();
        let summary = store.load_for_video(&video).unwrap();
        assert_eq!(summary.loaded_from.unwrap(), newer);
        assert_eq!(store.tags_at(2).len(), 1);
        assert!(store.tags_at(1).is_empty());
    }

    fn filetime_secs_ago(path: &Path, secs: u64) -> std::io::Result<()> {
        let mtime = SystemTime::now() - std::time::Duration::from_secs(secs);
        let file = fs::File::options().write(true).open(path)?;
        file.set_modified(mtime)
    }

    #[test]
    fn test_save_round_trip_and_dedup() {
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("MatchA.mp4");
        fs::write(&video, b"").unwrap();

        let mut store = AnchorStore::new();
        store.load_for_video(&video).unwrap();
        store.add_tag(100, tag("Bob"));
        store.add_tag(100, tag("Bob"));
        store.add_tag(250, tag("Alice"));
        let target = store.save_for_video().unwrap();
        assert_eq!(store.state(), AnchorState::Loaded);

        let mut reloaded = AnchorStore::new();
        let summary = reloaded.load_for_video(&video).unwrap();
        assert_eq!(summary.loaded_from.unwrap(), target);
        assert_eq!(reloaded.tag_count(), 2);
        assert_eq!(reloaded.tags_at(100)[0].player_name, "Bob");
    }

    #[test]
    fn test_save_without_video_errors() {
        let mut store = AnchorStore::new();
        store.add_tag(1, tag("Alice"));
        assert!(matches!(
            store.save_for_video().unwrap_err(),
            StoreError::NoVideoLoaded
        ));
    }

    #[test]
    fn test_normalize_path_lexical_fallback() {
        let normalized = normalize_path(Path::new("/a/b/../c/./d.mp4"));
        assert_eq!(normalized, PathBuf::from("/a/c/d.mp4"));
    }
}
