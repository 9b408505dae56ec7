//! External tracking hints.
//!
//! Analysis pipelines often leave a per-frame tracking CSV next to the
//! video. When gallery matching comes up empty, the assigner falls back to
//! these hints, matching detections to CSV rows positionally.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use pitchid_models::BBox;

use crate::error::{EngineError, EngineResult};

/// Minimum IoU between a detection and a CSV bbox for a positional match.
const CSV_MATCH_IOU: f32 = 0.3;

/// Identity suggested by a hint source.
#[derive(Debug, Clone, PartialEq)]
pub struct HintMatch {
    pub player_name: String,
    pub team: Option<String>,
    pub jersey_number: Option<String>,
}

/// Optional collaborator supplying per-frame identity hints.
pub trait HintTable: Send + Sync {
    /// Best positional match for a detection bbox at `frame`.
    fn lookup_bbox(&self, frame: u32, bbox: &BBox) -> Option<HintMatch>;

    /// Direct lookup by tracker id at `frame`.
    fn lookup_track(&self, frame: u32, track_id: i64) -> Option<HintMatch>;
}

#[derive(Debug, Clone, Default)]
struct CsvTrack {
    player_name: Option<String>,
    bbox: Option<BBox>,
    team: Option<String>,
    jersey_number: Option<String>,
}

/// Hint table backed by a tracking CSV.
///
/// Required columns: `frame` and one of `track_id`, `player_id`, `id`.
/// Optional: `player_name`, `x1`, `y1`, `x2`, `y2`, `team`, `jersey_number`.
#[derive(Debug, Default)]
pub struct CsvHintTable {
    frames: HashMap<u32, HashMap<i64, CsvTrack>>,
}

impl CsvHintTable {
    /// Parse a tracking CSV.
    pub fn from_path(path: &Path) -> EngineResult<Self> {
        let mut reader = csv::Reader::from_path(path)
            .map_err(|e| EngineError::hint_file(format!("{}: {e}", path.display())))?;

        let headers = reader
            .headers()
            .map_err(|e| EngineError::hint_file(format!("{}: {e}", path.display())))?
            .clone();

        let col = |name: &str| headers.iter().position(|h| h == name);

        let frame_col = col("frame")
            .ok_or_else(|| EngineError::hint_file(format!("{}: missing 'frame' column", path.display())))?;
        let track_col = col("track_id")
            .or_else(|| col("player_id"))
            .or_else(|| col("id"))
            .ok_or_else(|| {
                EngineError::hint_file(format!(
                    "{}: missing track_id/player_id/id column",
                    path.display()
                ))
            })?;

        let name_col = col("player_name");
        let team_col = col("team");
        let jersey_col = col("jersey_number");
        let bbox_cols = match (col("x1"), col("y1"), col("x2"), col("y2")) {
            (Some(x1), Some(y1), Some(x2), Some(y2)) => Some((x1, y1, x2, y2)),
            _ => None,
        };

        let mut frames: HashMap<u32, HashMap<i64, CsvTrack>> = HashMap::new();
        let mut rows = 0usize;

        for record in reader.records() {
            let record = match record {
                Ok(r) => r,
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "Skipping malformed CSV row");
                    continue;
                }
            };

            let Some(frame) = cell(&record, frame_col).and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            let Some(track_id) = cell(&record, track_col).and_then(|s| s.parse::<i64>().ok())
            else {
                continue;
            };

            let bbox = bbox_cols.and_then(|(x1, y1, x2, y2)| {
                Some(BBox::new(
                    cell(&record, x1)?.parse().ok()?,
                    cell(&record, y1)?.parse().ok()?,
                    cell(&record, x2)?.parse().ok()?,
                    cell(&record, y2)?.parse().ok()?,
                ))
            });

            frames.entry(frame).or_default().insert(
                track_id,
                CsvTrack {
                    player_name: name_col.and_then(|c| cell(&record, c)).map(str::to_owned),
                    bbox,
                    team: team_col.and_then(|c| cell(&record, c)).map(str::to_owned),
                    jersey_number: jersey_col.and_then(|c| cell(&record, c)).map(str::to_owned),
                },
            );
            rows += 1;
        }

        info!(
            file = %path.display(),
            rows,
            frames = frames.len(),
            "Loaded tracking hint CSV"
        );
        Ok(Self { frames })
    }

    /// Look for a tracking CSV next to the video, using the common sibling
    /// naming patterns. Returns the first that exists.
    pub fn discover(video_path: &Path) -> Option<PathBuf> {
        let dir = video_path.parent()?;
        let stem = video_path.file_stem()?.to_string_lossy();

        let patterns = [
            format!("{stem}_analyzed_tracking_data.csv"),
            format!("{stem}_tracking_data.csv"),
            format!("{stem}_analyzed.csv"),
            format!("{stem}.csv"),
        ];

        for name in patterns {
            let candidate = dir.join(&name);
            if candidate.exists() {
                debug!(file = %candidate.display(), "Discovered tracking CSV");
                return Some(candidate);
            }
        }
        None
    }

    /// Number of frames with at least one track entry.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Total track entries across all frames.
    pub fn track_count(&self) -> usize {
        self.frames.values().map(HashMap::len).sum()
    }
}

/// A trimmed cell, with blank and `nan`/`none` placeholders treated as
/// absent.
fn cell(record: &csv::StringRecord, idx: usize) -> Option<&str> {
    let value = record.get(idx)?.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("nan") || value.eq_ignore_ascii_case("none") {
        None
    } else {
        Some(value)
    }
}

impl HintTable for CsvHintTable {
    fn lookup_bbox(&self, frame: u32, bbox: &BBox) -> Option<HintMatch> {
        let tracks = self.frames.get(&frame)?;

        let mut best: Option<(&CsvTrack, f32)> = None;
        for track in tracks.values() {
            let Some(name) = &track.player_name else { continue };
            if name.is_empty() {
                continue;
            }
            let Some(csv_bbox) = &track.bbox else { continue };

            let iou = bbox.iou(csv_bbox);
            if iou > CSV_MATCH_IOU && best.map_or(true, |(_, b)| iou > b) {
                best = Some((track, iou));
            }
        }

        best.map(|(track, _)| HintMatch {
            player_name: track.player_name.clone().unwrap_or_default(),
            team: track.team.clone(),
            jersey_number: track.jersey_number.clone(),
        })
    }

    fn lookup_track(&self, frame: u32, track_id: i64) -> Option<HintMatch> {
        let track = self.frames.get(&frame)?.get(&track_id)?;
        let name = track.player_name.clone()?;
        if name.is_empty() {
            return None;
        }
        Some(HintMatch {
            player_name: name,
            team: track.team.clone(),
            jersey_number: track.jersey_number.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_csv(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    const SAMPLE: &str = "\
frame,track_id,player_name,x1,y1,x2,y2,team,jersey_number
150,3,Frank,100,100,200,300,Home,9
150,4,,300,100,400,300,Away,
151,3,Frank,105,102,205,302,Home,9
";

    #[test]
    fn test_parse_and_track_lookup() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(dir.path(), "m.csv", SAMPLE);

        let table = CsvHintTable::from_path(&path).unwrap();
        assert_eq!(table.frame_count(), 2);
        assert_eq!(table.track_count(), 3);

        let hit = table.lookup_track(150, 3).unwrap();
        assert_eq!(hit.player_name, "Frank");
        assert_eq!(hit.team.as_deref(), Some("Home"));
        assert_eq!(hit.jersey_number.as_deref(), Some("9"));

        // Track without a name yields nothing
        assert!(table.lookup_track(150, 4).is_none());
        assert!(table.lookup_track(999, 3).is_none());
    }

    #[test]
    fn test_bbox_lookup_requires_overlap() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(dir.path(), "m.csv", SAMPLE);
        let table = CsvHintTable::from_path(&path).unwrap();

        let close = BBox::new(102.0, 101.0, 202.0, 301.0);
        assert_eq!(table.lookup_bbox(150, &close).unwrap().player_name, "Frank");

        let far = BBox::new(800.0, 100.0, 900.0, 300.0);
        assert!(table.lookup_bbox(150, &far).is_none());
    }

    #[test]
    fn test_missing_required_column_errors() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(dir.path(), "bad.csv", "frame,player_name\n1,Alice\n");

        let err = CsvHintTable::from_path(&path).unwrap_err();
        assert!(matches!(err, EngineError::HintFile(_)));
    }

    #[test]
    fn test_alternate_id_column_accepted() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(dir.path(), "alt.csv", "frame,id,player_name\n5,1,Gina\n");

        let table = CsvHintTable::from_path(&path).unwrap();
        assert_eq!(table.lookup_track(5, 1).unwrap().player_name, "Gina");
    }

    #[test]
    fn test_discover_prefers_analyzed_tracking_data() {
        let dir = TempDir::new().unwrap();
        let video = dir.path().join("MatchA.mp4");
        std::fs::write(&video, b"").unwrap();

        write_csv(dir.path(), "MatchA.csv", SAMPLE);
        let preferred = write_csv(dir.path(), "MatchA_analyzed_tracking_data.csv", SAMPLE);

        assert_eq!(CsvHintTable::discover(&video).unwrap(), preferred);
    }

    #[test]
    fn test_nan_cells_treated_as_absent() {
        let dir = TempDir::new().unwrap();
        let path = write_csv(
            dir.path(),
            "nan.csv",
            "frame,track_id,player_name\n7,2,nan\n7,3,None\n",
        );

        let table = CsvHintTable::from_path(&path).unwrap();
        assert!(table.lookup_track(7, 2).is_none());
        assert!(table.lookup_track(7, 3).is_none());
    }
}
