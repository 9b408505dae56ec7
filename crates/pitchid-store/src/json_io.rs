//! Atomic JSON persistence.
//!
//! All writes go through a temp file in the target's directory, are fsynced,
//! and are renamed over the target, so an interrupted write never corrupts
//! the previous on-disk state. If a previous target existed it is copied to
//! a `.backup` sidecar before the rename.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Serialize `value` to `path` atomically.
///
/// With `validate = true` the serialized bytes are re-parsed before any file
/// is touched, so a serializer bug cannot reach disk.
pub fn safe_json_save<T: Serialize>(path: &Path, value: &T, validate: bool) -> StoreResult<()> {
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| StoreError::write_failed(format!("serialization failed: {e}")))?;

    if validate {
        serde_json::from_slice::<serde_json::Value>(&bytes)
            .map_err(|e| StoreError::schema_invalid(path, format!("produced invalid JSON: {e}")))?;
    }

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    drop(file);

    if path.exists() {
        let backup = backup_path(path);
        if let Err(e) = fs::copy(path, &backup) {
            // Losing the backup is survivable; losing the write is not
            warn!(
                target_file = %path.display(),
                error = %e,
                "Could not create .backup sidecar before overwrite"
            );
        }
    }

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StoreError::write_failed(format!("rename to {} failed: {e}", path.display()))
    })?;

    debug!(target_file = %path.display(), bytes = bytes.len(), "Saved JSON atomically");
    Ok(())
}

/// Load and deserialize `path`.
///
/// A missing file is `StoreError::NotFound` (callers usually treat it as
/// empty); malformed JSON or a shape mismatch is `StoreError::SchemaInvalid`
/// and nothing is partially ingested.
pub fn safe_json_load<T: DeserializeOwned>(path: &Path) -> StoreResult<T> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StoreError::NotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    serde_json::from_slice(&bytes).map_err(|e| StoreError::schema_invalid(path, e.to_string()))
}

/// The `.backup` sidecar path for a target file.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".backup");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Doc {
        name: String,
        count: u32,
    }

    #[test]
    fn test_save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        let doc = Doc {
            name: "alpha".into(),
            count: 3,
        };

        safe_json_save(&path, &doc, true).unwrap();
        let back: Doc = safe_json_load(&path).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn test_load_missing_is_not_found() {
        let dir = TempDir::new().unwrap();
        let err = safe_json_load::<Doc>(&dir.path().join("absent.json")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_load_malformed_is_schema_invalid() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, b"{ not json").unwrap();

        let err = safe_json_load::<Doc>(&path).unwrap_err();
        assert!(matches!(err, StoreError::SchemaInvalid { .. }));
    }

    #[test]
    fn test_overwrite_creates_backup() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");

        safe_json_save(&path, &Doc { name: "v1".into(), count: 1 }, true).unwrap();
        safe_json_save(&path, &Doc { name: "v2".into(), count: 2 }, true).unwrap();

        let backup: Doc = safe_json_load(&backup_path(&path)).unwrap();
        assert_eq!(backup.name, "v1");
        let live: Doc = safe_json_load(&path).unwrap();
        assert_eq!(live.name, "v2");
    }

    #[test]
    fn test_stale_tmp_file_does_not_corrupt_target() {
        // A crash mid-write leaves a truncated temp file behind; the live
        // target must still load.
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");

        safe_json_save(&path, &Doc { name: "live".into(), count: 9 }, true).unwrap();
        fs::write(path.with_extension("tmp"), b"{\"name\": \"trunc").unwrap();

        let live: Doc = safe_json_load(&path).unwrap();
        assert_eq!(live.name, "live");

        // And a subsequent save replaces the stale temp file cleanly.
        safe_json_save(&path, &Doc { name: "next".into(), count: 10 }, true).unwrap();
        let live: Doc = safe_json_load(&path).unwrap();
        assert_eq!(live.name, "next");
    }
}
