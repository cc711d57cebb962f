//! The on-disk key-mapping index (`_keymapping.json`) backing [`crate::FileBackend`].
//!
//! Invariants (spec §3 "Key-mapping index"):
//! - filenames are unique within the cache directory;
//! - a record is valid iff its data file exists *and* its `key_type_name`
//!   matches the backend's current key type — invalid records are silently
//!   dropped on load, never surfaced as an error.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the sidecar index file inside a [`crate::FileBackend`]'s directory.
pub const SIDECAR_FILE_NAME: &str = "_keymapping.json";

/// One entry in the key-mapping index: the serialized key, the data file it
/// maps to, and the key type the entry was written under.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexRecord {
    /// JSON-encoded form of the original key.
    pub serialized_key: String,
    /// Filename (relative to the cache directory) holding the JSON-encoded value.
    pub filename: String,
    /// `std::any::type_name` of the key type this record was written under.
    pub key_type_name: String,
}

/// Load the key-mapping index from `dir`, dropping any record whose data
/// file is missing or whose `key_type_name` does not match `expected_key_type`.
pub fn load(dir: &Path, expected_key_type: &str) -> Vec<IndexRecord> {
    let sidecar = dir.join(SIDECAR_FILE_NAME);
    let Ok(contents) = fs::read_to_string(&sidecar) else {
        return Vec::new();
    };
    let Ok(records) = serde_json::from_str::<Vec<IndexRecord>>(&contents) else {
        tracing::warn!(path = %sidecar.display(), "key-mapping index is corrupt, starting empty");
        return Vec::new();
    };

    records
        .into_iter()
        .filter(|record| {
            record.key_type_name == expected_key_type && dir.join(&record.filename).is_file()
        })
        .collect()
}

/// Persist the index atomically: write to a temp file in the same
/// directory, then rename over the sidecar so a crash mid-write leaves
/// either the old or the new version readable.
pub fn save(dir: &Path, records: &[IndexRecord]) -> std::io::Result<()> {
    let sidecar = dir.join(SIDECAR_FILE_NAME);
    let tmp_name = format!("_keymapping.{}.tmp", uuid::Uuid::new_v4());
    let tmp_path: PathBuf = dir.join(tmp_name);

    let json = serde_json::to_vec_pretty(records)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, &sidecar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(key: &str, filename: &str, ty: &str) -> IndexRecord {
        IndexRecord {
            serialized_key: key.to_string(),
            filename: filename.to_string(),
            key_type_name: ty.to_string(),
        }
    }

    #[test]
    fn load_returns_empty_when_sidecar_missing() {
        let dir = tempdir().unwrap();
        assert!(load(dir.path(), "alloc::string::String").is_empty());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.json"), b"1").unwrap();
        let records = vec![record("\"a\"", "a.json", "alloc::string::String")];
        save(dir.path(), &records).unwrap();

        let loaded = load(dir.path(), "alloc::string::String");
        assert_eq!(loaded, records);
    }

    #[test]
    fn load_drops_record_with_missing_file() {
        let dir = tempdir().unwrap();
        let records = vec![record("\"a\"", "missing.json", "alloc::string::String")];
        save(dir.path(), &records).unwrap();

        assert!(load(dir.path(), "alloc::string::String").is_empty());
    }

    #[test]
    fn load_drops_record_with_mismatched_key_type() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.json"), b"1").unwrap();
        let records = vec![record("\"a\"", "a.json", "alloc::string::String")];
        save(dir.path(), &records).unwrap();

        assert!(load(dir.path(), "i64").is_empty());
    }
}
