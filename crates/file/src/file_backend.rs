//! C4: a persistent store with one JSON file per entry and a key-mapping index.

use crate::index::{self, IndexRecord, SIDECAR_FILE_NAME};
use lattice_core::{Availability, CacheBackend, Enumerable, Error, Key, Result, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::marker::PhantomData;
use std::path::PathBuf;
use std::sync::Mutex;

/// Persistent cache backend storing one JSON file per entry in a directory,
/// with a sidecar `_keymapping.json` index.
///
/// The guard held across every mutating operation covers both the data-file
/// write/delete and the index rewrite, so the two are never observed out of
/// sync by a concurrent caller on this same instance (spec §4.4).
pub struct FileBackend<K, V> {
    dir: PathBuf,
    key_type_name: String,
    index: Mutex<Vec<IndexRecord>>,
    _marker: PhantomData<fn() -> (K, V)>,
}

impl<K, V> FileBackend<K, V>
where
    K: Key + Serialize + DeserializeOwned,
    V: Value + Serialize + DeserializeOwned,
{
    /// Open (or create) a file backend rooted at `dir`, loading its
    /// key-mapping index. Invalid index records (missing file, mismatched
    /// key type) are silently dropped.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| Error::backend_failure(e, "creating cache directory"))?;
        let key_type_name = std::any::type_name::<K>().to_string();
        let records = index::load(&dir, &key_type_name);
        Ok(Self {
            dir,
            key_type_name,
            index: Mutex::new(records),
            _marker: PhantomData,
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<IndexRecord>> {
        self.index
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn serialize_key(&self, key: &K) -> Result<String> {
        serde_json::to_string(key)
            .map_err(|e| Error::backend_failure(e, "serializing cache key"))
    }

    fn persist_index(&self, records: &[IndexRecord]) {
        if let Err(e) = index::save(&self.dir, records) {
            tracing::warn!(error = %e, path = %self.dir.display(), "failed to persist key-mapping index");
        }
    }

    fn data_path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }
}

impl<K, V> CacheBackend<K, V> for FileBackend<K, V>
where
    K: Key + Serialize + DeserializeOwned,
    V: Value + Serialize + DeserializeOwned,
{
    fn try_get(&self, key: &K) -> Option<V> {
        let Ok(serialized_key) = self.serialize_key(key) else {
            return None;
        };

        let mut guard = self.lock();
        let position = guard.iter().position(|record| {
            record.serialized_key == serialized_key && record.key_type_name == self.key_type_name
        })?;
        let filename = guard[position].filename.clone();
        let path = self.data_path(&filename);

        match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<V>(&bytes) {
                Ok(value) => Some(value),
                Err(e) => {
                    tracing::warn!(error = %e, path = %path.display(), "failed to decode cached value");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // The data file disappeared out from under the index: drop
                // the now-dangling record and report absence (spec §4.4).
                guard.remove(position);
                self.persist_index(&guard);
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "failed to read cached value");
                None
            }
        }
    }

    fn set(&self, key: K, value: V) -> Result<()> {
        if key.is_null_key() {
            return Err(Error::invalid_argument("file backend rejects a null key"));
        }
        let serialized_key = self.serialize_key(&key)?;
        let json = serde_json::to_vec(&value)
            .map_err(|e| Error::backend_failure(e, "serializing cache value"))?;

        let mut guard = self.lock();
        let existing = guard
            .iter()
            .position(|record| {
                record.serialized_key == serialized_key
                    && record.key_type_name == self.key_type_name
            })
            .map(|idx| guard[idx].filename.clone());

        let filename = existing.unwrap_or_else(|| format!("{}.json", uuid::Uuid::new_v4()));
        let path = self.data_path(&filename);

        if let Err(e) = fs::write(&path, json) {
            // Write errors are logged and swallowed: the index is only
            // rolled forward on success (spec §4.4 failure policy).
            tracing::warn!(error = %e, path = %path.display(), "failed to write cache value, entry not recorded");
            return Ok(());
        }

        if let Some(record) = guard
            .iter_mut()
            .find(|record| record.serialized_key == serialized_key && record.key_type_name == self.key_type_name)
        {
            record.filename = filename;
        } else {
            guard.push(IndexRecord {
                serialized_key,
                filename,
                key_type_name: self.key_type_name.clone(),
            });
        }
        self.persist_index(&guard);
        Ok(())
    }

    fn remove(&self, key: &K) -> bool {
        let Ok(serialized_key) = self.serialize_key(key) else {
            return false;
        };
        let mut guard = self.lock();
        let Some(position) = guard.iter().position(|record| {
            record.serialized_key == serialized_key && record.key_type_name == self.key_type_name
        }) else {
            return false;
        };

        let record = guard.remove(position);
        let path = self.data_path(&record.filename);
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(error = %e, path = %path.display(), "failed to remove cache value file");
            }
        }
        self.persist_index(&guard);
        true
    }

    fn clear(&self) {
        let mut guard = self.lock();
        if let Ok(entries) = fs::read_dir(&self.dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.file_name().and_then(|n| n.to_str()) == Some(SIDECAR_FILE_NAME) {
                    continue;
                }
                if path.is_file() {
                    let _ = fs::remove_file(&path);
                }
            }
        }
        guard.clear();
        self.persist_index(&guard);
    }
}

impl<K, V> Enumerable<K> for FileBackend<K, V>
where
    K: Key + Serialize + DeserializeOwned,
    V: Value + Serialize + DeserializeOwned,
{
    fn keys(&self) -> Vec<K> {
        self.lock()
            .iter()
            .filter(|record| record.key_type_name == self.key_type_name)
            .filter_map(|record| serde_json::from_str::<K>(&record.serialized_key).ok())
            .collect()
    }
}

impl<K, V> Availability for FileBackend<K, V>
where
    K: Key + Serialize + DeserializeOwned,
    V: Value + Serialize + DeserializeOwned,
{
    fn is_available(&self) -> bool {
        let probe_path = self
            .dir
            .join(format!("__lattice_probe_{}.tmp", uuid::Uuid::new_v4()));
        if fs::write(&probe_path, b"probe").is_err() {
            return false;
        }
        let ok = fs::remove_file(&probe_path).is_ok();
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Payload {
        n: i32,
    }

    #[test]
    fn round_trips_across_separate_instances() {
        let dir = tempdir().unwrap();
        {
            let backend: FileBackend<String, Payload> = FileBackend::new(dir.path()).unwrap();
            backend
                .set("alpha".to_string(), Payload { n: 1 })
                .unwrap();
        }

        let reopened: FileBackend<String, Payload> = FileBackend::new(dir.path()).unwrap();
        assert_eq!(
            reopened.try_get(&"alpha".to_string()),
            Some(Payload { n: 1 })
        );
    }

    #[test]
    fn deleted_data_file_drops_index_entry() {
        let dir = tempdir().unwrap();
        let backend: FileBackend<String, Payload> = FileBackend::new(dir.path()).unwrap();
        backend.set("alpha".to_string(), Payload { n: 1 }).unwrap();

        let filename = backend.lock()[0].filename.clone();
        fs::remove_file(dir.path().join(&filename)).unwrap();

        assert_eq!(backend.try_get(&"alpha".to_string()), None);
        assert!(backend.lock().is_empty());
    }

    #[test]
    fn remove_deletes_file_and_index_entry() {
        let dir = tempdir().unwrap();
        let backend: FileBackend<String, Payload> = FileBackend::new(dir.path()).unwrap();
        backend.set("alpha".to_string(), Payload { n: 1 }).unwrap();
        let filename = backend.lock()[0].filename.clone();

        assert!(backend.remove(&"alpha".to_string()));
        assert!(!dir.path().join(&filename).exists());
        assert_eq!(backend.try_get(&"alpha".to_string()), None);
    }

    #[test]
    fn clear_removes_data_files_but_keeps_sidecar_semantics() {
        let dir = tempdir().unwrap();
        let backend: FileBackend<String, Payload> = FileBackend::new(dir.path()).unwrap();
        backend.set("a".to_string(), Payload { n: 1 }).unwrap();
        backend.set("b".to_string(), Payload { n: 2 }).unwrap();

        backend.clear();

        assert!(backend.keys().is_empty());
        let remaining: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|name| name != SIDECAR_FILE_NAME)
            .collect();
        assert!(remaining.is_empty());
    }

    #[test]
    fn is_available_does_not_touch_sidecar() {
        let dir = tempdir().unwrap();
        let backend: FileBackend<String, Payload> = FileBackend::new(dir.path()).unwrap();
        backend.set("a".to_string(), Payload { n: 1 }).unwrap();

        assert!(backend.is_available());
        assert_eq!(backend.try_get(&"a".to_string()), Some(Payload { n: 1 }));
    }

    #[test]
    fn set_rejects_null_key() {
        let dir = tempdir().unwrap();
        let backend: FileBackend<Option<String>, Payload> = FileBackend::new(dir.path()).unwrap();
        let err = backend.set(None, Payload { n: 1 }).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }
}
