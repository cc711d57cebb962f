//! The pipeline's plugin/storage subsystem (spec §4.9): a process-wide
//! registry mapping `(pipeline identity, storage key) → storage`, so blocks
//! attached to different pipelines never see each other's state, and
//! cleanup happens in one place on dispose.
//!
//! Design Notes §9 flags "global mutable state for pipeline storage" as
//! something to isolate behind a single library-owned registry keyed by
//! pipeline identity rather than scattering statics — this module is that
//! registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Unique identity of a [`crate::ChannelPipeline`], used to key entries in
/// the process-wide storage registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineId(pub(crate) uuid::Uuid);

impl PipelineId {
    pub(crate) fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

/// A key/value store a pipeline block can access through the storage
/// registry. Values are opaque byte sequences; blocks are responsible for
/// their own encoding.
pub trait Storage: Send + Sync {
    /// Look up `key`.
    fn try_get_value(&self, key: &str) -> Option<Vec<u8>>;
    /// Overwrite or insert `key`.
    fn set_value(&self, key: &str, value: Vec<u8>);
    /// Remove `key`. Returns whether it was present.
    fn remove_value(&self, key: &str) -> bool;
    /// Remove every entry.
    fn clear(&self);
}

/// Default in-memory [`Storage`] implementation.
#[derive(Default)]
pub struct InMemoryStorage {
    data: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for InMemoryStorage {
    fn try_get_value(&self, key: &str) -> Option<Vec<u8>> {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn set_value(&self, key: &str, value: Vec<u8>) {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
    }

    fn remove_value(&self, key: &str) -> bool {
        self.data
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    fn clear(&self) {
        self.data.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

type Registry = Mutex<HashMap<(PipelineId, String), Arc<dyn Storage>>>;

static REGISTRY: OnceLock<Registry> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Attach `storage` under `key` for `pipeline`, making it reachable from
/// blocks via [`lookup`].
pub fn attach(pipeline: PipelineId, key: impl Into<String>, storage: Arc<dyn Storage>) {
    registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert((pipeline, key.into()), storage);
}

/// Look up storage previously attached to `pipeline` under `key`.
#[must_use]
pub fn lookup(pipeline: PipelineId, key: &str) -> Option<Arc<dyn Storage>> {
    registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&(pipeline, key.to_string()))
        .cloned()
}

/// Remove every storage entry belonging to `pipeline`. Called on dispose.
pub fn release(pipeline: PipelineId) {
    registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .retain(|(id, _), _| *id != pipeline);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_then_lookup_round_trips() {
        let pipeline = PipelineId::new();
        attach(pipeline, "k", Arc::new(InMemoryStorage::new()));
        let storage = lookup(pipeline, "k").unwrap();
        storage.set_value("a", vec![1, 2, 3]);
        assert_eq!(
            lookup(pipeline, "k").unwrap().try_get_value("a"),
            Some(vec![1, 2, 3])
        );
        release(pipeline);
    }

    #[test]
    fn release_removes_only_that_pipelines_entries() {
        let a = PipelineId::new();
        let b = PipelineId::new();
        attach(a, "k", Arc::new(InMemoryStorage::new()));
        attach(b, "k", Arc::new(InMemoryStorage::new()));

        release(a);

        assert!(lookup(a, "k").is_none());
        assert!(lookup(b, "k").is_some());
        release(b);
    }

    #[test]
    fn in_memory_storage_basic_operations() {
        let storage = InMemoryStorage::new();
        assert_eq!(storage.try_get_value("a"), None);
        storage.set_value("a", vec![1]);
        assert_eq!(storage.try_get_value("a"), Some(vec![1]));
        assert!(storage.remove_value("a"));
        assert!(!storage.remove_value("a"));
        storage.set_value("b", vec![2]);
        storage.clear();
        assert_eq!(storage.try_get_value("b"), None);
    }
}
