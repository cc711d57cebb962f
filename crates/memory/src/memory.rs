//! C2: a thread-safe in-memory cache backend.

use lattice_core::{Availability, CacheBackend, Enumerable, Error, Events, Key, OnSetHub, Result, SubscriptionId, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Thread-safe in-memory key/value store. All mutating and reading
/// operations acquire a single mutual-exclusion guard; `on_set` subscribers
/// are invoked after the guard is released to avoid re-entrant deadlock.
pub struct MemoryBackend<K: Key, V: Value> {
    store: Mutex<HashMap<K, V>>,
    on_set: OnSetHub<K, V>,
}

impl<K: Key, V: Value> MemoryBackend<K, V> {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
            on_set: OnSetHub::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, V>> {
        self.store
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<K: Key, V: Value> Default for MemoryBackend<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key, V: Value> CacheBackend<K, V> for MemoryBackend<K, V> {
    fn try_get(&self, key: &K) -> Option<V> {
        self.lock().get(key).cloned()
    }

    fn set(&self, key: K, value: V) -> Result<()> {
        if key.is_null_key() {
            return Err(Error::invalid_argument("memory backend rejects a null key"));
        }
        self.lock().insert(key.clone(), value.clone());
        tracing::trace!("memory backend set key");
        self.on_set.notify(&key, &value);
        Ok(())
    }

    fn remove(&self, key: &K) -> bool {
        self.lock().remove(key).is_some()
    }

    fn clear(&self) {
        self.lock().clear();
    }
}

impl<K: Key, V: Value> Enumerable<K> for MemoryBackend<K, V> {
    fn keys(&self) -> Vec<K> {
        self.lock().keys().cloned().collect()
    }
}

impl<K: Key, V: Value> Events<K, V> for MemoryBackend<K, V> {
    fn subscribe_on_set(&self, callback: Arc<dyn Fn(&K, &V) + Send + Sync>) -> SubscriptionId {
        self.on_set.subscribe(callback)
    }

    fn unsubscribe_on_set(&self, id: SubscriptionId) {
        self.on_set.unsubscribe(id);
    }
}

impl<K: Key + lattice_core::ProbeKey, V: Value + Default> Availability for MemoryBackend<K, V> {
    fn is_available(&self) -> bool {
        let probe = K::generate_probe();
        let mut guard = self.lock();
        guard.insert(probe.clone(), V::default());
        guard.remove(&probe);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let backend: MemoryBackend<String, i32> = MemoryBackend::new();
        backend.set("a".to_string(), 1).unwrap();
        assert_eq!(backend.try_get(&"a".to_string()), Some(1));
    }

    #[test]
    fn set_rejects_null_key() {
        let backend: MemoryBackend<Option<String>, i32> = MemoryBackend::new();
        let err = backend.set(None, 1).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[test]
    fn remove_then_get_is_absent() {
        let backend: MemoryBackend<String, i32> = MemoryBackend::new();
        backend.set("a".to_string(), 1).unwrap();
        assert!(backend.remove(&"a".to_string()));
        assert_eq!(backend.try_get(&"a".to_string()), None);
    }

    #[test]
    fn remove_absent_key_returns_false() {
        let backend: MemoryBackend<String, i32> = MemoryBackend::new();
        assert!(!backend.remove(&"missing".to_string()));
    }

    #[test]
    fn clear_empties_keys() {
        let backend: MemoryBackend<String, i32> = MemoryBackend::new();
        backend.set("a".to_string(), 1).unwrap();
        backend.set("b".to_string(), 2).unwrap();
        backend.clear();
        assert!(backend.keys().is_empty());
    }

    #[test]
    fn on_set_fires_after_mutation_is_observable() {
        let backend: MemoryBackend<String, i32> = MemoryBackend::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        backend.subscribe_on_set(Arc::new(move |k: &String, v: &i32| {
            *seen_clone.lock().unwrap() = Some((k.clone(), *v));
        }));

        backend.set("a".to_string(), 42).unwrap();
        assert_eq!(*seen.lock().unwrap(), Some(("a".to_string(), 42)));
    }

    #[test]
    fn is_available_cleans_up_its_probe() {
        let backend: MemoryBackend<String, i32> = MemoryBackend::new();
        assert!(backend.is_available());
        assert!(backend.keys().is_empty());
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let backend: MemoryBackend<String, i32> = MemoryBackend::new();
        let calls = Arc::new(Mutex::new(0));
        let calls_clone = Arc::clone(&calls);
        let id = backend.subscribe_on_set(Arc::new(move |_k: &String, _v: &i32| {
            *calls_clone.lock().unwrap() += 1;
        }));
        backend.unsubscribe_on_set(id);
        backend.set("a".to_string(), 1).unwrap();
        assert_eq!(*calls.lock().unwrap(), 0);
    }
}
