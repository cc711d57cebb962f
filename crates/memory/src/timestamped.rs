//! C3: an in-memory backend that stores `(value, timestamp)` pairs.

use chrono::{DateTime, Utc};
use lattice_core::{
    Availability, CacheBackend, Enumerable, Error, Events, Key, OnSetHub, ProbeKey, Result,
    SubscriptionId, TimestampedBackend, Value,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// As [`crate::MemoryBackend`], but every stored cell also carries the
/// instant it was last written.
pub struct TimestampedMemoryBackend<K: Key, V: Value> {
    store: Mutex<HashMap<K, (V, DateTime<Utc>)>>,
    on_set: OnSetHub<K, V>,
}

impl<K: Key, V: Value> TimestampedMemoryBackend<K, V> {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Mutex::new(HashMap::new()),
            on_set: OnSetHub::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<K, (V, DateTime<Utc>)>> {
        self.store
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl<K: Key, V: Value> Default for TimestampedMemoryBackend<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Key, V: Value> CacheBackend<K, V> for TimestampedMemoryBackend<K, V> {
    fn try_get(&self, key: &K) -> Option<V> {
        self.lock().get(key).map(|(value, _)| value.clone())
    }

    fn set(&self, key: K, value: V) -> Result<()> {
        self.set_with_timestamp(key, value, Utc::now())
    }

    fn remove(&self, key: &K) -> bool {
        self.lock().remove(key).is_some()
    }

    fn clear(&self) {
        self.lock().clear();
    }
}

impl<K: Key, V: Value> TimestampedBackend<K, V> for TimestampedMemoryBackend<K, V> {
    fn set_with_timestamp(&self, key: K, value: V, timestamp: DateTime<Utc>) -> Result<()> {
        if key.is_null_key() {
            return Err(Error::invalid_argument(
                "timestamped memory backend rejects a null key",
            ));
        }
        self.lock()
            .insert(key.clone(), (value.clone(), timestamp));
        self.on_set.notify(&key, &value);
        Ok(())
    }

    fn try_get_with_timestamp(&self, key: &K) -> Option<(V, DateTime<Utc>)> {
        self.lock().get(key).cloned()
    }
}

impl<K: Key, V: Value> Enumerable<K> for TimestampedMemoryBackend<K, V> {
    fn keys(&self) -> Vec<K> {
        self.lock().keys().cloned().collect()
    }
}

impl<K: Key, V: Value> Events<K, V> for TimestampedMemoryBackend<K, V> {
    fn subscribe_on_set(&self, callback: Arc<dyn Fn(&K, &V) + Send + Sync>) -> SubscriptionId {
        self.on_set.subscribe(callback)
    }

    fn unsubscribe_on_set(&self, id: SubscriptionId) {
        self.on_set.unsubscribe(id);
    }
}

impl<K: Key + ProbeKey, V: Value + Default> Availability for TimestampedMemoryBackend<K, V> {
    fn is_available(&self) -> bool {
        let probe = K::generate_probe();
        // The self-test must not pollute user data: remove the probe entry
        // after writing it, same as MemoryBackend's self-test.
        let mut guard = self.lock();
        guard.insert(probe.clone(), (V::default(), Utc::now()));
        guard.remove(&probe);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_uses_current_time() {
        let backend: TimestampedMemoryBackend<String, i32> = TimestampedMemoryBackend::new();
        let before = Utc::now();
        backend.set("a".to_string(), 1).unwrap();
        let (value, ts) = backend.try_get_with_timestamp(&"a".to_string()).unwrap();
        assert_eq!(value, 1);
        assert!(ts >= before);
    }

    #[test]
    fn set_with_timestamp_is_verbatim() {
        let backend: TimestampedMemoryBackend<String, i32> = TimestampedMemoryBackend::new();
        let fixed = DateTime::parse_from_rfc3339("2020-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        backend
            .set_with_timestamp("a".to_string(), 7, fixed)
            .unwrap();
        let (value, ts) = backend.try_get_with_timestamp(&"a".to_string()).unwrap();
        assert_eq!(value, 7);
        assert_eq!(ts, fixed);
    }

    #[test]
    fn set_with_timestamp_allows_out_of_order_writes() {
        let backend: TimestampedMemoryBackend<String, i32> = TimestampedMemoryBackend::new();
        let later = Utc::now();
        let earlier = later - chrono::Duration::seconds(60);
        backend.set_with_timestamp("a".to_string(), 1, later).unwrap();
        backend
            .set_with_timestamp("a".to_string(), 2, earlier)
            .unwrap();
        let (value, ts) = backend.try_get_with_timestamp(&"a".to_string()).unwrap();
        assert_eq!(value, 2);
        assert_eq!(ts, earlier);
    }

    #[test]
    fn is_available_does_not_leak_probe() {
        let backend: TimestampedMemoryBackend<String, i32> = TimestampedMemoryBackend::new();
        assert!(backend.is_available());
        assert!(backend.keys().is_empty());
    }
}
