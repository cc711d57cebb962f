//! C8: a timestamped memory tier fronting a persistent tier, with
//! background demotion of entries once they age past a configured bound.

use lattice_core::{CacheBackend, Enumerable, Key, Result, TimestampedBackend, Value};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A timestamped memory tier `M` fronting a persistent tier `P`; entries
/// older than `demotion_age` are moved from `M` into `P` by a background
/// timer.
pub struct TimeBasedHybridCache<K, V, M, P> {
    memory: M,
    persistent: P,
    demotion_age: chrono::Duration,
    timer: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
    _marker: std::marker::PhantomData<fn() -> (K, V)>,
}

impl<K, V, M, P> TimeBasedHybridCache<K, V, M, P>
where
    K: Key,
    V: Value,
    M: TimestampedBackend<K, V> + Enumerable<K> + Send + Sync + 'static,
    P: CacheBackend<K, V> + Send + Sync + 'static,
{
    /// Build a cache over `memory`/`persistent`; entries stay in `memory`
    /// until they are at least `demotion_age` old.
    pub fn new(memory: M, persistent: P, demotion_age: Duration) -> Self {
        Self {
            memory,
            persistent,
            demotion_age: chrono::Duration::from_std(demotion_age)
                .unwrap_or_else(|_| chrono::Duration::zero()),
            timer: Mutex::new(None),
            _marker: std::marker::PhantomData,
        }
    }

    fn timer_guard(&self) -> std::sync::MutexGuard<'_, Option<(CancellationToken, JoinHandle<()>)>> {
        self.timer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// One demotion pass: for each key in `memory`, demote it to
    /// `persistent` if it has aged past `demotion_age`.
    pub fn trigger_demotion_now(&self) {
        let now = chrono::Utc::now();
        for key in self.memory.keys() {
            let Some((value, timestamp)) = self.memory.try_get_with_timestamp(&key) else {
                continue;
            };
            if now - timestamp >= self.demotion_age {
                if let Err(e) = self.persistent.set(key.clone(), value) {
                    tracing::warn!(error = %e, "demotion write to persistent tier failed");
                    continue;
                }
                self.memory.remove(&key);
            }
        }
    }
}

impl<K, V, M, P> TimeBasedHybridCache<K, V, M, P>
where
    K: Key + 'static,
    V: Value + 'static,
    M: TimestampedBackend<K, V> + Enumerable<K> + Send + Sync + 'static,
    P: CacheBackend<K, V> + Send + Sync + 'static,
{
    /// Start a background task that calls
    /// [`trigger_demotion_now`](Self::trigger_demotion_now) every `interval`.
    /// Requires a Tokio runtime context.
    pub fn start_demotion_timer(this: &std::sync::Arc<Self>, interval: Duration) {
        if interval.is_zero() {
            return;
        }
        this.stop_demotion_timer();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let worker = std::sync::Arc::clone(this);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => break,
                    _ = ticker.tick() => worker.trigger_demotion_now(),
                }
            }
        });
        *this.timer_guard() = Some((cancel, handle));
    }

    /// Cancel the demotion timer, if running.
    pub fn stop_demotion_timer(&self) {
        if let Some((cancel, _handle)) = self.timer_guard().take() {
            cancel.cancel();
        }
    }
}

impl<K, V, M, P> CacheBackend<K, V> for TimeBasedHybridCache<K, V, M, P>
where
    K: Key,
    V: Value,
    M: TimestampedBackend<K, V> + Enumerable<K>,
    P: CacheBackend<K, V>,
{
    fn try_get(&self, key: &K) -> Option<V> {
        if let Some(value) = self.memory.try_get(key) {
            return Some(value);
        }
        let value = self.persistent.try_get(key)?;
        if let Err(e) = self.memory.set(key.clone(), value.clone()) {
            tracing::warn!(error = %e, "rehydration write to memory tier failed, tolerated");
        }
        Some(value)
    }

    fn set(&self, key: K, value: V) -> Result<()> {
        self.memory.set(key.clone(), value.clone())?;
        self.persistent.set(key, value)
    }

    fn remove(&self, key: &K) -> bool {
        let removed_memory = self.memory.remove(key);
        let removed_persistent = self.persistent.remove(key);
        removed_memory || removed_persistent
    }

    fn clear(&self) {
        self.memory.clear();
        self.persistent.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_memory::{MemoryBackend, TimestampedMemoryBackend};

    fn cache() -> TimeBasedHybridCache<String, i32, TimestampedMemoryBackend<String, i32>, MemoryBackend<String, i32>>
    {
        TimeBasedHybridCache::new(
            TimestampedMemoryBackend::new(),
            MemoryBackend::new(),
            Duration::from_millis(100),
        )
    }

    #[test]
    fn set_writes_both_tiers() {
        let cache = cache();
        cache.set("a".to_string(), 1).unwrap();
        assert_eq!(cache.memory.try_get(&"a".to_string()), Some(1));
        assert_eq!(cache.persistent.try_get(&"a".to_string()), Some(1));
    }

    #[test]
    fn try_get_rehydrates_from_persistent_on_memory_miss() {
        let cache = cache();
        cache.persistent.set("a".to_string(), 1).unwrap();
        assert_eq!(cache.try_get(&"a".to_string()), Some(1));
        assert_eq!(cache.memory.try_get(&"a".to_string()), Some(1));
    }

    #[test]
    fn demotion_moves_aged_entries_to_persistent() {
        let cache = TimeBasedHybridCache::new(
            TimestampedMemoryBackend::new(),
            MemoryBackend::new(),
            Duration::from_millis(0),
        );
        cache
            .memory
            .set_with_timestamp(
                "a".to_string(),
                1,
                chrono::Utc::now() - chrono::Duration::seconds(5),
            )
            .unwrap();

        cache.trigger_demotion_now();

        assert_eq!(cache.memory.try_get(&"a".to_string()), None);
        assert_eq!(cache.persistent.try_get(&"a".to_string()), Some(1));
    }

    #[test]
    fn remove_ors_across_both_tiers() {
        let cache = cache();
        cache.memory.set("a".to_string(), 1).unwrap();
        assert!(cache.remove(&"a".to_string()));
    }
}
