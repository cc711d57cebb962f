//! C7: a fixed tier list whose writes fan out to every available tier
//! concurrently, with an explicit synchronization pass to converge tiers
//! that have drifted apart.

use crate::tier::Tier;
use futures::future::join_all;
use lattice_core::{CacheBackend, Error, Key, Result, Value};
use std::sync::Arc;

/// How [`ParallelCache::trigger_sync_now`] resolves tiers that disagree on
/// whether a key is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResolution {
    /// Tier 0's presence/absence of a key is authoritative.
    PrimaryWins,
    /// A key present in at least `majority_threshold` of tiers wins and is
    /// propagated everywhere; otherwise it is eliminated as a minority.
    MajorityWins,
}

/// Synchronization-pass configuration.
#[derive(Debug, Clone, Copy)]
pub struct SyncOptions {
    /// Which conflict-resolution rule [`ParallelCache::trigger_sync_now`] applies.
    pub conflict_resolution: ConflictResolution,
    /// Fraction of tiers (in `(0.0, 1.0]`) that must hold a key for
    /// `MajorityWins` to treat it as the winner.
    pub majority_threshold: f64,
}

/// A tier list that fans write/remove/clear out to every available tier
/// concurrently, reading from the first available tier that has a hit.
///
/// `set`/`remove`/`clear` dispatch per-tier work with `tokio::spawn`, the
/// same fan-out-task shape `DirectionalTierCache`'s migration timer and
/// `TimeBasedHybridCache`'s demotion timer use, so every method requires
/// already being inside a Tokio runtime. `set` and `clear` fire their tier
/// tasks detached and return as soon as dispatch is issued, per spec §4.7;
/// `remove` needs the `OR` of every tier's result, so it bridges back to a
/// synchronous return with the same `block_in_place` + `Handle::block_on`
/// idiom `ObjectStoreBackend` uses to await its own async transport calls.
pub struct ParallelCache<K, V> {
    tiers: Vec<Tier<K, V>>,
    sync_options: Option<SyncOptions>,
}

impl<K: Key, V: Value> ParallelCache<K, V> {
    /// Build a cache over `tiers` (must contain at least two). `sync_options`
    /// enables [`trigger_sync_now`](Self::trigger_sync_now); without it,
    /// that method returns [`Error::NotSupported`].
    pub fn new(tiers: Vec<Tier<K, V>>, sync_options: Option<SyncOptions>) -> Result<Self> {
        if tiers.len() < 2 {
            return Err(Error::invalid_argument(
                "ParallelCache requires at least two tiers",
            ));
        }
        Ok(Self {
            tiers,
            sync_options,
        })
    }

    /// Run one synchronization pass: for every key observed in any
    /// enumerable tier, converge tiers per the configured
    /// [`ConflictResolution`]. Requires at least two tiers to implement
    /// [`lattice_core::Enumerable`]; fails with [`Error::InvalidOperation`]
    /// if enumeration fails on any tier that does implement it.
    pub fn trigger_sync_now(&self) -> Result<()> {
        let options = self
            .sync_options
            .ok_or_else(|| Error::not_supported("ParallelCache::trigger_sync_now"))?;

        let enumerable_count = self.tiers.iter().filter(|t| t.enumerable().is_some()).count();
        if enumerable_count < 2 {
            return Err(Error::invalid_operation(
                "synchronization pass requires at least two enumerable tiers",
            ));
        }

        let mut keys: Vec<K> = Vec::new();
        for tier in &self.tiers {
            if let Some(enumerable) = tier.enumerable() {
                for key in enumerable.keys() {
                    if !keys.iter().any(|existing| existing == &key) {
                        keys.push(key);
                    }
                }
            }
        }

        for key in keys {
            self.converge_key(&key, options);
        }
        Ok(())
    }

    fn converge_key(&self, key: &K, options: SyncOptions) {
        let present: Vec<usize> = self
            .tiers
            .iter()
            .enumerate()
            .filter(|(_, tier)| tier.backend.try_get(key).is_some())
            .map(|(idx, _)| idx)
            .collect();

        match options.conflict_resolution {
            ConflictResolution::PrimaryWins => {
                if !present.contains(&0) {
                    for (idx, tier) in self.tiers.iter().enumerate() {
                        if idx != 0 && tier.is_available() {
                            tier.backend.remove(key);
                        }
                    }
                }
            }
            ConflictResolution::MajorityWins => {
                let threshold = (options.majority_threshold * self.tiers.len() as f64).ceil() as usize;
                if present.len() >= threshold.max(1) {
                    let Some(&winner_idx) = present.first() else {
                        return;
                    };
                    let Some(value) = self.tiers[winner_idx].backend.try_get(key) else {
                        return;
                    };
                    for (idx, tier) in self.tiers.iter().enumerate() {
                        if !present.contains(&idx) && tier.is_available() {
                            if let Err(e) = tier.backend.set(key.clone(), value.clone()) {
                                tracing::warn!(error = %e, "sync pass propagation failed, tolerated");
                            }
                        }
                    }
                } else {
                    for &idx in &present {
                        let tier = &self.tiers[idx];
                        if tier.is_available() {
                            tier.backend.remove(key);
                        }
                    }
                }
            }
        }
    }
}

impl<K: Key, V: Value> CacheBackend<K, V> for ParallelCache<K, V> {
    fn try_get(&self, key: &K) -> Option<V> {
        for tier in &self.tiers {
            if !tier.is_available() {
                continue;
            }
            if let Some(value) = tier.backend.try_get(key) {
                return Some(value);
            }
        }
        None
    }

    fn set(&self, key: K, value: V) -> Result<()> {
        for tier in &self.tiers {
            if !tier.is_available() {
                continue;
            }
            let backend = Arc::clone(&tier.backend);
            let key = key.clone();
            let value = value.clone();
            tokio::spawn(async move {
                if let Err(e) = backend.set(key, value) {
                    tracing::warn!(error = %e, "parallel cache tier write failed, tolerated");
                }
            });
        }
        Ok(())
    }

    fn remove(&self, key: &K) -> bool {
        let handles: Vec<_> = self
            .tiers
            .iter()
            .filter(|tier| tier.is_available())
            .map(|tier| {
                let backend = Arc::clone(&tier.backend);
                let key = key.clone();
                tokio::spawn(async move { backend.remove(&key) })
            })
            .collect();

        let results = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(join_all(handles))
        });
        results
            .into_iter()
            .any(|joined| joined.unwrap_or(false))
    }

    fn clear(&self) {
        for tier in &self.tiers {
            if !tier.is_available() {
                continue;
            }
            let backend = Arc::clone(&tier.backend);
            tokio::spawn(async move {
                backend.clear();
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lattice_memory::MemoryBackend;

    fn memory_tier() -> Tier<String, i32> {
        let backend: Arc<MemoryBackend<String, i32>> = Arc::new(MemoryBackend::new());
        Tier::new(backend.clone()).with_enumerable(backend)
    }

    #[test]
    fn construction_rejects_fewer_than_two_tiers() {
        let err = ParallelCache::new(vec![memory_tier()], None).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument { .. }));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn set_fans_out_to_every_tier() {
        let cache = ParallelCache::new(vec![memory_tier(), memory_tier(), memory_tier()], None).unwrap();
        cache.set("a".to_string(), 1).unwrap();
        // `set` dispatches detached tasks and returns immediately (spec
        // §4.7); give them a beat to land before asserting.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        for tier in &cache.tiers {
            assert_eq!(tier.backend.try_get(&"a".to_string()), Some(1));
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remove_returns_true_if_any_tier_had_the_key() {
        let t0 = memory_tier();
        let t1 = memory_tier();
        t0.backend.set("a".to_string(), 1).unwrap();
        let cache = ParallelCache::new(vec![t0, t1], None).unwrap();
        assert!(cache.remove(&"a".to_string()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clear_removes_from_every_tier() {
        let t0 = memory_tier();
        let t1 = memory_tier();
        t0.backend.set("a".to_string(), 1).unwrap();
        t1.backend.set("a".to_string(), 1).unwrap();
        let cache = ParallelCache::new(vec![t0, t1], None).unwrap();
        cache.clear();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        for tier in &cache.tiers {
            assert_eq!(tier.backend.try_get(&"a".to_string()), None);
        }
    }

    #[test]
    fn sync_now_without_options_is_not_supported() {
        let cache = ParallelCache::new(vec![memory_tier(), memory_tier()], None).unwrap();
        assert!(matches!(
            cache.trigger_sync_now(),
            Err(Error::NotSupported { .. })
        ));
    }

    #[test]
    fn majority_wins_eliminates_minority_key() {
        let t0 = memory_tier();
        let t1 = memory_tier();
        let t2 = memory_tier();
        t0.backend.set("k".to_string(), 1).unwrap();

        let cache = ParallelCache::new(
            vec![t0, t1, t2],
            Some(SyncOptions {
                conflict_resolution: ConflictResolution::MajorityWins,
                majority_threshold: 0.5,
            }),
        )
        .unwrap();
        cache.trigger_sync_now().unwrap();

        assert_eq!(cache.tiers[0].backend.try_get(&"k".to_string()), None);
    }

    #[test]
    fn majority_wins_propagates_majority_key() {
        let t0 = memory_tier();
        let t1 = memory_tier();
        let t2 = memory_tier();
        t0.backend.set("k".to_string(), 1).unwrap();
        t1.backend.set("k".to_string(), 1).unwrap();

        let cache = ParallelCache::new(
            vec![t0, t1, t2],
            Some(SyncOptions {
                conflict_resolution: ConflictResolution::MajorityWins,
                majority_threshold: 0.5,
            }),
        )
        .unwrap();
        cache.trigger_sync_now().unwrap();

        for tier in &cache.tiers {
            assert_eq!(tier.backend.try_get(&"k".to_string()), Some(1));
        }
    }

    #[test]
    fn primary_wins_removes_from_others_when_primary_absent() {
        let t0 = memory_tier();
        let t1 = memory_tier();
        t1.backend.set("k".to_string(), 1).unwrap();

        let cache = ParallelCache::new(
            vec![t0, t1],
            Some(SyncOptions {
                conflict_resolution: ConflictResolution::PrimaryWins,
                majority_threshold: 0.5,
            }),
        )
        .unwrap();
        cache.trigger_sync_now().unwrap();

        assert_eq!(cache.tiers[1].backend.try_get(&"k".to_string()), None);
    }
}
