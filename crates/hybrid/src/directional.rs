//! C6: a tier list probed/written in a declared direction, with an optional
//! background migration pass that moves (not copies) entries toward the
//! primary or secondary end.

use crate::tier::Tier;
use lattice_core::{Availability, CacheBackend, Error, Key, Result, Value};
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Order in which tiers are probed for reads and selected for writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Probe/write starting from index 0 toward the last tier.
    LowToHigh,
    /// Probe/write starting from the last tier toward index 0.
    HighToLow,
}

/// Which direction background migration moves entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStrategy {
    /// Move entries toward the primary (first-probed) tier.
    PromoteTowardPrimary,
    /// Move entries toward the secondary (last-probed) tier.
    DemoteTowardSecondary,
}

/// A tier list probed/written in `direction`, with an optional periodic
/// migration pass that moves entries per `strategy`.
pub struct DirectionalTierCache<K, V> {
    tiers: Vec<Tier<K, V>>,
    direction: Direction,
    strategy: MigrationStrategy,
    timer: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl<K: Key, V: Value> DirectionalTierCache<K, V> {
    /// Build a cache over `tiers`, probed/written in `direction`, migrating
    /// per `strategy`. `interval` starts a background migration timer when
    /// `Some` and non-zero; pass `None` to migrate only via
    /// [`trigger_migration_now`](Self::trigger_migration_now).
    #[must_use]
    pub fn new(
        tiers: Vec<Tier<K, V>>,
        direction: Direction,
        strategy: MigrationStrategy,
    ) -> Self {
        Self {
            tiers,
            direction,
            strategy,
            timer: Mutex::new(None),
        }
    }

    fn timer_guard(&self) -> std::sync::MutexGuard<'_, Option<(CancellationToken, JoinHandle<()>)>> {
        self.timer
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Start a background task that calls
    /// [`trigger_migration_now`](Self::trigger_migration_now) every
    /// `interval`. Replaces any previously running timer. Requires a Tokio
    /// runtime context. Takes `this` as an `Arc` (rather than `&self`)
    /// because the spawned task must outlive the caller's borrow.
    pub fn start_migration_timer(this: &std::sync::Arc<Self>, interval: Duration)
    where
        K: 'static,
        V: 'static,
    {
        if interval.is_zero() {
            return;
        }
        this.stop_migration_timer();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let worker = std::sync::Arc::clone(this);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = cancel_clone.cancelled() => break,
                    _ = ticker.tick() => worker.trigger_migration_now(),
                }
            }
        });
        *this.timer_guard() = Some((cancel, handle));
    }

    fn stop_migration_timer(&self) {
        if let Some((cancel, _handle)) = self.timer_guard().take() {
            cancel.cancel();
        }
    }

    fn migration_offset(&self) -> i64 {
        match (self.strategy, self.direction) {
            (MigrationStrategy::PromoteTowardPrimary, Direction::LowToHigh)
            | (MigrationStrategy::DemoteTowardSecondary, Direction::HighToLow) => 1,
            _ => -1,
        }
    }

    /// Run one full migration pass synchronously, per spec §4.6's offset
    /// rule: for each adjacent (source, target) pair in the migration
    /// direction, move every key the source reports that the target does
    /// not already hold, verifying with a read-after-write before removing
    /// it from the source. A failure at any step aborts the whole pass.
    pub fn trigger_migration_now(&self) {
        let offset = self.migration_offset();
        let n = self.tiers.len() as i64;
        let sources: Vec<i64> = if offset == 1 {
            (0..n).collect()
        } else {
            (0..n).rev().collect()
        };

        for source_idx in sources {
            let target_idx = source_idx + offset;
            if target_idx < 0 || target_idx >= n {
                continue;
            }
            if !self.migrate_pair(source_idx as usize, target_idx as usize) {
                return;
            }
        }
    }

    fn migrate_pair(&self, source_idx: usize, target_idx: usize) -> bool {
        let source = &self.tiers[source_idx];
        let target = &self.tiers[target_idx];

        let Some(enumerable) = source.enumerable() else {
            return true;
        };
        if !target.is_available() {
            return true;
        }

        for key in enumerable.keys() {
            if target.backend.try_get(&key).is_some() {
                continue;
            }
            let Some(value) = source.backend.try_get(&key) else {
                continue;
            };
            if let Err(e) = target.backend.set(key.clone(), value) {
                tracing::warn!(error = %e, "migration write failed, aborting pass");
                return false;
            }
            if target.backend.try_get(&key).is_none() {
                tracing::warn!("migration read-after-write verification failed, aborting pass");
                return false;
            }
            source.backend.remove(&key);
        }
        true
    }

    fn iter_in_direction(&self) -> Box<dyn DoubleEndedIterator<Item = &Tier<K, V>> + '_> {
        match self.direction {
            Direction::LowToHigh => Box::new(self.tiers.iter()),
            Direction::HighToLow => Box::new(self.tiers.iter().rev()),
        }
    }

    /// Cancel the migration timer (if running) and dispose every owned tier.
    pub fn dispose(&self) {
        self.stop_migration_timer();
        for tier in &self.tiers {
            tier.dispose();
        }
    }
}

impl<K: Key, V: Value> CacheBackend<K, V> for DirectionalTierCache<K, V> {
    fn try_get(&self, key: &K) -> Option<V> {
        for tier in self.iter_in_direction() {
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
        for tier in self.iter_in_direction() {
            if tier.is_available() {
                return tier.backend.set(key, value);
            }
        }
        Err(Error::invalid_operation(
            "no available tier to accept the write",
        ))
    }

    fn remove(&self, key: &K) -> bool {
        let mut removed = false;
        for tier in &self.tiers {
            if tier.is_available() {
                removed |= tier.backend.remove(key);
            }
        }
        removed
    }

    fn clear(&self) {
        for tier in &self.tiers {
            if tier.is_available() {
                tier.backend.clear();
            }
        }
    }
}

impl<K: Key, V: Value> Availability for DirectionalTierCache<K, V> {
    fn is_available(&self) -> bool {
        self.tiers.iter().any(Tier::is_available)
    }
}
