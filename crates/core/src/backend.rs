//! The cache backend contract (C1) and its orthogonal capability traits.
//!
//! The distilled spec's source expressed this as a deep inheritance chain
//! (`CacheBase` plus optional marker interfaces). Per Design Notes §9 this is
//! re-architected as one narrow core trait plus capability traits a backend
//! opts into independently — a composite cache only requires the
//! capabilities it actually needs (e.g. `DirectionalTierCache`'s migration
//! pass requires `Enumerable` on the source tier and `Availability` on the
//! target, nothing more).

use crate::error::Result;
use crate::key::NullableKey;
use chrono::{DateTime, Utc};
use std::hash::Hash;

/// Bounds shared by every key type used with a [`CacheBackend`].
pub trait Key: NullableKey + Eq + Hash + Clone + Send + Sync + 'static {}
impl<T> Key for T where T: NullableKey + Eq + Hash + Clone + Send + Sync + 'static {}

/// Bounds shared by every value type used with a [`CacheBackend`].
pub trait Value: Clone + Send + Sync + 'static {}
impl<T> Value for T where T: Clone + Send + Sync + 'static {}

/// The core key/value store contract every backend and composite cache
/// implements. All operations are synchronous; a backend whose underlying
/// storage is inherently asynchronous (e.g. an object store) bridges with
/// `tokio::task::block_in_place` rather than exposing an async contract
/// here (see `SPEC_FULL.md` §1 "Async runtime").
pub trait CacheBackend<K: Key, V: Value>: Send + Sync {
    /// Look up `key`. Returns `None` on absence *or* on a backend error
    /// that is indistinguishable from absence — this trait never raises for
    /// a missing key.
    fn try_get(&self, key: &K) -> Option<V>;

    /// Overwrite or insert `(key, value)`. Idempotent for identical
    /// `(key, value)` pairs. Rejects a null key with
    /// [`crate::error::Error::InvalidArgument`]; other failures must not
    /// corrupt the store.
    ///
    /// A present value that happens to serialize to a "null"-like wire
    /// representation (e.g. `V = Option<T>` storing `None`) is still a
    /// present value — only the *key* can make `set` fail with
    /// `InvalidArgument`. Erasing an entry is always `remove`, never `set`.
    fn set(&self, key: K, value: V) -> Result<()>;

    /// Remove `key`. Returns `true` iff a mapping existed and was removed;
    /// `false` for an absent key or a tolerated backend error.
    fn remove(&self, key: &K) -> bool;

    /// Remove every entry. Never raises.
    fn clear(&self);
}

/// A backend's self-reported readiness to accept operations, without
/// executing them.
pub trait Availability: Send + Sync {
    /// Returns whether this backend is reachable/ready right now.
    fn is_available(&self) -> bool;
}

/// Finite, snapshot-like key enumeration. May miss concurrent mutations but
/// never yields a key that was never present.
pub trait Enumerable<K: Key>: Send + Sync {
    /// Return a snapshot of the currently known keys.
    fn keys(&self) -> Vec<K>;
}

/// Multicast notification fired after a successful [`CacheBackend::set`].
pub trait Events<K: Key, V: Value>: Send + Sync {
    /// Subscribe to `on_set`. The callback is invoked outside the backend's
    /// storage lock, after the mutation is observable to a subsequent
    /// `try_get`.
    fn subscribe_on_set(
        &self,
        callback: std::sync::Arc<dyn Fn(&K, &V) + Send + Sync>,
    ) -> crate::events::SubscriptionId;

    /// Remove a previously registered subscriber.
    fn unsubscribe_on_set(&self, id: crate::events::SubscriptionId);
}

/// A tier a composite cache owns outright, rather than merely borrows, and
/// so must tear down on its own disposal.
pub trait Disposable: Send + Sync {
    /// Release any resources (background tasks, file handles, connections)
    /// held by this tier.
    fn dispose(&self);
}

/// Backends that store a timestamp alongside each value.
pub trait TimestampedBackend<K: Key, V: Value>: CacheBackend<K, V> {
    /// Write `value` under `key` with the caller-supplied timestamp,
    /// verbatim — no ordering validation is performed against any prior
    /// timestamp for the same key.
    fn set_with_timestamp(&self, key: K, value: V, timestamp: DateTime<Utc>) -> Result<()>;

    /// Look up `key`, returning both the value and the timestamp it was
    /// last written with.
    fn try_get_with_timestamp(&self, key: &K) -> Option<(V, DateTime<Utc>)>;
}
