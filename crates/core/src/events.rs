//! Multicast `on_set` subscriber list shared by backends that implement
//! [`crate::backend::Events`].
//!
//! The distilled spec's source modelled this as a multicast delegate; the
//! idiomatic Rust shape is an explicit subscriber list guarded by its own
//! mutex, invoked *outside* the backend's storage lock so a subscriber that
//! re-enters the backend cannot deadlock against it (see Design Notes §9 in
//! `SPEC_FULL.md`). This mirrors the add/remove/notify shape of
//! `cuenv_events::bus::EventBus`, adapted from async broadcast to a
//! synchronous multicast because the backend contract itself is synchronous.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Opaque handle returned by [`OnSetHub::subscribe`], used to unsubscribe later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber<K, V> = Arc<dyn Fn(&K, &V) + Send + Sync>;

/// Subscriber list for a backend's `on_set` event.
pub struct OnSetHub<K, V> {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber<K, V>)>>,
}

impl<K, V> OnSetHub<K, V> {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Register a subscriber, returning an id that can later be passed to
    /// [`OnSetHub::unsubscribe`].
    #[allow(clippy::missing_panics_doc)]
    pub fn subscribe(&self, callback: Subscriber<K, V>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((id, callback));
        id
    }

    /// Remove a previously registered subscriber. Safe to call with an
    /// already-removed or unknown id.
    #[allow(clippy::missing_panics_doc)]
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .retain(|(existing, _)| *existing != id);
    }

    /// Invoke every subscriber with `(key, value)`. The caller must not be
    /// holding the backend's storage lock when calling this.
    #[allow(clippy::missing_panics_doc)]
    pub fn notify(&self, key: &K, value: &V) {
        let callbacks: Vec<Subscriber<K, V>> = self
            .subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(key, value);
        }
    }

    /// Number of currently registered subscribers.
    #[allow(clippy::missing_panics_doc)]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

impl<K, V> Default for OnSetHub<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> std::fmt::Debug for OnSetHub<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnSetHub")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn notify_invokes_all_subscribers() {
        let hub: OnSetHub<String, i32> = OnSetHub::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let c1 = Arc::clone(&calls);
        hub.subscribe(Arc::new(move |_k: &String, _v: &i32| {
            c1.fetch_add(1, Ordering::SeqCst);
        }));
        let c2 = Arc::clone(&calls);
        hub.subscribe(Arc::new(move |_k: &String, _v: &i32| {
            c2.fetch_add(1, Ordering::SeqCst);
        }));

        hub.notify(&"k".to_string(), &1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_stops_future_notifications() {
        let hub: OnSetHub<String, i32> = OnSetHub::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let id = hub.subscribe(Arc::new(move |_k: &String, _v: &i32| {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        hub.notify(&"k".to_string(), &1);
        hub.unsubscribe(id);
        hub.notify(&"k".to_string(), &1);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn subscriber_count_tracks_subscriptions() {
        let hub: OnSetHub<String, i32> = OnSetHub::new();
        assert_eq!(hub.subscriber_count(), 0);
        let id = hub.subscribe(Arc::new(|_k: &String, _v: &i32| {}));
        assert_eq!(hub.subscriber_count(), 1);
        hub.unsubscribe(id);
        assert_eq!(hub.subscriber_count(), 0);
    }
}
