//! A [`Tier`] bundles a backend trait object with the orthogonal
//! capabilities (enumeration, availability, disposal) it opts into.
//!
//! Design Notes §9 flags the source's runtime type probe for a backend's
//! specialized capabilities as something to replace with a trait object
//! that exposes the capability directly; a `Tier` is that replacement — the
//! caller states up front which capabilities a given backend has, rather
//! than the composite cache probing for them at runtime.

use lattice_core::{Availability, CacheBackend, Disposable, Enumerable, Key, Value};
use std::sync::Arc;

/// One backend participating in a composite cache, with its declared
/// capabilities.
pub struct Tier<K, V> {
    pub(crate) backend: Arc<dyn CacheBackend<K, V>>,
    enumerable: Option<Arc<dyn Enumerable<K>>>,
    availability: Option<Arc<dyn Availability>>,
    disposable: Option<Arc<dyn Disposable>>,
}

impl<K: Key, V: Value> Tier<K, V> {
    /// Wrap a backend with no declared capabilities beyond the core contract.
    pub fn new(backend: Arc<dyn CacheBackend<K, V>>) -> Self {
        Self {
            backend,
            enumerable: None,
            availability: None,
            disposable: None,
        }
    }

    /// Declare that this tier supports key enumeration.
    #[must_use]
    pub fn with_enumerable(mut self, enumerable: Arc<dyn Enumerable<K>>) -> Self {
        self.enumerable = Some(enumerable);
        self
    }

    /// Declare that this tier can self-report readiness.
    #[must_use]
    pub fn with_availability(mut self, availability: Arc<dyn Availability>) -> Self {
        self.availability = Some(availability);
        self
    }

    /// Declare that the composite cache owns this tier and must dispose it.
    #[must_use]
    pub fn with_disposable(mut self, disposable: Arc<dyn Disposable>) -> Self {
        self.disposable = Some(disposable);
        self
    }

    /// A tier with no [`Availability`] capability is always treated as
    /// available, per spec §4.6/§4.7 ("skipping tiers that declare
    /// themselves unavailable").
    pub(crate) fn is_available(&self) -> bool {
        match &self.availability {
            Some(availability) => availability.is_available(),
            None => true,
        }
    }

    pub(crate) fn enumerable(&self) -> Option<&Arc<dyn Enumerable<K>>> {
        self.enumerable.as_ref()
    }

    pub(crate) fn dispose(&self) {
        if let Some(disposable) = &self.disposable {
            disposable.dispose();
        }
    }
}
