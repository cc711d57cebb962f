//! Backend contract, capability traits, and shared error taxonomy for the
//! lattice multi-tier cache.
//!
//! This crate has no concrete backends — it defines the narrow core trait
//! (C1) that [`lattice-memory`](https://docs.rs/lattice-memory),
//! [`lattice-file`](https://docs.rs/lattice-file), and
//! [`lattice-object`](https://docs.rs/lattice-object) implement, the
//! orthogonal capability traits composite caches in
//! [`lattice-hybrid`](https://docs.rs/lattice-hybrid) depend on, and the
//! error taxonomy every crate in the workspace shares.

pub mod backend;
pub mod error;
pub mod events;
pub mod key;

pub use backend::{
    Availability, CacheBackend, Disposable, Enumerable, Events, Key, TimestampedBackend, Value,
};
pub use error::{Error, Result};
pub use events::{OnSetHub, SubscriptionId};
pub use key::{NullableKey, ProbeKey};
