//! Object-store cache backend (C5): a [`lattice_core::CacheBackend`] whose
//! storage lives behind an injected [`ObjectTransport`], bridged from async
//! to the workspace's synchronous backend contract.

mod object_backend;
mod transport;

pub use object_backend::ObjectStoreBackend;
pub use transport::{ObjectPage, ObjectTransport, TransportError};
