//! The `ObjectTransport` contract (spec §4.5, §6 "Object store transport"):
//! the only seam between [`crate::ObjectStoreBackend`] and a concrete object
//! store SDK. A caller supplies an implementation; this crate ships none,
//! mirroring the aws/gcp split in the wider workspace where transport
//! crates are kept separate from the thing that consumes them.

use async_trait::async_trait;
use thiserror::Error;

/// One page of a bucket listing, as returned by [`ObjectTransport::list_objects_page`].
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    /// Object names observed in this page.
    pub object_names: Vec<String>,
    /// Opaque continuation token for the next page, `None` if this was the last.
    pub next_token: Option<String>,
}

/// Error raised by an [`ObjectTransport`] implementation.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The requested object does not exist. Distinguished from other
    /// failures so the backend can translate it to "absent" on reads and to
    /// `false` on `remove`, per spec §4.5.
    #[error("object not found")]
    NotFound,
    /// Any other transport-level failure (network, auth, serialization on
    /// the wire, etc).
    #[error("transport error: {0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Async object-store operations an [`crate::ObjectStoreBackend`] bridges to
/// from the synchronous [`lattice_core::CacheBackend`] contract.
///
/// Implementations are expected to wrap a real SDK client (S3, GCS, Azure
/// Blob, ...); this crate only defines the seam.
#[async_trait]
pub trait ObjectTransport: Send + Sync {
    /// Fetch the full body of `bucket/key`.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, TransportError>;

    /// Upload `body` as `bucket/key`, overwriting any existing object.
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), TransportError>;

    /// Delete a single object. Implementations should return
    /// [`TransportError::NotFound`] when the key does not exist, so
    /// `remove` can report `false` rather than a tolerated success.
    async fn delete_object(&self, bucket: &str, key: &str) -> Result<(), TransportError>;

    /// Delete up to one batch's worth of keys in a single round trip. Used
    /// by `clear` to stay within the spec's 1000-object batch ceiling.
    async fn delete_objects_batch(
        &self,
        bucket: &str,
        keys: &[String],
    ) -> Result<(), TransportError>;

    /// List one page of object names, following `continuation_token` and
    /// requesting at most `max` names.
    async fn list_objects_page(
        &self,
        bucket: &str,
        continuation_token: Option<&str>,
        max: usize,
    ) -> Result<ObjectPage, TransportError>;

    /// Cheap reachability probe used by [`lattice_core::Availability`],
    /// independent of any particular key.
    async fn head_bucket(&self, bucket: &str) -> Result<(), TransportError>;
}
