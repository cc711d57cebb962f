//! C5: a cache backend whose entries live in an object store reached through
//! an injected [`ObjectTransport`].

use crate::transport::{ObjectTransport, TransportError};
use lattice_core::{
    Availability, CacheBackend, Enumerable, Error, Events, Key, OnSetHub, Result, SubscriptionId,
    Value,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::Arc;

const LIST_PAGE_SIZE: usize = 1000;
const DELETE_BATCH_SIZE: usize = 1000;

type KeyToName<K> = Arc<dyn Fn(&K) -> String + Send + Sync>;
type NameToKey<K> = Arc<dyn Fn(&str) -> Option<K> + Send + Sync>;

/// Cache backend storing each entry as one JSON object in a bucket.
///
/// All operations are synchronous per the C1 contract; each call bridges to
/// `transport`'s async methods with `tokio::task::block_in_place` plus
/// `Handle::current().block_on`, the same bridge `cuenv_remote::create_remote_backend`
/// uses to give an async remote-cache client a blocking call surface. As with
/// that bridge, constructing or calling this backend requires already being
/// inside a multi-threaded Tokio runtime.
pub struct ObjectStoreBackend<K, V, T> {
    transport: Arc<T>,
    bucket: String,
    key_to_name: KeyToName<K>,
    name_to_key: Option<NameToKey<K>>,
    on_set: OnSetHub<K, V>,
    _marker: PhantomData<fn() -> V>,
}

impl<K, V, T> ObjectStoreBackend<K, V, T>
where
    K: Key,
    V: Value,
    T: ObjectTransport,
{
    /// Build a backend with an explicit key-to-object-name mapper and no
    /// reverse mapping. [`keys`](Self::keys) will fail with
    /// [`Error::NotSupported`]; per spec §4.5 a mapping that cannot be
    /// inverted simply forgoes enumeration.
    pub fn new(transport: Arc<T>, bucket: impl Into<String>, key_to_name: KeyToName<K>) -> Self {
        Self {
            transport,
            bucket: bucket.into(),
            key_to_name,
            name_to_key: None,
            on_set: OnSetHub::new(),
            _marker: PhantomData,
        }
    }

    /// Build a backend with both directions of the key/name mapping, so
    /// [`keys`](Self::keys) can enumerate.
    pub fn with_reverse_mapping(
        transport: Arc<T>,
        bucket: impl Into<String>,
        key_to_name: KeyToName<K>,
        name_to_key: NameToKey<K>,
    ) -> Self {
        Self {
            transport,
            bucket: bucket.into(),
            key_to_name,
            name_to_key: Some(name_to_key),
            on_set: OnSetHub::new(),
            _marker: PhantomData,
        }
    }

    fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut))
    }

    fn object_name(&self, key: &K) -> Option<String> {
        let name = (self.key_to_name)(key);
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }

    /// Enumerate every key currently present, per spec §4.5's paginated
    /// listing. Fails with [`Error::NotSupported`] when this backend was
    /// built without a reverse key mapper.
    pub fn keys(&self) -> Result<Vec<K>> {
        let Some(name_to_key) = self.name_to_key.clone() else {
            return Err(Error::not_supported("ObjectStoreBackend::keys (no reverse key mapping configured)"));
        };

        self.block_on(async {
            let mut keys = Vec::new();
            let mut token: Option<String> = None;
            loop {
                let page = self
                    .transport
                    .list_objects_page(&self.bucket, token.as_deref(), LIST_PAGE_SIZE)
                    .await
                    .map_err(|e| Error::backend_failure(e, "listing objects"))?;
                keys.extend(page.object_names.iter().filter_map(|name| name_to_key(name)));
                match page.next_token {
                    Some(next) => token = Some(next),
                    None => break,
                }
            }
            Ok(keys)
        })
    }
}

impl<K, V, T> CacheBackend<K, V> for ObjectStoreBackend<K, V, T>
where
    K: Key,
    V: Value + Serialize + DeserializeOwned,
    T: ObjectTransport + 'static,
{
    fn try_get(&self, key: &K) -> Option<V> {
        let name = self.object_name(key)?;
        self.block_on(async {
            match self.transport.get_object(&self.bucket, &name).await {
                Ok(bytes) => match serde_json::from_slice::<V>(&bytes) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        tracing::warn!(error = %e, %name, "failed to decode object body");
                        None
                    }
                },
                Err(TransportError::NotFound) => None,
                Err(e) => {
                    tracing::warn!(error = %e, %name, "object store get failed, treating as absent");
                    None
                }
            }
        })
    }

    fn set(&self, key: K, value: V) -> Result<()> {
        let Some(name) = self.object_name(&key) else {
            return Err(Error::invalid_argument(
                "key mapped to an empty object name",
            ));
        };
        let body = serde_json::to_vec(&value)
            .map_err(|e| Error::backend_failure(e, "serializing cache value"))?;

        self.block_on(
            self.transport
                .put_object(&self.bucket, &name, body, "application/json"),
        )
        .map_err(|e| Error::backend_failure(e, "uploading object"))?;

        self.on_set.notify(&key, &value);
        Ok(())
    }

    fn remove(&self, key: &K) -> bool {
        let Some(name) = self.object_name(key) else {
            return false;
        };
        match self.block_on(self.transport.delete_object(&self.bucket, &name)) {
            Ok(()) => true,
            Err(TransportError::NotFound) => false,
            Err(e) => {
                tracing::warn!(error = %e, %name, "object store delete failed, tolerated");
                false
            }
        }
    }

    fn clear(&self) {
        self.block_on(async {
            let mut token: Option<String> = None;
            loop {
                let page = match self
                    .transport
                    .list_objects_page(&self.bucket, token.as_deref(), LIST_PAGE_SIZE)
                    .await
                {
                    Ok(page) => page,
                    Err(e) => {
                        tracing::warn!(error = %e, "object store list failed during clear");
                        return;
                    }
                };

                for chunk in page.object_names.chunks(DELETE_BATCH_SIZE) {
                    if let Err(e) = self
                        .transport
                        .delete_objects_batch(&self.bucket, chunk)
                        .await
                    {
                        tracing::warn!(error = %e, "object store batch delete failed during clear");
                    }
                }

                match page.next_token {
                    Some(next) => token = Some(next),
                    None => break,
                }
            }
        });
    }
}

impl<K, V, T> Events<K, V> for ObjectStoreBackend<K, V, T>
where
    K: Key,
    V: Value,
    T: ObjectTransport,
{
    fn subscribe_on_set(&self, callback: Arc<dyn Fn(&K, &V) + Send + Sync>) -> SubscriptionId {
        self.on_set.subscribe(callback)
    }

    fn unsubscribe_on_set(&self, id: SubscriptionId) {
        self.on_set.unsubscribe(id);
    }
}

impl<K, V, T> Availability for ObjectStoreBackend<K, V, T>
where
    K: Key,
    V: Value,
    T: ObjectTransport,
{
    fn is_available(&self) -> bool {
        self.block_on(self.transport.head_bucket(&self.bucket))
            .is_ok()
    }
}

/// Lets an object-store tier install as an enumerable tier (e.g.
/// `Tier::with_enumerable`) alongside the other C2-C5 backends. [`Enumerable`]
/// has no `Result` in its signature, so a backend built without a reverse
/// key mapping degrades to reporting no keys rather than propagating
/// [`Error::NotSupported`] — callers that need to distinguish "empty" from
/// "cannot enumerate" should use the inherent, fallible
/// [`keys`](Self::keys) instead.
impl<K, V, T> Enumerable<K> for ObjectStoreBackend<K, V, T>
where
    K: Key,
    V: Value + Serialize + DeserializeOwned,
    T: ObjectTransport + 'static,
{
    fn keys(&self) -> Vec<K> {
        match self.keys() {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(error = %e, "object store backend cannot enumerate keys, reporting none");
                Vec::new()
            }
        }
    }
}
