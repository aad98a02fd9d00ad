//! The [`ResourceClient`] capability and its shared [`Client`] handle
use crate::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use informer_core::{Collection, ListParams, ObjectList, ResourceObject, ResourceVersion, WatchEvent, WatchParams};
use std::{fmt, sync::Arc};

/// A stream of raw watch events, as returned by [`ResourceClient::watch`]
///
/// The stream ends when the server closes the connection. Dropping it closes the watch.
pub type WatchStream = BoxStream<'static, Result<WatchEvent>>;

/// One-shot and streaming calls against a resource collection
///
/// Implementations must be cheap to share between tasks; the informer and the
/// driver call into the same client concurrently.
#[async_trait]
pub trait ResourceClient: Send + Sync {
    /// List every object in the collection matching `lp`, plus the version of the snapshot
    ///
    /// Fails with [`Error::NotFound`](crate::Error::NotFound) when the collection's namespace is absent.
    async fn list(&self, collection: &Collection, lp: &ListParams) -> Result<ObjectList>;

    /// Create an object, returning it as stored by the server
    ///
    /// Fails with [`Error::AlreadyExists`](crate::Error::AlreadyExists) if the identity collides.
    async fn create(&self, collection: &Collection, obj: &ResourceObject) -> Result<ResourceObject>;

    /// Delete an object by name
    ///
    /// Fails with [`Error::NotFound`](crate::Error::NotFound) if it does not exist.
    async fn delete(&self, collection: &Collection, name: &str) -> Result<()>;

    /// Stream changes to the collection that happened after `since`
    ///
    /// Fails with [`Error::Expired`](crate::Error::Expired) when `since` is no longer retained.
    async fn watch(
        &self,
        collection: &Collection,
        wp: &WatchParams,
        since: &ResourceVersion,
    ) -> Result<WatchStream>;
}

/// A cloneable handle to some [`ResourceClient`]
#[derive(Clone)]
pub struct Client {
    inner: Arc<dyn ResourceClient>,
}

impl Client {
    /// Wrap a client implementation
    pub fn new<C: ResourceClient + 'static>(client: C) -> Self {
        Self {
            inner: Arc::new(client),
        }
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").finish_non_exhaustive()
    }
}

#[async_trait]
impl ResourceClient for Client {
    async fn list(&self, collection: &Collection, lp: &ListParams) -> Result<ObjectList> {
        self.inner.list(collection, lp).await
    }

    async fn create(&self, collection: &Collection, obj: &ResourceObject) -> Result<ResourceObject> {
        self.inner.create(collection, obj).await
    }

    async fn delete(&self, collection: &Collection, name: &str) -> Result<()> {
        self.inner.delete(collection, name).await
    }

    async fn watch(
        &self,
        collection: &Collection,
        wp: &WatchParams,
        since: &ResourceVersion,
    ) -> Result<WatchStream> {
        self.inner.watch(collection, wp, since).await
    }
}
