//! API helpers bound to a single collection
use crate::{client::ResourceClient, Client, Result, WatchStream};
use informer_core::{Collection, Kind, ListParams, ObjectList, ResourceObject, ResourceVersion, WatchParams};

/// The generic Api abstraction
///
/// This abstracts over a [`Collection`] and a [`Client`] so that you get a clean
/// interface to the collection's list, create, delete and watch calls.
#[derive(Clone, Debug)]
pub struct Api {
    client: Client,
    collection: Collection,
}

impl Api {
    /// Cluster level resources, or resources viewed across all namespaces
    pub fn all(client: Client, kind: Kind) -> Self {
        Self {
            client,
            collection: Collection::all(kind),
        }
    }

    /// Namespaced resource within a given namespace
    pub fn namespaced(client: Client, kind: Kind, namespace: &str) -> Self {
        Self {
            client,
            collection: Collection::namespaced(kind, namespace),
        }
    }

    /// The collection this api talks to
    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Get a list of objects, and the version the list was taken at
    pub async fn list(&self, lp: &ListParams) -> Result<ObjectList> {
        self.client.list(&self.collection, lp).await
    }

    /// Create an object
    ///
    /// For a namespaced api, an object without a namespace is created in the api's namespace.
    pub async fn create(&self, obj: &ResourceObject) -> Result<ResourceObject> {
        match (&self.collection.namespace, &obj.metadata.namespace) {
            (Some(ns), None) if self.collection.kind.is_namespaced() => {
                let obj = obj.clone().within(ns);
                self.client.create(&self.collection, &obj).await
            }
            _ => self.client.create(&self.collection, obj).await,
        }
    }

    /// Delete a named object
    pub async fn delete(&self, name: &str) -> Result<()> {
        self.client.delete(&self.collection, name).await
    }

    /// Watch the collection for changes after `since`
    pub async fn watch(&self, wp: &WatchParams, since: &ResourceVersion) -> Result<WatchStream> {
        self.client.watch(&self.collection, wp, since).await
    }
}
