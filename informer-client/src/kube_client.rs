//! A [`ResourceClient`] backed by a real apiserver through [`kube`]
use crate::{client::ResourceClient, Error, Result, WatchStream};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use informer_core::{
    watch::Bookmark, Collection, ErrorResponse, Kind, ListParams, ObjectList, ObjectMeta, ResourceObject,
    ResourceVersion, WatchEvent, WatchParams,
};
use k8s_openapi::{
    api::core::v1::{Namespace, Pod},
    apimachinery::pkg::apis::meta::v1 as meta,
};
use kube::{
    api::{self, DeleteParams, PostParams},
    core::WatchEvent as KubeWatchEvent,
    Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt::Debug;
use tracing::{debug, trace};

/// Talks to the apiserver a [`kube::Client`] is configured for
///
/// Only [`Kind::Namespace`] and [`Kind::Pod`] are wired up. Credentials, TLS and
/// config inference are entirely [`kube`]'s concern.
#[derive(Clone)]
pub struct KubeClient {
    client: kube::Client,
}

impl KubeClient {
    /// Wrap an already configured client
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    /// Infer a configuration from the environment (`KUBECONFIG`, in-cluster env) and connect
    pub async fn try_default() -> Result<Self> {
        let client = kube::Client::try_default().await.map_err(from_kube)?;
        Ok(Self::new(client))
    }

    async fn list_kind<K: KubeKind>(&self, collection: &Collection, lp: &ListParams) -> Result<ObjectList> {
        let api = K::api(self.client.clone(), collection.namespace.as_deref());
        trace!(%collection, label_selector = ?lp.label_selector, "listing");
        let list = api.list(&list_params(lp)).await.map_err(from_kube)?;
        let items = list.items.iter().map(to_object).collect::<Result<Vec<_>>>()?;
        Ok(ObjectList {
            items,
            resource_version: list.metadata.resource_version.map(ResourceVersion::from),
        })
    }

    async fn create_kind<K: KubeKind>(
        &self,
        collection: &Collection,
        obj: &ResourceObject,
    ) -> Result<ResourceObject> {
        let namespace = obj.namespace_name().or(collection.namespace.as_deref());
        let api = K::api(self.client.clone(), namespace);
        let created = api
            .create(&PostParams::default(), &from_object::<K>(obj)?)
            .await
            .map_err(from_kube)?;
        to_object(&created)
    }

    async fn delete_kind<K: KubeKind>(&self, collection: &Collection, name: &str) -> Result<()> {
        if collection.kind.is_namespaced() && collection.namespace.is_none() {
            return Err(Error::Api(ErrorResponse::failure(
                422,
                "Invalid",
                format!("a namespace is required to delete {} \"{name}\"", collection.kind.plural()),
            )));
        }
        let api = K::api(self.client.clone(), collection.namespace.as_deref());
        api.delete(name, &DeleteParams::default()).await.map_err(from_kube)?;
        Ok(())
    }

    async fn watch_kind<K: KubeKind>(
        &self,
        collection: &Collection,
        wp: &WatchParams,
        since: &ResourceVersion,
    ) -> Result<WatchStream> {
        let api = K::api(self.client.clone(), collection.namespace.as_deref());
        debug!(%collection, resource_version = %since, "opening watch");
        let stream = api
            .watch(&watch_params(wp), since.as_str())
            .await
            .map_err(from_kube)?;
        Ok(stream
            .map_err(from_kube)
            .and_then(|event| futures::future::ready(convert_event(event)))
            .boxed())
    }
}

impl Debug for KubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClient").finish_non_exhaustive()
    }
}

impl From<kube::Client> for KubeClient {
    fn from(client: kube::Client) -> Self {
        Self::new(client)
    }
}

#[async_trait]
impl ResourceClient for KubeClient {
    async fn list(&self, collection: &Collection, lp: &ListParams) -> Result<ObjectList> {
        match collection.kind {
            Kind::Namespace => self.list_kind::<Namespace>(collection, lp).await,
            Kind::Pod => self.list_kind::<Pod>(collection, lp).await,
        }
    }

    async fn create(&self, collection: &Collection, obj: &ResourceObject) -> Result<ResourceObject> {
        match collection.kind {
            Kind::Namespace => self.create_kind::<Namespace>(collection, obj).await,
            Kind::Pod => self.create_kind::<Pod>(collection, obj).await,
        }
    }

    async fn delete(&self, collection: &Collection, name: &str) -> Result<()> {
        match collection.kind {
            Kind::Namespace => self.delete_kind::<Namespace>(collection, name).await,
            Kind::Pod => self.delete_kind::<Pod>(collection, name).await,
        }
    }

    async fn watch(
        &self,
        collection: &Collection,
        wp: &WatchParams,
        since: &ResourceVersion,
    ) -> Result<WatchStream> {
        match collection.kind {
            Kind::Namespace => self.watch_kind::<Namespace>(collection, wp, since).await,
            Kind::Pod => self.watch_kind::<Pod>(collection, wp, since).await,
        }
    }
}

/// The typed k8s-openapi objects behind each [`Kind`]
trait KubeKind:
    Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Serialize + Send + Sync + 'static
{
    fn api(client: kube::Client, namespace: Option<&str>) -> kube::Api<Self>;

    fn spec(&self) -> serde_json::Result<Value>;

    fn from_parts(metadata: meta::ObjectMeta, spec: Value) -> serde_json::Result<Self>;
}

impl KubeKind for Pod {
    fn api(client: kube::Client, namespace: Option<&str>) -> kube::Api<Self> {
        match namespace {
            Some(ns) => kube::Api::namespaced(client, ns),
            None => kube::Api::all(client),
        }
    }

    fn spec(&self) -> serde_json::Result<Value> {
        serde_json::to_value(&self.spec)
    }

    fn from_parts(metadata: meta::ObjectMeta, spec: Value) -> serde_json::Result<Self> {
        Ok(Pod {
            metadata,
            spec: serde_json::from_value(spec)?,
            ..Pod::default()
        })
    }
}

impl KubeKind for Namespace {
    fn api(client: kube::Client, _: Option<&str>) -> kube::Api<Self> {
        kube::Api::all(client)
    }

    fn spec(&self) -> serde_json::Result<Value> {
        serde_json::to_value(&self.spec)
    }

    fn from_parts(metadata: meta::ObjectMeta, spec: Value) -> serde_json::Result<Self> {
        Ok(Namespace {
            metadata,
            spec: serde_json::from_value(spec)?,
            ..Namespace::default()
        })
    }
}

fn to_object<K: KubeKind>(obj: &K) -> Result<ResourceObject> {
    let meta = obj.meta();
    Ok(ResourceObject {
        metadata: ObjectMeta {
            name: meta.name.clone().unwrap_or_default(),
            namespace: meta.namespace.clone(),
            resource_version: meta.resource_version.clone().map(ResourceVersion::from),
            labels: meta.labels.clone().unwrap_or_default(),
        },
        spec: obj.spec().map_err(Error::InvalidObject)?,
    })
}

fn from_object<K: KubeKind>(obj: &ResourceObject) -> Result<K> {
    let labels = &obj.metadata.labels;
    let metadata = meta::ObjectMeta {
        name: Some(obj.metadata.name.clone()),
        namespace: obj.metadata.namespace.clone(),
        labels: (!labels.is_empty()).then(|| labels.clone()),
        ..meta::ObjectMeta::default()
    };
    K::from_parts(metadata, obj.spec.clone()).map_err(Error::InvalidObject)
}

fn convert_event<K: KubeKind>(event: KubeWatchEvent<K>) -> Result<WatchEvent> {
    Ok(match event {
        KubeWatchEvent::Added(obj) => WatchEvent::Added(to_object(&obj)?),
        KubeWatchEvent::Modified(obj) => WatchEvent::Modified(to_object(&obj)?),
        KubeWatchEvent::Deleted(obj) => WatchEvent::Deleted(to_object(&obj)?),
        KubeWatchEvent::Bookmark(bm) => WatchEvent::Bookmark(Bookmark::at(bm.metadata.resource_version.into())),
        KubeWatchEvent::Error(err) => WatchEvent::Error(convert_status(err)),
    })
}

fn convert_status(err: kube::core::ErrorResponse) -> ErrorResponse {
    ErrorResponse {
        status: err.status,
        message: err.message,
        reason: err.reason,
        code: err.code,
    }
}

fn from_kube(err: kube::Error) -> Error {
    match err {
        kube::Error::Api(resp) => Error::from_response(convert_status(resp)),
        kube::Error::SerdeError(err) => Error::InvalidObject(err),
        other => Error::Unavailable(Box::new(other)),
    }
}

fn list_params(lp: &ListParams) -> api::ListParams {
    api::ListParams {
        label_selector: lp.label_selector.clone(),
        timeout: lp.timeout,
        ..api::ListParams::default()
    }
}

fn watch_params(wp: &WatchParams) -> api::WatchParams {
    api::WatchParams {
        label_selector: wp.label_selector.clone(),
        timeout: wp.timeout,
        bookmarks: wp.bookmarks,
        ..api::WatchParams::default()
    }
}
