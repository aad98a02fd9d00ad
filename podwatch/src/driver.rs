//! The one-shot setup and teardown sequence
use crate::pod::{PodList, SimplePod};
use informer_client::{Api, Client, Error as ClientError};
use informer_core::{Kind, ListParams, ResourceObject};
use thiserror::Error;
use tracing::info;

/// A failed step of the sequence
///
/// Every step fails with its own variant; the client error is kept as the source.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Listing namespaces failed
    #[error("failed to list namespaces: {0}")]
    ListNamespaces(#[source] ClientError),
    /// Creating the namespace failed
    #[error("failed to create {namespace} namespace: {source}")]
    CreateNamespace {
        /// Namespace that could not be created
        namespace: String,
        /// Underlying client error
        #[source]
        source: ClientError,
    },
    /// Creating the pod failed
    #[error("failed to create pod {name}: {source}")]
    CreatePod {
        /// Pod that could not be created
        name: String,
        /// Underlying client error
        #[source]
        source: ClientError,
    },
    /// Querying pods by label failed
    #[error("failed to list pods with label {label_selector}: {source}")]
    QueryPods {
        /// The selector used
        label_selector: String,
        /// Underlying client error
        #[source]
        source: ClientError,
    },
    /// Deleting the pod failed
    #[error("failed to delete pod {name}: {source}")]
    DeletePod {
        /// Pod that could not be deleted
        name: String,
        /// Underlying client error
        #[source]
        source: ClientError,
    },
    /// Deleting the namespace failed
    #[error("failed to delete {namespace} namespace: {source}")]
    DeleteNamespace {
        /// Namespace that could not be deleted
        namespace: String,
        /// Underlying client error
        #[source]
        source: ClientError,
    },
}

impl DriverError {
    /// The client error that made the step fail
    pub fn client_error(&self) -> &ClientError {
        match self {
            DriverError::ListNamespaces(source)
            | DriverError::CreateNamespace { source, .. }
            | DriverError::CreatePod { source, .. }
            | DriverError::QueryPods { source, .. }
            | DriverError::DeletePod { source, .. }
            | DriverError::DeleteNamespace { source, .. } => source,
        }
    }
}

/// What the driver creates and looks for
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    /// Namespace to create and later delete
    pub namespace: String,
    /// Name of the pod to create inside it
    pub pod_name: String,
    /// Image the pod runs
    pub image: String,
    /// Label selector for the cross-namespace pod query
    pub label_selector: String,
}

impl Default for Target {
    fn default() -> Self {
        Self {
            namespace: "aerospike".into(),
            pod_name: "hello-world".into(),
            image: "hello-world".into(),
            label_selector: "k8s-app=kube-dns".into(),
        }
    }
}

/// What a successful [`Driver::run`] found and made
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Report {
    /// Namespaces that existed before the run
    pub namespaces: Vec<String>,
    /// The pod that was created
    pub pod: SimplePod,
    /// Pods across all namespaces matching the label selector
    pub matched: Vec<SimplePod>,
}

/// Runs the setup and teardown sequence against a [`Client`]
///
/// Each step is a single call. The first failure aborts the sequence; nothing is
/// retried or rolled back.
#[derive(Clone, Debug)]
pub struct Driver {
    client: Client,
    target: Target,
}

impl Driver {
    /// A driver for `target`
    pub fn new(client: Client, target: Target) -> Self {
        Self { client, target }
    }

    /// What this driver creates and looks for
    pub fn target(&self) -> &Target {
        &self.target
    }

    fn namespaces(&self) -> Api {
        Api::all(self.client.clone(), Kind::Namespace)
    }

    fn pods(&self) -> Api {
        Api::namespaced(self.client.clone(), Kind::Pod, &self.target.namespace)
    }

    /// List namespaces, create the namespace and pod, then query pods by label
    ///
    /// # Errors
    ///
    /// Returns the [`DriverError`] of the first step that failed.
    pub async fn run(&self) -> Result<Report, DriverError> {
        let Target {
            namespace,
            pod_name,
            image,
            label_selector,
        } = &self.target;

        let namespaces = self
            .namespaces()
            .list(&ListParams::default())
            .await
            .map_err(DriverError::ListNamespaces)?
            .items
            .into_iter()
            .map(|ns| ns.metadata.name)
            .collect::<Vec<_>>();
        info!(?namespaces, "k8s namespaces");

        self.namespaces()
            .create(&ResourceObject::namespace(namespace))
            .await
            .map_err(|source| DriverError::CreateNamespace {
                namespace: namespace.clone(),
                source,
            })?;
        info!(%namespace, "created new namespace");

        let created = self
            .pods()
            .create(&ResourceObject::pod(namespace, pod_name, image))
            .await
            .map_err(|source| DriverError::CreatePod {
                name: pod_name.clone(),
                source,
            })?;
        let pod = SimplePod::from(&created);
        info!(%pod, "created pod");

        let matched = Api::all(self.client.clone(), Kind::Pod)
            .list(&ListParams::default().labels(label_selector))
            .await
            .map_err(|source| DriverError::QueryPods {
                label_selector: label_selector.clone(),
                source,
            })?
            .items
            .iter()
            .map(SimplePod::from)
            .collect::<Vec<_>>();
        info!(pods = %PodList(&matched), %label_selector, "pods with label");

        Ok(Report {
            namespaces,
            pod,
            matched,
        })
    }

    /// Delete the pod, then the namespace
    ///
    /// # Errors
    ///
    /// Returns the [`DriverError`] of the first step that failed.
    pub async fn cleanup(&self) -> Result<(), DriverError> {
        let Target {
            namespace, pod_name, ..
        } = &self.target;

        self.pods()
            .delete(pod_name)
            .await
            .map_err(|source| DriverError::DeletePod {
                name: pod_name.clone(),
                source,
            })?;
        info!(pod = %pod_name, %namespace, "deleted pod");

        self.namespaces()
            .delete(namespace)
            .await
            .map_err(|source| DriverError::DeleteNamespace {
                namespace: namespace.clone(),
                source,
            })?;
        info!(%namespace, "deleted namespace");
        Ok(())
    }
}
