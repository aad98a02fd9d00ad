//! The resource client capability consumed by the podwatch informer and driver
//!
//! A [`ResourceClient`] performs `list`, `create`, `delete` and `watch` against one
//! [`Collection`](informer_core::Collection). Two implementations ship with the crate:
//!
//! - [`KubeClient`] talks to a real cluster through a [`kube::Client`]
//! - [`FakeCluster`](fake::FakeCluster) keeps everything in memory, with failure injection for tests
//!
//! Most callers work through an [`Api`], which binds a [`Client`] to a single collection.
//!
//! ```no_run
//! use informer_client::{Api, Client, fake::FakeCluster};
//! use informer_core::{Kind, ListParams};
//! # async fn wrapper() -> informer_client::Result<()> {
//! let client = Client::new(FakeCluster::seeded());
//! let namespaces = Api::all(client, Kind::Namespace);
//! for ns in namespaces.list(&ListParams::default()).await? {
//!     println!("found namespace {}", ns.name());
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub use api::Api;

pub mod client;
pub use client::{Client, ResourceClient, WatchStream};

pub mod error;
pub use error::{BoxError, Error, Result};

pub mod fake;

#[cfg(feature = "kube")] mod kube_client;
#[cfg(feature = "kube")] pub use kube_client::KubeClient;

pub use informer_core as core;
