//! The objects we list, watch and cache
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{collections::BTreeMap, fmt};

/// An opaque, server-assigned marker of a point in a collection's change history
///
/// The server totally orders these per collection, but the client never parses or
/// compares them beyond equality: they are handed back to the server verbatim as
/// resume points.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceVersion(String);

impl ResourceVersion {
    /// The raw token, as it should be sent back to the server
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ResourceVersion {
    fn from(rv: String) -> Self {
        Self(rv)
    }
}

impl From<&str> for ResourceVersion {
    fn from(rv: &str) -> Self {
        Self(rv.to_string())
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity and bookkeeping fields shared by every object
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    /// Name, unique within the namespace (or cluster, for cluster-scoped kinds)
    pub name: String,
    /// Namespace, `None` for cluster-scoped kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Assigned by the server on every mutation, absent on objects not yet created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_version: Option<ResourceVersion>,
    /// Labels used by selectors
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

/// A single object of a watched collection
///
/// The kind-specific payload is carried as an untyped `spec` document; helpers
/// expose the handful of fields the demo cares about.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceObject {
    /// Identity and bookkeeping
    pub metadata: ObjectMeta,
    /// Kind-specific payload
    #[serde(default)]
    pub spec: Value,
}

impl ResourceObject {
    /// A cluster-scoped object with an empty payload
    pub fn new(name: &str) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.to_string(),
                ..ObjectMeta::default()
            },
            spec: Value::Null,
        }
    }

    /// A namespace object
    pub fn namespace(name: &str) -> Self {
        Self::new(name)
    }

    /// A pod running a single container named after the pod
    pub fn pod(namespace: &str, name: &str, image: &str) -> Self {
        Self::new(name).within(namespace).with_spec(json!({
            "containers": [{ "name": name, "image": image }]
        }))
    }

    /// Place the object in a namespace
    #[must_use]
    pub fn within(mut self, namespace: &str) -> Self {
        self.metadata.namespace = Some(namespace.to_string());
        self
    }

    /// Add a label
    #[must_use]
    pub fn label(mut self, key: &str, value: &str) -> Self {
        self.metadata.labels.insert(key.to_string(), value.to_string());
        self
    }

    /// Replace the payload
    #[must_use]
    pub fn with_spec(mut self, spec: Value) -> Self {
        self.spec = spec;
        self
    }

    /// The object's name
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// The object's namespace, if namespaced
    pub fn namespace_name(&self) -> Option<&str> {
        self.metadata.namespace.as_deref()
    }

    /// The version last assigned by the server
    pub fn resource_version(&self) -> Option<&ResourceVersion> {
        self.metadata.resource_version.as_ref()
    }

    /// Image of the first container, for pod payloads
    pub fn image(&self) -> Option<&str> {
        self.spec.pointer("/containers/0/image").and_then(Value::as_str)
    }
}

/// A consistent snapshot of a collection
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectList {
    /// The objects, in server order
    pub items: Vec<ResourceObject>,
    /// The version the snapshot was taken at
    pub resource_version: Option<ResourceVersion>,
}

impl ObjectList {
    /// Names of all items, in order
    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(ResourceObject::name).collect()
    }
}

impl IntoIterator for ObjectList {
    type IntoIter = std::vec::IntoIter<Self::Item>;
    type Item = ResourceObject;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}
