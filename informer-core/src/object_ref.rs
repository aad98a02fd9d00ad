//! Object identities
use crate::object::ResourceObject;
use std::fmt::Display;

/// A namespaced (if relevant) reference to an object, its identity in a collection
///
/// ```
/// use informer_core::ObjectRef;
/// assert_ne!(ObjectRef::new("a"), ObjectRef::new("a").within("ns"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[non_exhaustive]
pub struct ObjectRef {
    /// The namespace of the object
    ///
    /// May only be `None` if the kind is cluster-scoped (not located in a namespace).
    pub namespace: Option<String>,
    /// The name of the object
    pub name: String,
}

impl ObjectRef {
    /// A reference to a cluster-scoped object
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            namespace: None,
            name: name.into(),
        }
    }

    /// Place the reference in a namespace
    #[must_use]
    pub fn within(mut self, namespace: &str) -> Self {
        self.namespace = Some(namespace.to_string());
        self
    }

    /// Creates `ObjectRef` from the object's metadata
    #[must_use]
    pub fn from_obj(obj: &ResourceObject) -> Self {
        Self {
            namespace: obj.metadata.namespace.clone(),
            name: obj.metadata.name.clone(),
        }
    }
}

impl Display for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(namespace) = &self.namespace {
            write!(f, "{namespace}/")?;
        }
        write!(f, "{}", self.name)
    }
}
