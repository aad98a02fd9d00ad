//! Addressing resource collections
use std::fmt;

/// The kinds of objects this workspace knows how to talk to
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    /// `v1/Namespace`, cluster-scoped
    Namespace,
    /// `v1/Pod`, namespaced
    Pod,
}

impl Kind {
    /// The plural resource name used in API paths
    pub fn plural(self) -> &'static str {
        match self {
            Kind::Namespace => "namespaces",
            Kind::Pod => "pods",
        }
    }

    /// Whether objects of this kind live inside a namespace
    pub fn is_namespaced(self) -> bool {
        matches!(self, Kind::Pod)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kind::Namespace => f.write_str("Namespace"),
            Kind::Pod => f.write_str("Pod"),
        }
    }
}

/// A named collection: one kind, optionally narrowed to one namespace
///
/// A collection without a namespace spans the whole cluster.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Collection {
    /// Kind of the objects in the collection
    pub kind: Kind,
    /// Namespace the collection is restricted to
    pub namespace: Option<String>,
}

impl Collection {
    /// Every object of a kind, across all namespaces
    pub fn all(kind: Kind) -> Self {
        Self { kind, namespace: None }
    }

    /// Objects of a namespaced kind inside one namespace
    pub fn namespaced(kind: Kind, namespace: &str) -> Self {
        Self {
            kind,
            namespace: Some(namespace.to_string()),
        }
    }

    /// Whether an object living in `namespace` belongs to this collection
    pub fn contains_namespace(&self, namespace: Option<&str>) -> bool {
        match &self.namespace {
            None => true,
            Some(ns) => namespace == Some(ns.as_str()),
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", self.kind.plural(), ns),
            None => f.write_str(self.kind.plural()),
        }
    }
}
