//! The pod projection used in log lines
use informer_core::ResourceObject;
use serde::Serialize;
use std::fmt;

/// Name and namespace of a pod, the only parts podwatch logs
///
/// Displays as a JSON object so it reads the same in plain and JSON log output.
///
/// ```
/// use informer_core::ResourceObject;
/// use podwatch::SimplePod;
/// let pod = SimplePod::from(&ResourceObject::pod("aerospike", "hello-world", "hello-world"));
/// assert_eq!(pod.to_string(), r#"{"name":"hello-world","namespace":"aerospike"}"#);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct SimplePod {
    /// Pod name
    pub name: String,
    /// Namespace the pod lives in
    pub namespace: String,
}

impl From<&ResourceObject> for SimplePod {
    fn from(pod: &ResourceObject) -> Self {
        Self {
            name: pod.name().to_string(),
            namespace: pod.namespace_name().unwrap_or_default().to_string(),
        }
    }
}

impl fmt::Display for SimplePod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Display a list of pods as a JSON array
pub(crate) struct PodList<'a>(pub &'a [SimplePod]);

impl fmt::Display for PodList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self.0).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_render_as_json_arrays() {
        let pods = [
            SimplePod::from(&ResourceObject::pod("kube-system", "coredns", "coredns")),
            SimplePod::from(&ResourceObject::pod("aerospike", "hello-world", "hello-world")),
        ];
        assert_eq!(
            PodList(&pods).to_string(),
            r#"[{"name":"coredns","namespace":"kube-system"},{"name":"hello-world","namespace":"aerospike"}]"#
        );
        assert_eq!(PodList(&[]).to_string(), "[]");
    }

    #[test]
    fn cluster_scoped_objects_have_an_empty_namespace() {
        let pod = SimplePod::from(&ResourceObject::new("orphan"));
        assert_eq!(pod.namespace, "");
    }
}
