//! Kubernetes resource identity and desired-state manifests
//!
//! The operator never owns orchestration objects; it only knows their
//! identity and the manifest it wants applied. Observed objects are compared
//! against the manifest with [`is_subset`]: the server adds defaults and
//! status fields, so the desired manifest only has to be contained in what
//! is observed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label attached to every object the operator manages.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";

/// Identity of a namespaced object.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(
        api_version: impl Into<String>,
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            api_version: api_version.into(),
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Split `apiVersion` into `(group, version)`; the core group is `""`.
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        }
    }
}

impl std::fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Selects objects of one kind in one namespace by labels.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceSelector {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
}

impl ResourceSelector {
    /// Label selector in the `k=v,k2=v2` form accepted by the API server.
    pub fn label_selector(&self) -> String {
        self.labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Whether an observed manifest falls under this selector.
    pub fn selects(&self, manifest: &serde_json::Value) -> bool {
        let str_at = |ptr: &str| manifest.pointer(ptr).and_then(|v| v.as_str());

        if str_at("/apiVersion") != Some(self.api_version.as_str())
            || str_at("/kind") != Some(self.kind.as_str())
            || str_at("/metadata/namespace") != Some(self.namespace.as_str())
        {
            return false;
        }

        self.labels.iter().all(|(k, v)| {
            manifest
                .pointer("/metadata/labels")
                .and_then(|labels| labels.get(k))
                .and_then(|l| l.as_str())
                == Some(v.as_str())
        })
    }
}

/// A desired object: its identity plus the full manifest to apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub key: ResourceKey,
    pub manifest: serde_json::Value,
}

impl Resource {
    pub fn new(key: ResourceKey, manifest: serde_json::Value) -> Self {
        Self { key, manifest }
    }

    /// Selector that lists this object and its siblings of the same kind,
    /// using the manifest's `managed-by` label.
    pub fn selector(&self) -> ResourceSelector {
        let mut labels = BTreeMap::new();
        if let Some(managed_by) = self
            .manifest
            .pointer("/metadata/labels")
            .and_then(|l| l.get(MANAGED_BY_LABEL))
            .and_then(|v| v.as_str())
        {
            labels.insert(MANAGED_BY_LABEL.to_string(), managed_by.to_string());
        }

        ResourceSelector {
            api_version: self.key.api_version.clone(),
            kind: self.key.kind.clone(),
            namespace: self.key.namespace.clone(),
            labels,
        }
    }

    /// Whether an observed object already carries everything desired.
    pub fn is_satisfied_by(&self, observed: &serde_json::Value) -> bool {
        is_subset(&self.manifest, observed)
    }
}

/// Merge key of a list-map entry such as a container or service port.
///
/// Entries are identified by `name` when they have one, else by `port`.
pub fn list_map_key(entry: &serde_json::Value) -> Option<(&'static str, &serde_json::Value)> {
    ["name", "port"]
        .into_iter()
        .find_map(|field| entry.get(field).map(|v| (field, v)))
}

/// Whether `desired` is contained in `observed`.
///
/// Objects: every desired key must be present with a contained value.
/// Arrays: every desired element must be contained in an observed element;
/// keyed entries (see [`list_map_key`]) only match the entry with the same
/// key. Entries owned by other field managers may remain in the list.
/// Scalars: equality.
pub fn is_subset(desired: &serde_json::Value, observed: &serde_json::Value) -> bool {
    use serde_json::Value;

    match (desired, observed) {
        (Value::Object(d), Value::Object(o)) => d.iter().all(|(k, dv)| match o.get(k) {
            Some(ov) => is_subset(dv, ov),
            None => dv.is_null(),
        }),
        (Value::Array(d), Value::Array(o)) => d.iter().all(|dv| {
            let key = list_map_key(dv);
            o.iter()
                .filter(|ov| key.is_none() || list_map_key(ov) == key)
                .any(|ov| is_subset(dv, ov))
        }),
        (d, o) => d == o,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service_manifest(port: u16) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": {
                "name": "mlmd",
                "namespace": "kubeflow",
                "labels": {MANAGED_BY_LABEL: "mlmd"}
            },
            "spec": {
                "ports": [{"name": "grpc-api", "port": port, "protocol": "TCP"}]
            }
        })
    }

    #[test]
    fn test_subset_ignores_server_fields() {
        let desired = service_manifest(8080);
        let mut observed = service_manifest(8080);
        observed["metadata"]["uid"] = json!("abc");
        observed["spec"]["clusterIP"] = json!("10.0.0.1");
        observed["spec"]["ports"][0]["targetPort"] = json!(8080);

        assert!(is_subset(&desired, &observed));
        assert!(!is_subset(&service_manifest(9090), &observed));
    }

    #[test]
    fn test_subset_arrays() {
        assert!(is_subset(&json!([1]), &json!([2, 1])));
        assert!(!is_subset(&json!([1, 3]), &json!([1, 2])));
        assert!(is_subset(&json!({"a": null}), &json!({})));
    }

    #[test]
    fn test_subset_tolerates_foreign_list_entries() {
        let desired = service_manifest(8080);
        let mut observed = service_manifest(8080);
        observed["spec"]["ports"] = json!([
            {"name": "placeholder", "port": 65535, "protocol": "TCP"},
            {"name": "grpc-api", "port": 8080, "protocol": "TCP", "targetPort": 8080}
        ]);
        assert!(is_subset(&desired, &observed));

        // same name, different port: still drifted
        observed["spec"]["ports"][1]["port"] = json!(9090);
        assert!(!is_subset(&desired, &observed));

        // a foreign entry carrying our port does not stand in for ours
        observed["spec"]["ports"] = json!([{"name": "other", "port": 8080, "protocol": "TCP"}]);
        assert!(!is_subset(&desired, &observed));
    }

    #[test]
    fn test_list_map_key() {
        assert_eq!(
            list_map_key(&json!({"name": "grpc-api", "port": 8080})),
            Some(("name", &json!("grpc-api")))
        );
        assert_eq!(list_map_key(&json!({"port": 8080})), Some(("port", &json!(8080))));
        assert_eq!(list_map_key(&json!("x")), None);
    }

    #[test]
    fn test_selector() {
        let key = ResourceKey::new("v1", "Service", "kubeflow", "mlmd");
        let resource = Resource::new(key.clone(), service_manifest(8080));
        let selector = resource.selector();

        assert_eq!(selector.label_selector(), format!("{}=mlmd", MANAGED_BY_LABEL));
        assert!(selector.selects(&service_manifest(9090)));

        let mut other_ns = service_manifest(8080);
        other_ns["metadata"]["namespace"] = json!("default");
        assert!(!selector.selects(&other_ns));

        assert_eq!(key.to_string(), "Service/kubeflow/mlmd");
        assert_eq!(key.group_version(), ("", "v1"));
        assert_eq!(
            ResourceKey::new("apps/v1", "Deployment", "ns", "x").group_version(),
            ("apps", "v1")
        );
    }
}
