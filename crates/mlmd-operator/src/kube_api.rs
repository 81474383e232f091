//! Resource access through the Kubernetes API

use crate::error::OperatorResult;
use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams};
use kube::Client;
use mlmd_reconciler::{ApiError, ResourceApi};
use mlmd_types::{Resource, ResourceSelector};

/// [`ResourceApi`] over kube-rs, applying with server-side apply.
#[derive(Clone)]
pub struct KubeResourceApi {
    client: Client,
    field_manager: String,
}

impl KubeResourceApi {
    pub fn new(client: Client, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            field_manager: field_manager.into(),
        }
    }

    /// Client from the in-cluster environment or the local kubeconfig.
    pub async fn try_default(field_manager: impl Into<String>) -> OperatorResult<Self> {
        let client = Client::try_default().await?;
        Ok(Self::new(client, field_manager))
    }

    fn api(
        &self,
        (group, version): (&str, &str),
        kind: &str,
        namespace: &str,
    ) -> (Api<DynamicObject>, ApiResource) {
        let gvk = GroupVersionKind::gvk(group, version, kind);
        let resource = ApiResource::from_gvk(&gvk);
        (
            Api::namespaced_with(self.client.clone(), namespace, &resource),
            resource,
        )
    }
}

fn api_error(err: kube::Error) -> ApiError {
    match err {
        kube::Error::Api(response) => ApiError::from_code(response.code, response.message),
        other => ApiError::unreachable(other.to_string()),
    }
}

/// List responses omit `apiVersion`/`kind` on their items.
fn with_type_meta(mut value: serde_json::Value, resource: &ApiResource) -> serde_json::Value {
    if let Some(object) = value.as_object_mut() {
        object
            .entry("apiVersion")
            .or_insert_with(|| serde_json::Value::String(resource.api_version.clone()));
        object
            .entry("kind")
            .or_insert_with(|| serde_json::Value::String(resource.kind.clone()));
    }
    value
}

#[async_trait]
impl ResourceApi for KubeResourceApi {
    async fn apply(&self, resource: &Resource) -> Result<(), ApiError> {
        let key = &resource.key;
        let (api, _) = self.api(key.group_version(), &key.kind, &key.namespace);
        let params = PatchParams::apply(&self.field_manager).force();

        api.patch(&key.name, &params, &Patch::Apply(&resource.manifest))
            .await
            .map_err(api_error)?;
        tracing::debug!(resource = %key, "Applied resource");
        Ok(())
    }

    async fn list(&self, selector: &ResourceSelector) -> Result<Vec<serde_json::Value>, ApiError> {
        let group_version = selector
            .api_version
            .split_once('/')
            .unwrap_or(("", selector.api_version.as_str()));
        let (api, resource) = self.api(group_version, &selector.kind, &selector.namespace);
        let params = ListParams::default().labels(&selector.label_selector());

        let objects = api.list(&params).await.map_err(api_error)?;
        objects
            .items
            .into_iter()
            .map(|object| {
                serde_json::to_value(object)
                    .map(|value| with_type_meta(value, &resource))
                    .map_err(|e| ApiError::unreachable(format!("cannot encode object: {}", e)))
            })
            .collect()
    }
}
