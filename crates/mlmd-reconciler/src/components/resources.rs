//! Kubernetes objects owned by the operator

use crate::collaborators::ResourceApi;
use crate::component::Component;
use crate::error::ComponentError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1 as corev1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1 as metav1;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use mlmd_types::{GrpcPort, Resource, ResourceKey, ResourceSelector, Status, MANAGED_BY_LABEL};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Label the platform puts on the application's pods.
const APP_NAME_LABEL: &str = "app.kubernetes.io/name";

/// Inputs every template renders from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderContext {
    pub app_name: String,
    pub namespace: String,
    pub port: GrpcPort,
}

/// Renders one desired object.
pub trait ResourceTemplate: Send + Sync {
    fn render(&self, ctx: &RenderContext) -> Result<Resource, serde_json::Error>;
}

/// `Service` exposing the gRPC port of the application's pods.
#[derive(Debug, Clone)]
pub struct GrpcServiceTemplate {
    pub port_name: String,
}

impl Default for GrpcServiceTemplate {
    fn default() -> Self {
        Self {
            port_name: "grpc-api".to_string(),
        }
    }
}

impl GrpcServiceTemplate {
    pub fn build(&self, ctx: &RenderContext) -> corev1::Service {
        let port = i32::from(ctx.port.get());
        corev1::Service {
            metadata: metav1::ObjectMeta {
                name: Some(ctx.app_name.clone()),
                namespace: Some(ctx.namespace.clone()),
                labels: Some(BTreeMap::from([
                    (MANAGED_BY_LABEL.to_string(), ctx.app_name.clone()),
                    (APP_NAME_LABEL.to_string(), ctx.app_name.clone()),
                ])),
                ..metav1::ObjectMeta::default()
            },
            spec: Some(corev1::ServiceSpec {
                type_: Some("ClusterIP".to_string()),
                selector: Some(BTreeMap::from([(
                    APP_NAME_LABEL.to_string(),
                    ctx.app_name.clone(),
                )])),
                ports: Some(vec![corev1::ServicePort {
                    name: Some(self.port_name.clone()),
                    port,
                    target_port: Some(IntOrString::Int(port)),
                    protocol: Some("TCP".to_string()),
                    ..corev1::ServicePort::default()
                }]),
                ..corev1::ServiceSpec::default()
            }),
            ..corev1::Service::default()
        }
    }
}

impl ResourceTemplate for GrpcServiceTemplate {
    fn render(&self, ctx: &RenderContext) -> Result<Resource, serde_json::Error> {
        let manifest = serde_json::to_value(self.build(ctx))?;
        let key = ResourceKey::new("v1", "Service", &ctx.namespace, &ctx.app_name);
        Ok(Resource::new(key, manifest))
    }
}

/// Keeps a set of rendered objects present in the cluster.
pub struct KubernetesResources {
    name: String,
    api: Arc<dyn ResourceApi>,
    context: RenderContext,
    templates: Vec<Box<dyn ResourceTemplate>>,
}

impl KubernetesResources {
    pub fn new(name: impl Into<String>, api: Arc<dyn ResourceApi>, context: RenderContext) -> Self {
        Self {
            name: name.into(),
            api,
            context,
            templates: Vec::new(),
        }
    }

    pub fn with_template(mut self, template: impl ResourceTemplate + 'static) -> Self {
        self.templates.push(Box::new(template));
        self
    }

    pub fn desired(&self) -> Result<Vec<Resource>, ComponentError> {
        self.templates
            .iter()
            .map(|t| {
                t.render(&self.context).map_err(|e| {
                    ComponentError::blocked(format!("Failed to render resource: {}", e))
                })
            })
            .collect()
    }

    /// Desired objects that are missing or differ from what is observed.
    async fn drift(&self) -> Result<Vec<Resource>, ComponentError> {
        let desired = self.desired()?;

        let mut by_selector: BTreeMap<ResourceSelector, Vec<Resource>> = BTreeMap::new();
        for resource in desired {
            by_selector.entry(resource.selector()).or_default().push(resource);
        }

        let mut drifted = Vec::new();
        for (selector, resources) in by_selector {
            let observed = self.api.list(&selector).await?;
            for resource in resources {
                let current = observed.iter().find(|o| {
                    o.pointer("/metadata/name").and_then(|n| n.as_str())
                        == Some(resource.key.name.as_str())
                });
                match current {
                    Some(o) if resource.is_satisfied_by(o) => {}
                    _ => drifted.push(resource),
                }
            }
        }
        Ok(drifted)
    }
}

#[async_trait]
impl Component for KubernetesResources {
    fn name(&self) -> &str {
        &self.name
    }

    async fn status(&self) -> Status {
        match self.drift().await {
            Ok(drifted) if drifted.is_empty() => Status::active(),
            Ok(drifted) => {
                let names: Vec<String> = drifted.iter().map(|r| r.key.to_string()).collect();
                Status::waiting(format!("Waiting for resources: {}", names.join(", ")))
            }
            Err(e) => e.into_status(),
        }
    }

    async fn execute(&self) -> Result<(), ComponentError> {
        for resource in self.drift().await? {
            tracing::info!(resource = %resource.key, "Applying resource");
            self.api.apply(&resource).await?;
        }
        Ok(())
    }
}
