//! Kubernetes Client wrapper
//!
//! Provides a simplified interface to the Kubernetes API.

use std::time::Duration;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, EvictParams, ListParams, Patch, PatchParams};
use kube::Client;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

/// Field manager recorded on every patch
pub const FIELD_MANAGER: &str = "drainsafe";

/// Kubernetes client wrapper
#[derive(Clone)]
pub struct K8sClient {
    client: Client,
}

impl K8sClient {
    /// Create a new K8s client using in-cluster config
    pub async fn new() -> Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;

        info!("Connected to Kubernetes API server");
        Ok(Self { client })
    }

    /// Get the underlying kube client
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Get node API
    pub fn nodes(&self) -> Api<Node> {
        Api::all(self.client.clone())
    }

    /// Get pods API for a namespace
    pub fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    /// Get all pods API
    pub fn pods_all(&self) -> Api<Pod> {
        Api::all(self.client.clone())
    }

    /// Check if the API server is reachable
    pub async fn health_check(&self) -> Result<()> {
        let _ = self
            .nodes()
            .list(&ListParams::default().limit(1))
            .await
            .context("Failed to list nodes")?;
        Ok(())
    }

    /// Get a node by name, `None` if it does not exist
    pub async fn get_node(&self, name: &str) -> kube::Result<Option<Node>> {
        self.nodes().get_opt(name).await
    }

    /// Merge annotations into a node, conditional on `resource_version`
    ///
    /// A `Value::Null` entry removes the annotation. The API server rejects the
    /// patch with 409 when the node moved past `resource_version`.
    pub async fn patch_annotations(
        &self,
        node_name: &str,
        resource_version: Option<&str>,
        annotations: Map<String, Value>,
    ) -> kube::Result<Node> {
        let mut metadata = json!({ "annotations": annotations });
        if let Some(version) = resource_version {
            metadata["resourceVersion"] = json!(version);
        }
        let patch = json!({ "metadata": metadata });

        debug!(node = node_name, patch = %patch, "Patching node annotations");
        self.nodes()
            .patch(
                node_name,
                &PatchParams::default(),
                &Patch::Merge(&patch),
            )
            .await
    }

    /// Set `spec.unschedulable`
    pub async fn set_unschedulable(&self, node_name: &str, unschedulable: bool) -> kube::Result<()> {
        let patch = json!({
            "spec": {
                "unschedulable": unschedulable
            }
        });

        let params = PatchParams::apply(FIELD_MANAGER);
        self.nodes()
            .patch(node_name, &params, &Patch::Merge(&patch))
            .await?;

        if unschedulable {
            info!(node = node_name, "Node cordoned");
        } else {
            info!(node = node_name, "Node uncordoned");
        }
        Ok(())
    }

    /// List pods on a specific node
    pub async fn list_pods_on_node(&self, node_name: &str) -> kube::Result<Vec<Pod>> {
        let params = ListParams::default().fields(&format!("spec.nodeName={}", node_name));
        let pods = self.pods_all().list(&params).await?;
        Ok(pods.items)
    }

    /// Get a pod, `None` once it is gone
    pub async fn get_pod(&self, namespace: &str, name: &str) -> kube::Result<Option<Pod>> {
        self.pods(namespace).get_opt(name).await
    }

    /// Evict a pod, giving it `grace_period` to terminate
    pub async fn evict_pod(
        &self,
        namespace: &str,
        name: &str,
        grace_period: Duration,
    ) -> kube::Result<()> {
        let params = EvictParams {
            delete_options: Some(DeleteParams {
                grace_period_seconds: Some(grace_period.as_secs() as u32),
                ..DeleteParams::default()
            }),
            ..EvictParams::default()
        };
        self.pods(namespace).evict(name, &params).await?;
        Ok(())
    }
}
