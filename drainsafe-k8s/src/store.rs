//! Node maintenance records backed by node annotations

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use serde_json::{Map, Value};
use tracing::warn;

use drainsafe_core::annotations;
use drainsafe_core::error::{MaintenanceError, Result};
use drainsafe_core::state_machine::{MaintenanceState, MaintenanceType, NodeMaintenance};
use drainsafe_core::NodeStore;

use crate::client::K8sClient;

/// Maps an API error for `node` onto the shared taxonomy
pub fn map_kube_error(node: &str, err: kube::Error) -> MaintenanceError {
    match err {
        kube::Error::Api(resp) if resp.code == 409 => MaintenanceError::Conflict {
            node: node.to_string(),
            message: resp.message,
        },
        kube::Error::Api(resp) if resp.code == 404 => MaintenanceError::NotFound(node.to_string()),
        other => MaintenanceError::transport(other),
    }
}

/// Read the maintenance record carried by a node object
pub fn from_node(node: &Node) -> NodeMaintenance {
    let name = node.metadata.name.clone().unwrap_or_default();
    let values = node.metadata.annotations.as_ref();
    let get = |key: &str| {
        values
            .and_then(|a| a.get(key))
            .filter(|v| !v.is_empty())
            .cloned()
    };

    let state = get(annotations::MAINTENANCE_STATE).and_then(|raw| {
        let parsed = MaintenanceState::parse(&raw);
        if parsed.is_none() {
            warn!(node = %name, value = %raw, "Ignoring unknown maintenance state");
        }
        parsed
    });

    NodeMaintenance {
        state,
        maintenance_type: get(annotations::MAINTENANCE_TYPE)
            .map(|t| MaintenanceType::parse(&t))
            .unwrap_or_default(),
        owner: get(annotations::MAINTENANCE_OWNER),
        event_id: get(annotations::MAINTENANCE_EVENT),
        unschedulable: node
            .spec
            .as_ref()
            .and_then(|s| s.unschedulable)
            .unwrap_or(false),
        resource_version: node.metadata.resource_version.clone(),
        name,
    }
}

/// Annotation patch writing every maintenance field of `node`
///
/// Empty fields become `null` so the merge patch removes them.
pub fn annotation_patch(node: &NodeMaintenance) -> Map<String, Value> {
    let text = |value: Option<&str>| match value {
        Some(v) if !v.is_empty() => Value::String(v.to_string()),
        _ => Value::Null,
    };

    let mut patch = Map::new();
    patch.insert(
        annotations::MAINTENANCE_STATE.to_string(),
        text(node.state.map(|s| s.as_str())),
    );
    patch.insert(
        annotations::MAINTENANCE_TYPE.to_string(),
        text(Some(node.maintenance_type.as_str())),
    );
    patch.insert(
        annotations::MAINTENANCE_OWNER.to_string(),
        text(node.owner.as_deref()),
    );
    patch.insert(
        annotations::MAINTENANCE_EVENT.to_string(),
        text(node.event_id.as_deref()),
    );
    patch
}

/// [`NodeStore`] reading and patching node annotations
pub struct KubeNodeStore {
    client: K8sClient,
}

impl KubeNodeStore {
    pub fn new(client: K8sClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl NodeStore for KubeNodeStore {
    async fn get(&self, name: &str) -> Result<Option<NodeMaintenance>> {
        let node = self
            .client
            .get_node(name)
            .await
            .map_err(|e| map_kube_error(name, e))?;
        Ok(node.as_ref().map(from_node))
    }

    async fn update(&self, node: &NodeMaintenance) -> Result<NodeMaintenance> {
        let updated = self
            .client
            .patch_annotations(
                &node.name,
                node.resource_version.as_deref(),
                annotation_patch(node),
            )
            .await
            .map_err(|e| map_kube_error(&node.name, e))?;
        Ok(from_node(&updated))
    }
}
