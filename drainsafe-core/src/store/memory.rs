//! In-memory node store for testing

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::NodeStore;
use crate::error::{MaintenanceError, Result};
use crate::state_machine::NodeMaintenance;

/// Node store backed by a map, with version checks like the API server
pub struct MemoryNodeStore {
    nodes: RwLock<HashMap<String, NodeMaintenance>>,
    version: AtomicU64,
    update_calls: AtomicU32,
    /// Configurable failure of `update`
    pub fail_updates: AtomicBool,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            version: AtomicU64::new(0),
            update_calls: AtomicU32::new(0),
            fail_updates: AtomicBool::new(false),
        }
    }

    fn next_version(&self) -> Option<String> {
        Some((self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string())
    }

    /// Create or replace a node, returning it at its new version
    pub async fn insert(&self, mut node: NodeMaintenance) -> NodeMaintenance {
        node.resource_version = self.next_version();
        self.nodes
            .write()
            .await
            .insert(node.name.clone(), node.clone());
        node
    }

    /// Delete a node
    pub async fn remove(&self, name: &str) {
        self.nodes.write().await.remove(name);
    }

    /// Flip `spec.unschedulable` the way the control plane would
    pub async fn set_unschedulable(&self, name: &str, unschedulable: bool) -> Result<()> {
        let version = self.next_version();
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(name)
            .ok_or_else(|| MaintenanceError::NotFound(name.to_string()))?;
        node.unschedulable = unschedulable;
        node.resource_version = version;
        Ok(())
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::SeqCst);
    }

    /// Number of `update` calls that reached the store
    pub fn update_calls(&self) -> u32 {
        self.update_calls.load(Ordering::SeqCst)
    }
}

impl Default for MemoryNodeStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeStore for MemoryNodeStore {
    async fn get(&self, name: &str) -> Result<Option<NodeMaintenance>> {
        Ok(self.nodes.read().await.get(name).cloned())
    }

    async fn update(&self, node: &NodeMaintenance) -> Result<NodeMaintenance> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_updates.load(Ordering::SeqCst) {
            return Err(MaintenanceError::Transport(
                "simulated API server outage".to_string(),
            ));
        }

        let version = self.next_version();
        let mut nodes = self.nodes.write().await;
        let stored = nodes
            .get_mut(&node.name)
            .ok_or_else(|| MaintenanceError::NotFound(node.name.clone()))?;

        if node.resource_version.is_some() && stored.resource_version != node.resource_version {
            return Err(MaintenanceError::Conflict {
                node: node.name.clone(),
                message: format!(
                    "object has been modified: have {:?}, stored {:?}",
                    node.resource_version, stored.resource_version
                ),
            });
        }

        stored.state = node.state;
        stored.maintenance_type = node.maintenance_type.clone();
        stored.owner = node.owner.clone();
        stored.event_id = node.event_id.clone();
        stored.resource_version = version;
        Ok(stored.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::MaintenanceState;

    #[tokio::test]
    async fn test_update_bumps_version() {
        let store = MemoryNodeStore::new();
        let node = store.insert(NodeMaintenance::new("n1")).await;

        let updated = store
            .update(&node.clone().with_state(MaintenanceState::Running))
            .await
            .unwrap();
        assert_ne!(updated.resource_version, node.resource_version);
        assert_eq!(store.update_calls(), 1);
    }

    #[tokio::test]
    async fn test_update_keeps_control_plane_fields() {
        let store = MemoryNodeStore::new();
        let node = store.insert(NodeMaintenance::new("n1")).await;
        store.set_unschedulable("n1", true).await.unwrap();
        let fresh = store.get("n1").await.unwrap().unwrap();

        let mut write = fresh.clone().with_state(MaintenanceState::Cordoned);
        write.unschedulable = false;
        let updated = store.update(&write).await.unwrap();
        assert!(updated.unschedulable);
        assert_ne!(fresh.resource_version, node.resource_version);
    }

    #[tokio::test]
    async fn test_update_missing_node() {
        let store = MemoryNodeStore::new();
        let err = store.update(&NodeMaintenance::new("gone")).await.unwrap_err();
        assert!(matches!(err, MaintenanceError::NotFound(_)));
    }
}
