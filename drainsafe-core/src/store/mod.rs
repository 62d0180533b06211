//! Persisted node maintenance records
//!
//! The node object is the only shared state between the detector and the
//! state machine. Every write is conditional on the version the record was
//! read at, and writing a state that already holds is a no-op.

mod memory;

pub use memory::MemoryNodeStore;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::Result;
use crate::metrics::MetricsRegistry;
use crate::recorder::{EventRecorder, EventSeverity};
use crate::state_machine::{MaintenanceState, NodeMaintenance};

/// Trait for reading and conditionally writing node maintenance records
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Fetch the current record; `None` when the node does not exist
    async fn get(&self, name: &str) -> Result<Option<NodeMaintenance>>;

    /// Persist the maintenance fields of `node`
    ///
    /// Fails with `Conflict` when the stored object is newer than
    /// `node.resource_version`. Returns the record at its new version.
    async fn update(&self, node: &NodeMaintenance) -> Result<NodeMaintenance>;
}

/// Writes pipeline states and reports them as cluster events
pub struct StateWriter {
    store: Arc<dyn NodeStore>,
    recorder: Arc<dyn EventRecorder>,
    metrics: Arc<MetricsRegistry>,
    actor: String,
}

impl StateWriter {
    /// `actor` names this process in event messages and ownership
    pub fn new(
        store: Arc<dyn NodeStore>,
        recorder: Arc<dyn EventRecorder>,
        metrics: Arc<MetricsRegistry>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            store,
            recorder,
            metrics,
            actor: actor.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn NodeStore> {
        &self.store
    }

    pub fn recorder(&self) -> &Arc<dyn EventRecorder> {
        &self.recorder
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    /// Move `node` to `target`, applying `mutate` to the other fields
    ///
    /// Returns `None` without touching the store when `target` already holds.
    pub async fn write<F>(
        &self,
        node: &NodeMaintenance,
        target: MaintenanceState,
        mutate: F,
    ) -> Result<Option<NodeMaintenance>>
    where
        F: FnOnce(&mut NodeMaintenance) + Send,
    {
        if node.state == Some(target) {
            return Ok(None);
        }

        info!(
            node = %node.name,
            current = node.state.map(|s| s.as_str()).unwrap_or(""),
            desired = %target,
            maintenance_type = %node.maintenance_type,
            "Updating node state"
        );

        let mut next = node.clone();
        next.state = Some(target);
        mutate(&mut next);

        let updated = self.store.update(&next).await?;

        self.metrics.inc_transition(node.state, target);
        self.metrics.set_node_state(&node.name, target);
        self.recorder
            .record(
                &node.name,
                EventSeverity::Normal,
                target.as_str(),
                self.describe(&updated),
            )
            .await;

        Ok(Some(updated))
    }

    /// Persist a change to the non-state fields of `node`, if there is one
    pub async fn update_fields<F>(
        &self,
        node: &NodeMaintenance,
        mutate: F,
    ) -> Result<Option<NodeMaintenance>>
    where
        F: FnOnce(&mut NodeMaintenance) + Send,
    {
        let mut next = node.clone();
        mutate(&mut next);
        next.state = node.state;
        if next == *node {
            return Ok(None);
        }
        self.store.update(&next).await.map(Some)
    }

    /// Human-readable attribution used in event messages
    pub fn describe(&self, node: &NodeMaintenance) -> String {
        if node.maintenance_type.as_str().is_empty() {
            format!("{} by {}", node.name, self.actor)
        } else {
            format!("{} on {} by {}", node.maintenance_type, node.name, self.actor)
        }
    }
}
