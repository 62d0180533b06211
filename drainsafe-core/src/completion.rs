//! Completion signal
//!
//! Once a node reaches DRAINED, the outstanding platform event is approved so
//! the platform may proceed, and the node moves to STARTED. This is the only
//! place an approval is ever posted, so an event can never be approved before
//! the drain finished.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{Result, APPROVAL_RETRY};
use crate::metadata::{actionable, MetadataService, ScheduledEvent};
use crate::reconciler::ReconcileAction;
use crate::recorder::EventSeverity;
use crate::state_machine::{MaintenanceState, NodeMaintenance};
use crate::store::StateWriter;

/// Event reason recorded when the platform refuses or cannot be reached
pub const APPROVE_FAILED_REASON: &str = "ScheduledEventApproveFailed";

/// Approves drained nodes' platform events
pub struct CompletionSignal {
    metadata: Arc<dyn MetadataService>,
    writer: Arc<StateWriter>,
    instance_id: String,
}

impl CompletionSignal {
    pub fn new(
        metadata: Arc<dyn MetadataService>,
        writer: Arc<StateWriter>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            metadata,
            writer,
            instance_id: instance_id.into(),
        }
    }

    /// Approve the outstanding event of a drained node, fetching events first
    pub async fn complete(&self, node: &NodeMaintenance) -> Result<ReconcileAction> {
        if node.state != Some(MaintenanceState::Drained) {
            return Ok(ReconcileAction::Done);
        }

        match self.metadata.list_scheduled_events().await {
            Ok(events) => self.complete_with(node, &events).await,
            Err(e) => {
                warn!(node = %node.name, error = %e, "Failed to list scheduled events");
                self.report_failure(node, format!("listing scheduled events: {}", e))
                    .await;
                Ok(ReconcileAction::RequeueAfter(APPROVAL_RETRY))
            }
        }
    }

    /// Approve the outstanding event of a drained node from an already fetched list
    pub async fn complete_with(
        &self,
        node: &NodeMaintenance,
        events: &[ScheduledEvent],
    ) -> Result<ReconcileAction> {
        if node.state != Some(MaintenanceState::Drained) {
            return Ok(ReconcileAction::Done);
        }

        if let Some(event) = self.outstanding(node, events) {
            if let Err(e) = self.metadata.approve(&event.event_id).await {
                warn!(
                    node = %node.name,
                    event_id = %event.event_id,
                    error = %e,
                    "Failed to approve scheduled event"
                );
                self.report_failure(node, format!("approving {}: {}", event.event_id, e))
                    .await;
                return Ok(ReconcileAction::RequeueAfter(APPROVAL_RETRY));
            }
            self.writer.metrics().inc_approval(true);
            info!(
                node = %node.name,
                event_id = %event.event_id,
                event_type = %event.event_type,
                "Scheduled event approved"
            );
        } else {
            info!(
                node = %node.name,
                "No outstanding scheduled event, platform is not waiting for approval"
            );
        }

        self.writer
            .write(node, MaintenanceState::Started, |_| {})
            .await?;
        Ok(ReconcileAction::Done)
    }

    /// The event recorded on the node if still pending, else the first actionable one
    fn outstanding<'a>(
        &self,
        node: &NodeMaintenance,
        events: &'a [ScheduledEvent],
    ) -> Option<&'a ScheduledEvent> {
        let mut candidates = actionable(events, &self.instance_id).peekable();
        let first = candidates.peek().copied();
        match &node.event_id {
            Some(id) => candidates.find(|e| &e.event_id == id).or(first),
            None => first,
        }
    }

    async fn report_failure(&self, node: &NodeMaintenance, message: String) {
        self.writer.metrics().inc_approval(false);
        self.writer
            .recorder()
            .record(&node.name, EventSeverity::Warning, APPROVE_FAILED_REASON, message)
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MockMetadata;
    use crate::metrics::MetricsRegistry;
    use crate::recorder::MemoryRecorder;
    use crate::store::{MemoryNodeStore, NodeStore};

    struct Fixture {
        store: Arc<MemoryNodeStore>,
        metadata: Arc<MockMetadata>,
        recorder: Arc<MemoryRecorder>,
        signal: CompletionSignal,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryNodeStore::new());
        let metadata = Arc::new(MockMetadata::new("vm_0"));
        let recorder = Arc::new(MemoryRecorder::new());
        let writer = Arc::new(StateWriter::new(
            store.clone(),
            recorder.clone(),
            Arc::new(MetricsRegistry::new()),
            "agent-0",
        ));
        let signal = CompletionSignal::new(metadata.clone(), writer, "vm_0");
        Fixture {
            store,
            metadata,
            recorder,
            signal,
        }
    }

    #[tokio::test]
    async fn test_only_drained_nodes_are_approved() {
        let f = fixture();
        f.metadata.schedule("evt-1", "Reboot").await;
        let node = f
            .store
            .insert(NodeMaintenance::new("node-0").with_state(MaintenanceState::Draining))
            .await;

        let action = f.signal.complete(&node).await.unwrap();
        assert_eq!(action, ReconcileAction::Done);
        assert!(f.metadata.approved().await.is_empty());
        assert_eq!(f.metadata.list_calls(), 0);
    }

    #[tokio::test]
    async fn test_drained_node_approves_and_starts() {
        let f = fixture();
        f.metadata.schedule("evt-1", "Reboot").await;
        let node = f
            .store
            .insert(NodeMaintenance::new("node-0").with_state(MaintenanceState::Drained))
            .await;

        let action = f.signal.complete(&node).await.unwrap();
        assert_eq!(action, ReconcileAction::Done);
        assert_eq!(f.metadata.approved().await, vec!["evt-1"]);

        let stored = f.store.get("node-0").await.unwrap().unwrap();
        assert_eq!(stored.state, Some(MaintenanceState::Started));
    }

    #[tokio::test]
    async fn test_recorded_event_is_preferred() {
        let f = fixture();
        f.metadata.schedule("evt-1", "Freeze").await;
        f.metadata.schedule("evt-2", "Reboot").await;
        let mut node = NodeMaintenance::new("node-0").with_state(MaintenanceState::Drained);
        node.event_id = Some("evt-2".to_string());
        let node = f.store.insert(node).await;

        f.signal.complete(&node).await.unwrap();
        assert_eq!(f.metadata.approved().await, vec!["evt-2"]);
    }

    #[tokio::test]
    async fn test_approve_failure_keeps_node_drained() {
        let f = fixture();
        f.metadata.schedule("evt-1", "Reboot").await;
        f.metadata.set_fail_approve(true);
        let node = f
            .store
            .insert(NodeMaintenance::new("node-0").with_state(MaintenanceState::Drained))
            .await;

        for _ in 0..3 {
            let action = f.signal.complete(&node).await.unwrap();
            assert_eq!(action, ReconcileAction::RequeueAfter(APPROVAL_RETRY));
        }

        let stored = f.store.get("node-0").await.unwrap().unwrap();
        assert_eq!(stored.state, Some(MaintenanceState::Drained));
        assert_eq!(f.store.update_calls(), 0);
        assert_eq!(
            f.recorder.reasons().await,
            vec![APPROVE_FAILED_REASON; 3]
        );
    }

    #[tokio::test]
    async fn test_listing_failure_keeps_node_drained() {
        let f = fixture();
        f.metadata.set_fail_list(true);
        let node = f
            .store
            .insert(NodeMaintenance::new("node-0").with_state(MaintenanceState::Drained))
            .await;

        let action = f.signal.complete(&node).await.unwrap();
        assert_eq!(action, ReconcileAction::RequeueAfter(APPROVAL_RETRY));
        assert_eq!(f.store.update_calls(), 0);
    }

    #[tokio::test]
    async fn test_vanished_event_still_starts() {
        let f = fixture();
        let node = f
            .store
            .insert(NodeMaintenance::new("node-0").with_state(MaintenanceState::Drained))
            .await;

        f.signal.complete(&node).await.unwrap();
        assert!(f.metadata.approved().await.is_empty());
        let stored = f.store.get("node-0").await.unwrap().unwrap();
        assert_eq!(stored.state, Some(MaintenanceState::Started));
    }
}
