//! Node state machine driver
//!
//! Invoked on every observed change of a node. Each invocation reads the node
//! fresh, advances it at most one pipeline position, and returns when to look
//! again. Side effect failures never escape as errors: they become a fixed
//! delay requeue and a Warning event on the node.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use crate::error::{MaintenanceError, Result, STEP_RETRY};
use crate::executor::NodeExecutor;
use crate::gate::{ApprovalGate, GateState};
use crate::recorder::EventSeverity;
use crate::state_machine::{
    plan, MaintenanceState, NodeMaintenance, SideEffect, UNCORDONED_REASON,
};
use crate::store::StateWriter;

/// What the caller's work queue should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Wait for the next change notification
    Done,
    /// Evaluate the node again after the delay
    RequeueAfter(Duration),
}

/// Drives nodes through the maintenance pipeline
pub struct NodeStateMachine {
    writer: Arc<StateWriter>,
    executor: Arc<dyn NodeExecutor>,
    gate: Arc<dyn ApprovalGate>,
    gate_kind: String,
}

impl NodeStateMachine {
    pub fn new(
        writer: Arc<StateWriter>,
        executor: Arc<dyn NodeExecutor>,
        gate: Arc<dyn ApprovalGate>,
        gate_kind: impl Into<String>,
    ) -> Self {
        Self {
            writer,
            executor,
            gate,
            gate_kind: gate_kind.into(),
        }
    }

    /// Advance the named node by one step
    ///
    /// Errors are limited to reading or writing the node itself; the caller
    /// maps them with [`MaintenanceError::requeue_after`].
    pub async fn reconcile(&self, name: &str) -> Result<ReconcileAction> {
        let Some(node) = self.writer.store().get(name).await? else {
            debug!(node = name, "Node no longer exists, nothing to reconcile");
            return Ok(ReconcileAction::Done);
        };

        let step = plan(&node);
        if let Some(state) = node.state {
            self.writer.metrics().set_node_state(&node.name, state);
        }
        debug!(
            node = %node.name,
            state = node.state.map(|s| s.as_str()).unwrap_or(""),
            unschedulable = node.unschedulable,
            effect = ?step.effect,
            "Got node event"
        );

        let node = match &step.effect {
            SideEffect::None => node,
            SideEffect::RequestApproval => {
                if let Some(action) = self.request_approval(&node).await {
                    return Ok(action);
                }
                node
            }
            SideEffect::Cordon => {
                if let Err(e) = self.timed("cordon", self.executor.cordon(&node.name)).await {
                    return Ok(self.step_failed(&node, "cordon", "NodeCordonFailed", &e).await);
                }
                match self.refresh(&node).await? {
                    Some(fresh) => fresh,
                    None => return Ok(ReconcileAction::Done),
                }
            }
            SideEffect::Drain { grace_period } => {
                info!(
                    node = %node.name,
                    maintenance_type = %node.maintenance_type,
                    grace_period = ?grace_period,
                    "Draining node"
                );
                let drain = self.executor.drain(&node.name, *grace_period);
                if let Err(e) = self.timed("drain", drain).await {
                    return Ok(self.step_failed(&node, "drain", "NodeDrainFailed", &e).await);
                }
                match self.refresh(&node).await? {
                    Some(fresh) => fresh,
                    None => return Ok(ReconcileAction::Done),
                }
            }
            SideEffect::Uncordon => return self.uncordon(&node).await,
        };

        if let Some(target) = step.to {
            let owner = self.writer.actor().to_string();
            self.writer
                .write(&node, target, move |n| {
                    if target == MaintenanceState::Cordoned {
                        n.owner = Some(owner);
                    }
                })
                .await?;
        }

        Ok(step
            .requeue
            .map(ReconcileAction::RequeueAfter)
            .unwrap_or(ReconcileAction::Done))
    }

    /// Returns a requeue when the node may not proceed yet
    async fn request_approval(&self, node: &NodeMaintenance) -> Option<ReconcileAction> {
        match self.gate.is_approved(&node.name, &self.gate_kind).await {
            Ok(true) => {}
            Ok(false) => {
                info!(
                    node = %node.name,
                    retry_in = %humantime::format_duration(STEP_RETRY),
                    "Maintenance not approved yet"
                );
                return Some(ReconcileAction::RequeueAfter(STEP_RETRY));
            }
            Err(e) => {
                return Some(
                    self.step_failed(node, "approval", "MaintenanceApprovalFailed", &e)
                        .await,
                );
            }
        }

        if let Err(e) = self
            .gate
            .mark(&node.name, &self.gate_kind, GateState::InProgress)
            .await
        {
            return Some(
                self.step_failed(node, "approval", "MaintenanceApprovalFailed", &e)
                    .await,
            );
        }
        None
    }

    async fn uncordon(&self, node: &NodeMaintenance) -> Result<ReconcileAction> {
        match node.owner.as_deref() {
            Some(owner) if owner != self.writer.actor() => info!(
                node = %node.name,
                owner = owner,
                "Uncordoning node cordoned by another controller instance"
            ),
            None => debug!(node = %node.name, "Uncordoning node without a recorded owner"),
            _ => {}
        }

        // Only cycles that cordoned the node went through the gate
        let gated = node.owner.is_some();
        if !gated {
            debug!(node = %node.name, "No maintenance cycle recorded, skipping gate completion");
        } else if let Err(e) = self
            .gate
            .mark(&node.name, &self.gate_kind, GateState::Completed)
            .await
        {
            // Recovery must not wait on the gate
            error!(node = %node.name, error = %e, "Failed to mark maintenance completed");
            self.writer
                .recorder()
                .record(
                    &node.name,
                    EventSeverity::Warning,
                    "MaintenanceCompleteFailed",
                    e.to_string(),
                )
                .await;
        }

        if let Err(e) = self.timed("uncordon", self.executor.uncordon(&node.name)).await {
            return Ok(self.step_failed(node, "uncordon", "NodeUncordonFailed", &e).await);
        }

        self.writer
            .recorder()
            .record(
                &node.name,
                EventSeverity::Normal,
                UNCORDONED_REASON,
                self.writer.describe(node),
            )
            .await;

        if let Some(fresh) = self.refresh(node).await? {
            self.writer
                .update_fields(&fresh, |n| {
                    n.owner = None;
                    n.event_id = None;
                    n.maintenance_type = Default::default();
                })
                .await?;
        }
        Ok(ReconcileAction::Done)
    }

    /// Re-read after a side effect; `None` if the node vanished or moved on
    async fn refresh(&self, node: &NodeMaintenance) -> Result<Option<NodeMaintenance>> {
        let Some(fresh) = self.writer.store().get(&node.name).await? else {
            return Ok(None);
        };
        if fresh.state != node.state {
            info!(
                node = %node.name,
                expected = node.state.map(|s| s.as_str()).unwrap_or(""),
                found = fresh.state.map(|s| s.as_str()).unwrap_or(""),
                "Node state changed during step, re-evaluating on next event"
            );
            return Ok(None);
        }
        Ok(Some(fresh))
    }

    async fn timed<F>(&self, step: &str, effect: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        let start = Instant::now();
        let result = effect.await;
        self.writer
            .metrics()
            .observe_step_duration(step, start.elapsed().as_secs_f64());
        result
    }

    async fn step_failed(
        &self,
        node: &NodeMaintenance,
        step: &str,
        reason: &str,
        err: &MaintenanceError,
    ) -> ReconcileAction {
        error!(node = %node.name, step = step, error = %err, "Maintenance step failed");
        self.writer.metrics().inc_step_failure(step);
        self.writer
            .recorder()
            .record(&node.name, EventSeverity::Warning, reason, err.to_string())
            .await;
        ReconcileAction::RequeueAfter(STEP_RETRY)
    }
}
