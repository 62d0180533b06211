//! Node watch loops
//!
//! The cluster-wide controller drives every node through the maintenance
//! pipeline. The per-node agent controller watches only its own node and
//! posts the platform approval once the node is drained.

use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::core::v1::Node;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::ResourceExt;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use drainsafe_core::error::{MaintenanceError, APPROVAL_RETRY};
use drainsafe_core::{CompletionSignal, NodeStateMachine, ReconcileAction};

use crate::client::K8sClient;
use crate::store::from_node;

fn to_action(action: ReconcileAction) -> Action {
    match action {
        ReconcileAction::Done => Action::await_change(),
        ReconcileAction::RequeueAfter(delay) => Action::requeue(delay),
    }
}

/// Resolves once the watch channel flips to `true`
fn stop_signal(
    mut shutdown: watch::Receiver<bool>,
) -> impl Future<Output = ()> + Send + Sync + 'static {
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }
        let _ = tx.send(());
    });
    async move {
        let _ = rx.await;
    }
}

fn error_policy<C>(node: Arc<Node>, err: &MaintenanceError, _ctx: Arc<C>) -> Action {
    if !err.is_retryable() {
        debug!(node = %node.name_any(), error = %err, "Dropping node from queue");
        return Action::await_change();
    }
    warn!(
        node = %node.name_any(),
        error = %err,
        retry_in = ?err.requeue_after(),
        "Reconcile failed"
    );
    Action::requeue(err.requeue_after())
}

async fn reconcile_node(
    node: Arc<Node>,
    machine: Arc<NodeStateMachine>,
) -> Result<Action, MaintenanceError> {
    let action = machine.reconcile(&node.name_any()).await?;
    Ok(to_action(action))
}

/// Drive every node through the maintenance pipeline until shutdown
pub async fn run_controller(
    client: &K8sClient,
    machine: Arc<NodeStateMachine>,
    shutdown: watch::Receiver<bool>,
) {
    info!("Starting node maintenance controller");

    Controller::new(client.nodes(), watcher::Config::default())
        .graceful_shutdown_on(stop_signal(shutdown))
        .run(reconcile_node, error_policy, machine)
        .for_each(|res| async move {
            match res {
                Ok((node, _)) => debug!(node = %node.name, "Reconciled node"),
                Err(e) => warn!(error = %e, "Node controller error"),
            }
        })
        .await;

    info!("Node maintenance controller stopped");
}

async fn reconcile_own_node(
    node: Arc<Node>,
    completion: Arc<CompletionSignal>,
) -> Result<Action, MaintenanceError> {
    let record = from_node(&node);
    match completion.complete(&record).await? {
        ReconcileAction::Done => Ok(Action::requeue(APPROVAL_RETRY)),
        requeue => Ok(to_action(requeue)),
    }
}

/// Watch this process's own node and approve its event once drained
pub async fn run_agent_controller(
    client: &K8sClient,
    node_name: &str,
    completion: Arc<CompletionSignal>,
    shutdown: watch::Receiver<bool>,
) {
    info!(node = node_name, "Starting scheduled event approval controller");

    let config = watcher::Config::default().fields(&format!("metadata.name={}", node_name));
    Controller::new(client.nodes(), config)
        .graceful_shutdown_on(stop_signal(shutdown))
        .run(reconcile_own_node, error_policy, completion)
        .for_each(|res| async move {
            match res {
                Ok((node, _)) => debug!(node = %node.name, "Checked node for approval"),
                Err(e) => warn!(error = %e, "Approval controller error"),
            }
        })
        .await;

    info!("Scheduled event approval controller stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_to_action() {
        assert_eq!(to_action(ReconcileAction::Done), Action::await_change());
        assert_eq!(
            to_action(ReconcileAction::RequeueAfter(Duration::from_secs(30))),
            Action::requeue(Duration::from_secs(30))
        );
    }

    #[tokio::test]
    async fn test_stop_signal_resolves_on_shutdown() {
        let (tx, rx) = watch::channel(false);
        let stop = stop_signal(rx);
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), stop)
            .await
            .unwrap();
    }
}
