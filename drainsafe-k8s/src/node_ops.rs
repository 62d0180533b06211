//! Node Operations
//!
//! Implements the cordon, drain and uncordon primitives against the API server.
//! Draining evicts every pod through the eviction API so PodDisruptionBudgets
//! are honored, skipping DaemonSet and static mirror pods.

use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use k8s_openapi::api::core::v1::Pod;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use drainsafe_core::error::{MaintenanceError, Result};
use drainsafe_core::NodeExecutor;

use super::client::K8sClient;

/// Drain configuration
#[derive(Debug, Clone)]
pub struct DrainConfig {
    /// Pods evicted at the same time
    pub concurrency: usize,
    /// Delay between eviction attempts blocked by a disruption budget
    pub eviction_retry: Duration,
    /// Poll interval while waiting for evicted pods to disappear
    pub deletion_check: Duration,
    /// Extra time beyond the grace period before a drain is abandoned
    pub timeout_slack: Duration,
}

impl Default for DrainConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            eviction_retry: Duration::from_secs(5),
            deletion_check: Duration::from_secs(5),
            timeout_slack: Duration::from_secs(30),
        }
    }
}

/// Node operator executing maintenance side effects
pub struct NodeOperator {
    client: K8sClient,
    config: DrainConfig,
    dry_run: bool,
}

impl NodeOperator {
    /// Create a new node operator
    pub fn new(client: K8sClient, config: DrainConfig, dry_run: bool) -> Self {
        Self {
            client,
            config,
            dry_run,
        }
    }

    /// Evict all drainable pods and wait for them to terminate
    async fn evict_pods(&self, node: &str, grace_period: Duration) -> Result<()> {
        let pods = self
            .client
            .list_pods_on_node(node)
            .await
            .map_err(|e| MaintenanceError::executor("drain", node, e))?;

        let targets: Vec<Pod> = pods.into_iter().filter(|p| !should_skip_pod(p)).collect();
        info!(node = node, pods = targets.len(), "Evicting pods");

        if self.dry_run {
            for pod in &targets {
                info!(
                    namespace = pod.metadata.namespace.as_deref().unwrap_or("default"),
                    pod = pod.metadata.name.as_deref().unwrap_or("unknown"),
                    "[DRY-RUN] Would evict pod"
                );
            }
            return Ok(());
        }

        let failures: Vec<String> = stream::iter(targets)
            .map(|pod| async move { self.evict_and_wait(&pod, grace_period).await })
            .buffer_unordered(self.config.concurrency.max(1))
            .filter_map(|result| async move { result.err() })
            .collect()
            .await;

        if failures.is_empty() {
            Ok(())
        } else {
            Err(MaintenanceError::executor(
                "drain",
                node,
                format!("{} pod(s) not evicted: {}", failures.len(), failures.join("; ")),
            ))
        }
    }

    async fn evict_and_wait(&self, pod: &Pod, grace_period: Duration) -> std::result::Result<(), String> {
        let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
        let name = pod.metadata.name.as_deref().unwrap_or("unknown");

        loop {
            match self.client.evict_pod(namespace, name, grace_period).await {
                Ok(()) => {
                    info!(namespace = namespace, pod = name, "Pod evicted");
                    break;
                }
                Err(kube::Error::Api(e)) if e.code == 404 => {
                    debug!(namespace = namespace, pod = name, "Pod already gone");
                    return Ok(());
                }
                Err(kube::Error::Api(e)) if e.code == 429 || e.code == 500 => {
                    warn!(
                        namespace = namespace,
                        pod = name,
                        error = %e,
                        retry_in = ?self.config.eviction_retry,
                        "Eviction blocked, likely by a PodDisruptionBudget"
                    );
                    sleep(self.config.eviction_retry).await;
                }
                Err(e) => {
                    warn!(namespace = namespace, pod = name, error = %e, "Failed to evict pod");
                    return Err(format!("{}/{}: {}", namespace, name, e));
                }
            }
        }

        self.wait_for_deletion(pod, namespace, name).await;
        Ok(())
    }

    /// Poll until the evicted pod (or at least this incarnation of it) is gone
    async fn wait_for_deletion(&self, pod: &Pod, namespace: &str, name: &str) {
        let uid = pod.metadata.uid.as_deref();
        loop {
            match self.client.get_pod(namespace, name).await {
                Ok(None) => break,
                Ok(Some(current)) if current.metadata.uid.as_deref() != uid => break,
                Ok(Some(_)) => {
                    debug!(namespace = namespace, pod = name, "Pod not yet deleted");
                }
                Err(e) => {
                    warn!(
                        namespace = namespace,
                        pod = name,
                        error = %e,
                        "Could not determine if pod has been deleted"
                    );
                }
            }
            sleep(self.config.deletion_check).await;
        }
        debug!(namespace = namespace, pod = name, "Pod deleted");
    }
}

#[async_trait]
impl NodeExecutor for NodeOperator {
    async fn cordon(&self, node: &str) -> Result<()> {
        if self.dry_run {
            info!(node = node, "[DRY-RUN] Would cordon node");
            return Ok(());
        }

        self.client
            .set_unschedulable(node, true)
            .await
            .map_err(|e| MaintenanceError::executor("cordon", node, e))
    }

    async fn drain(&self, node: &str, grace_period: Duration) -> Result<()> {
        let deadline = grace_period + self.config.timeout_slack;
        let start = Instant::now();

        match tokio::time::timeout(deadline, self.evict_pods(node, grace_period)).await {
            Ok(result) => {
                if result.is_ok() {
                    info!(node = node, duration = ?start.elapsed(), "Node drained");
                }
                result
            }
            Err(_) => Err(MaintenanceError::executor(
                "drain",
                node,
                format!("timed out after {:?}", deadline),
            )),
        }
    }

    async fn uncordon(&self, node: &str) -> Result<()> {
        if self.dry_run {
            info!(node = node, "[DRY-RUN] Would uncordon node");
            return Ok(());
        }

        self.client
            .set_unschedulable(node, false)
            .await
            .map_err(|e| MaintenanceError::executor("uncordon", node, e))
    }
}

/// Check if a pod should be left in place during a drain
pub fn should_skip_pod(pod: &Pod) -> bool {
    let metadata = &pod.metadata;

    // Mirror pods are created by the kubelet for static pods
    if let Some(annotations) = &metadata.annotations {
        if annotations.contains_key("kubernetes.io/config.mirror") {
            return true;
        }
    }

    // The DaemonSet controller ignores cordons
    if let Some(owner_refs) = &metadata.owner_references {
        if owner_refs
            .iter()
            .any(|owner| owner.kind == "DaemonSet" && owner.controller == Some(true))
        {
            return true;
        }
    }

    // Finished pods hold nothing
    matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn pod() -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("web-7d4b9c".to_string()),
                namespace: Some("shop".to_string()),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn owned_by(kind: &str) -> Pod {
        let mut p = pod();
        p.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "apps/v1".to_string(),
            kind: kind.to_string(),
            name: "owner".to_string(),
            uid: "1234".to_string(),
            controller: Some(true),
            ..Default::default()
        }]);
        p
    }

    #[test]
    fn test_regular_pods_are_evicted() {
        assert!(!should_skip_pod(&pod()));
        assert!(!should_skip_pod(&owned_by("ReplicaSet")));
    }

    #[test]
    fn test_daemonset_pods_are_skipped() {
        assert!(should_skip_pod(&owned_by("DaemonSet")));
    }

    #[test]
    fn test_mirror_pods_are_skipped() {
        let mut p = pod();
        p.metadata.annotations = Some(BTreeMap::from([(
            "kubernetes.io/config.mirror".to_string(),
            "abc".to_string(),
        )]));
        assert!(should_skip_pod(&p));
    }

    #[test]
    fn test_finished_pods_are_skipped() {
        let mut p = pod();
        p.status = Some(PodStatus {
            phase: Some("Succeeded".to_string()),
            ..Default::default()
        });
        assert!(should_skip_pod(&p));
    }

    #[test]
    fn test_drain_defaults() {
        let config = DrainConfig::default();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.eviction_retry, Duration::from_secs(5));
    }
}
