//! Cordon, drain and uncordon primitives
//!
//! Eviction itself is delegated; this module only defines the contract
//! the state machine consumes and a recording mock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::{MaintenanceError, Result};
use crate::store::MemoryNodeStore;

/// Trait for taking a node in and out of service
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Mark the node unschedulable
    async fn cordon(&self, node: &str) -> Result<()>;

    /// Evict the node's workload, giving up after `grace_period`
    async fn drain(&self, node: &str, grace_period: Duration) -> Result<()>;

    /// Mark the node schedulable again
    async fn uncordon(&self, node: &str) -> Result<()>;
}

/// A call observed by [`MockExecutor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorCall {
    Cordon(String),
    Drain(String, Duration),
    Uncordon(String),
}

/// Mock executor recording every call
///
/// When bound to a [`MemoryNodeStore`], cordon and uncordon flip the
/// stored `unschedulable` flag like the control plane would.
#[derive(Default)]
pub struct MockExecutor {
    calls: RwLock<Vec<ExecutorCall>>,
    store: Option<Arc<MemoryNodeStore>>,
    pub fail_cordon: AtomicBool,
    pub fail_drain: AtomicBool,
    pub fail_uncordon: AtomicBool,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reflect cordon state changes into `store`
    pub fn bound_to(store: Arc<MemoryNodeStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::default()
        }
    }

    pub fn set_fail_cordon(&self, fail: bool) {
        self.fail_cordon.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_drain(&self, fail: bool) {
        self.fail_drain.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_uncordon(&self, fail: bool) {
        self.fail_uncordon.store(fail, Ordering::SeqCst);
    }

    /// Calls observed so far, in order
    pub async fn calls(&self) -> Vec<ExecutorCall> {
        self.calls.read().await.clone()
    }

    async fn set_unschedulable(&self, node: &str, unschedulable: bool) -> Result<()> {
        if let Some(store) = &self.store {
            store.set_unschedulable(node, unschedulable).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl NodeExecutor for MockExecutor {
    async fn cordon(&self, node: &str) -> Result<()> {
        self.calls
            .write()
            .await
            .push(ExecutorCall::Cordon(node.to_string()));
        if self.fail_cordon.load(Ordering::SeqCst) {
            return Err(MaintenanceError::executor("cordon", node, "simulated failure"));
        }
        self.set_unschedulable(node, true).await
    }

    async fn drain(&self, node: &str, grace_period: Duration) -> Result<()> {
        self.calls
            .write()
            .await
            .push(ExecutorCall::Drain(node.to_string(), grace_period));
        if self.fail_drain.load(Ordering::SeqCst) {
            return Err(MaintenanceError::executor("drain", node, "simulated failure"));
        }
        Ok(())
    }

    async fn uncordon(&self, node: &str) -> Result<()> {
        self.calls
            .write()
            .await
            .push(ExecutorCall::Uncordon(node.to_string()));
        if self.fail_uncordon.load(Ordering::SeqCst) {
            return Err(MaintenanceError::executor("uncordon", node, "simulated failure"));
        }
        self.set_unschedulable(node, false).await
    }
}
