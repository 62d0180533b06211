//! Maintenance approval gate
//!
//! An optional external authority that can hold a node pending until a
//! human or policy grants maintenance. A gate that cannot answer is
//! treated as "not yet approved", never as approval.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{MaintenanceError, Result};

/// Resource kind used for node maintenance requests
pub const NODE_KIND: &str = "node";

/// Progress reported back to the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GateState {
    InProgress,
    Completed,
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateState::InProgress => write!(f, "InProgress"),
            GateState::Completed => write!(f, "Completed"),
        }
    }
}

/// Trait for the approval authority
#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Whether maintenance of `name` is approved
    async fn is_approved(&self, name: &str, kind: &str) -> Result<bool>;

    /// Report maintenance progress for `name`
    async fn mark(&self, name: &str, kind: &str, state: GateState) -> Result<()>;
}

/// Gate used when no approval authority is deployed: everything is approved
pub struct NoGate;

#[async_trait]
impl ApprovalGate for NoGate {
    async fn is_approved(&self, _name: &str, _kind: &str) -> Result<bool> {
        Ok(true)
    }

    async fn mark(&self, _name: &str, _kind: &str, _state: GateState) -> Result<()> {
        Ok(())
    }
}

/// Mock gate for testing
#[derive(Default)]
pub struct MockGate {
    pub approved: AtomicBool,
    pub unavailable: AtomicBool,
    marks: RwLock<Vec<(String, GateState)>>,
}

impl MockGate {
    /// Create a gate that denies until told otherwise
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_approved(&self, approved: bool) {
        self.approved.store(approved, Ordering::SeqCst);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Progress marks received so far
    pub async fn marks(&self) -> Vec<(String, GateState)> {
        self.marks.read().await.clone()
    }
}

#[async_trait]
impl ApprovalGate for MockGate {
    async fn is_approved(&self, _name: &str, _kind: &str) -> Result<bool> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MaintenanceError::Gate("approval service unavailable".to_string()));
        }
        Ok(self.approved.load(Ordering::SeqCst))
    }

    async fn mark(&self, name: &str, _kind: &str, state: GateState) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MaintenanceError::Gate("approval service unavailable".to_string()));
        }
        self.marks.write().await.push((name.to_string(), state));
        Ok(())
    }
}
