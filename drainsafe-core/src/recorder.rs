//! Cluster-visible event recording
//!
//! Events are fire-and-forget: implementations log failures and never
//! return them, so a lost event cannot break a maintenance step.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

/// Severity of a recorded event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Normal,
    Warning,
}

impl std::fmt::Display for EventSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventSeverity::Normal => write!(f, "Normal"),
            EventSeverity::Warning => write!(f, "Warning"),
        }
    }
}

/// Trait for publishing events against a node
#[async_trait]
pub trait EventRecorder: Send + Sync {
    /// Publish an event on the named node
    async fn record(&self, node: &str, severity: EventSeverity, reason: &str, message: String);
}

/// Recorder that drops everything
pub struct NoopRecorder;

#[async_trait]
impl EventRecorder for NoopRecorder {
    async fn record(&self, _node: &str, _severity: EventSeverity, _reason: &str, _message: String) {
    }
}

/// An event kept by [`MemoryRecorder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub node: String,
    pub severity: EventSeverity,
    pub reason: String,
    pub message: String,
}

/// Recorder that keeps every event in memory, for testing
#[derive(Default)]
pub struct MemoryRecorder {
    events: RwLock<Vec<RecordedEvent>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// All events recorded so far
    pub async fn events(&self) -> Vec<RecordedEvent> {
        self.events.read().await.clone()
    }

    /// Reasons recorded so far, in order
    pub async fn reasons(&self) -> Vec<String> {
        self.events
            .read()
            .await
            .iter()
            .map(|e| e.reason.clone())
            .collect()
    }
}

#[async_trait]
impl EventRecorder for MemoryRecorder {
    async fn record(&self, node: &str, severity: EventSeverity, reason: &str, message: String) {
        self.events.write().await.push(RecordedEvent {
            node: node.to_string(),
            severity,
            reason: reason.to_string(),
            message,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_recorder_keeps_order() {
        let recorder = MemoryRecorder::new();
        recorder
            .record("n1", EventSeverity::Normal, "NodeCordoned", "n1 by pod".into())
            .await;
        recorder
            .record("n1", EventSeverity::Warning, "DrainFailed", "timeout".into())
            .await;

        assert_eq!(recorder.reasons().await, vec!["NodeCordoned", "DrainFailed"]);
        assert_eq!(recorder.events().await[1].severity, EventSeverity::Warning);
    }
}
