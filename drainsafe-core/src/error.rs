//! Error taxonomy shared by the detector, the state machine and their seams.

use std::time::Duration;

use thiserror::Error;

/// Requeue delay for a failed state machine step.
pub const STEP_RETRY: Duration = Duration::from_secs(60);

/// Requeue delay for the detection and approval loop.
pub const APPROVAL_RETRY: Duration = Duration::from_secs(30);

/// Requeue delay after an optimistic-concurrency conflict.
pub const CONFLICT_RETRY: Duration = Duration::from_secs(5);

/// Errors raised while driving node maintenance
#[derive(Debug, Error)]
pub enum MaintenanceError {
    /// Metadata service or control plane unreachable, non-2xx, or unparsable
    #[error("transport error: {0}")]
    Transport(String),

    /// Write rejected because the stored object moved on
    #[error("conflict updating node {node}: {message}")]
    Conflict { node: String, message: String },

    /// Node deleted between notification and fetch
    #[error("node not found: {0}")]
    NotFound(String),

    /// Missing identity or otherwise unusable configuration
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Approval gate could not answer
    #[error("approval gate error: {0}")]
    Gate(String),

    /// Cordon, drain or uncordon failed
    #[error("{action} failed on node {node}: {message}")]
    Executor {
        action: &'static str,
        node: String,
        message: String,
    },
}

impl MaintenanceError {
    /// Build a transport error from anything displayable
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    /// Build an executor error for the given primitive
    pub fn executor(action: &'static str, node: &str, err: impl std::fmt::Display) -> Self {
        Self::Executor {
            action,
            node: node.to_string(),
            message: err.to_string(),
        }
    }

    /// Whether re-evaluating later can succeed
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotFound(_) | Self::Configuration(_))
    }

    /// Delay before the reconciler should look at the node again
    pub fn requeue_after(&self) -> Duration {
        match self {
            Self::Conflict { .. } => CONFLICT_RETRY,
            _ => STEP_RETRY,
        }
    }
}

pub type Result<T> = std::result::Result<T, MaintenanceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(MaintenanceError::transport("connection refused").is_retryable());
        assert!(MaintenanceError::Conflict {
            node: "n1".into(),
            message: "stale".into()
        }
        .is_retryable());
        assert!(!MaintenanceError::NotFound("n1".into()).is_retryable());
        assert!(!MaintenanceError::Configuration("NODE_NAME unset".into()).is_retryable());
    }

    #[test]
    fn test_requeue_delays() {
        let conflict = MaintenanceError::Conflict {
            node: "n1".into(),
            message: "stale".into(),
        };
        assert_eq!(conflict.requeue_after(), CONFLICT_RETRY);
        assert_eq!(
            MaintenanceError::transport("503").requeue_after(),
            Duration::from_secs(60)
        );
    }
}
