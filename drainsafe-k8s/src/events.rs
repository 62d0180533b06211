//! Kubernetes Event recording
//!
//! Every persisted transition and every failed step is published as an Event
//! on the Node, so `kubectl describe node` shows the maintenance history.
//! Publishing is fire-and-forget: a failed event never fails a step.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

use drainsafe_core::recorder::{EventRecorder, EventSeverity};

/// Action reported on every event
const ACTION: &str = "Maintenance";

/// [`EventRecorder`] publishing through `kube::runtime::events::Recorder`
pub struct KubeRecorder {
    client: Client,
    reporter: Reporter,
}

impl KubeRecorder {
    /// `instance` is the reporting pod, if known
    pub fn new(client: Client, controller: &str, instance: Option<String>) -> Self {
        Self {
            client,
            reporter: Reporter {
                controller: controller.to_string(),
                instance,
            },
        }
    }

    fn node_reference(node: &str) -> ObjectReference {
        // Node events are keyed by name
        ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Node".to_string()),
            name: Some(node.to_string()),
            uid: Some(node.to_string()),
            ..Default::default()
        }
    }
}

#[async_trait]
impl EventRecorder for KubeRecorder {
    async fn record(&self, node: &str, severity: EventSeverity, reason: &str, message: String) {
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            Self::node_reference(node),
        );
        let type_ = match severity {
            EventSeverity::Normal => EventType::Normal,
            EventSeverity::Warning => EventType::Warning,
        };

        let event = Event {
            type_,
            reason: reason.to_string(),
            note: Some(message),
            action: ACTION.to_string(),
            secondary: None,
        };
        if let Err(e) = recorder.publish(event).await {
            warn!(node = node, reason = reason, error = %e, "Failed to publish Kubernetes event");
        }
    }
}
