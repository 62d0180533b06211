//! Scheduled event detector
//!
//! Runs on each node and polls the instance metadata service for platform
//! events targeting this instance. It opens a maintenance cycle by writing
//! SCHEDULED and closes it by writing RUNNING once the platform is done.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::completion::CompletionSignal;
use crate::error::{MaintenanceError, Result};
use crate::metadata::{actionable, MetadataService, ScheduledEvent};
use crate::reconciler::ReconcileAction;
use crate::state_machine::{MaintenanceState, MaintenanceType, NodeMaintenance};
use crate::store::StateWriter;

/// Result of a single evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The node could not be read
    NodeUnavailable,
    /// The metadata service could not be queried
    EventsUnavailable,
    /// A new maintenance cycle was opened
    Scheduled { event_id: String },
    /// A cycle is already underway, the event was left alone
    InProgress,
    /// The drained node's event was handed to the completion signal
    Approval(ReconcileAction),
    /// The cycle was closed
    Reset,
    /// Nothing to do
    Steady,
    /// Writing the node failed
    WriteFailed,
}

impl TickOutcome {
    /// Label used for the tick counter
    pub fn as_str(&self) -> &'static str {
        match self {
            TickOutcome::NodeUnavailable => "node_unavailable",
            TickOutcome::EventsUnavailable => "events_unavailable",
            TickOutcome::Scheduled { .. } => "scheduled",
            TickOutcome::InProgress => "in_progress",
            TickOutcome::Approval(_) => "approval",
            TickOutcome::Reset => "reset",
            TickOutcome::Steady => "steady",
            TickOutcome::WriteFailed => "write_failed",
        }
    }
}

/// Per-node scheduled event poller
pub struct EventDetector {
    hostname: String,
    instance_id: String,
    metadata: Arc<dyn MetadataService>,
    writer: Arc<StateWriter>,
    completion: CompletionSignal,
    interval: Duration,
}

impl EventDetector {
    /// Resolve this node's instance identity and build the detector
    ///
    /// Fails with `Configuration` when the identity cannot be resolved; the
    /// process has no way to match events without it.
    pub async fn resolve(
        hostname: impl Into<String>,
        metadata: Arc<dyn MetadataService>,
        writer: Arc<StateWriter>,
        interval: Duration,
    ) -> Result<Self> {
        let hostname = hostname.into();
        let instance_id = metadata.current_instance_id().await.map_err(|e| {
            MaintenanceError::Configuration(format!(
                "cannot resolve instance identifier for {}: {}",
                hostname, e
            ))
        })?;
        let instance_id = instance_id.trim().to_string();
        if instance_id.is_empty() {
            return Err(MaintenanceError::Configuration(format!(
                "metadata service returned an empty instance identifier for {}",
                hostname
            )));
        }

        info!(
            hostname = %hostname,
            instance_id = %instance_id,
            "Resolved instance identity"
        );

        let completion = CompletionSignal::new(metadata.clone(), writer.clone(), instance_id.clone());
        Ok(Self {
            hostname,
            instance_id,
            metadata,
            writer,
            completion,
            interval,
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Poll until the shutdown signal flips to `true`
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            hostname = %self.hostname,
            interval = %humantime::format_duration(self.interval),
            "Starting scheduled event detector"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let outcome = self.tick().await;
                    self.writer.metrics().inc_detector_tick(outcome.as_str());
                    debug!(outcome = ?outcome, duration = ?start.elapsed(), "Detector tick complete");
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Shutdown signal received, stopping detector");
                        break;
                    }
                }
            }
        }
    }

    /// Evaluate the node once
    pub async fn tick(&self) -> TickOutcome {
        let node = match self.writer.store().get(&self.hostname).await {
            Ok(Some(node)) => node,
            Ok(None) => {
                warn!(hostname = %self.hostname, "Node not found, skipping tick");
                return TickOutcome::NodeUnavailable;
            }
            Err(e) => {
                warn!(hostname = %self.hostname, error = %e, "Failed to fetch node, skipping tick");
                return TickOutcome::NodeUnavailable;
            }
        };

        let events = match self.metadata.list_scheduled_events().await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Failed to list scheduled events, skipping tick");
                return TickOutcome::EventsUnavailable;
            }
        };

        if node.state == Some(MaintenanceState::Started) {
            return self.on_started(&node, &events).await;
        }

        let outcome = match actionable(&events, &self.instance_id).next() {
            Some(event) => self.on_event(&node, event, &events).await,
            None => self.on_quiet(&node).await,
        };
        outcome
    }

    async fn on_event(
        &self,
        node: &NodeMaintenance,
        event: &ScheduledEvent,
        events: &[ScheduledEvent],
    ) -> TickOutcome {
        if node.is_idle() {
            info!(
                hostname = %self.hostname,
                event_id = %event.event_id,
                event_type = %event.event_type,
                not_before = ?event.not_before(),
                "Scheduled event targets this node"
            );
            let maintenance_type = event.maintenance_type();
            let event_id = event.event_id.clone();
            let recorded = event_id.clone();
            let written = self
                .writer
                .write(node, MaintenanceState::Scheduled, move |n| {
                    n.maintenance_type = maintenance_type;
                    n.event_id = Some(recorded);
                })
                .await;
            return match written {
                Ok(_) => TickOutcome::Scheduled { event_id },
                Err(e) => self.write_failed(e),
            };
        }

        match node.state {
            Some(MaintenanceState::Drained) => {
                match self.completion.complete_with(node, events).await {
                    Ok(action) => TickOutcome::Approval(action),
                    Err(e) => self.write_failed(e),
                }
            }
            _ => {
                info!(
                    hostname = %self.hostname,
                    event_id = %event.event_id,
                    state = node.state.map(|s| s.as_str()).unwrap_or(""),
                    "Maintenance already in progress, ignoring scheduled event"
                );
                TickOutcome::InProgress
            }
        }
    }

    /// The approved event keeps the cycle open while the platform still lists it
    async fn on_started(&self, node: &NodeMaintenance, events: &[ScheduledEvent]) -> TickOutcome {
        if self.recorded_listed(node, events) {
            debug!(
                hostname = %self.hostname,
                event_id = node.event_id.as_deref().unwrap_or(""),
                "Platform maintenance still in progress"
            );
            return TickOutcome::InProgress;
        }
        info!(
            hostname = %self.hostname,
            event_id = node.event_id.as_deref().unwrap_or(""),
            "Recorded event finished, closing maintenance cycle"
        );
        self.reset(node).await
    }

    async fn on_quiet(&self, node: &NodeMaintenance) -> TickOutcome {
        if node.state == Some(MaintenanceState::Running) {
            return TickOutcome::Steady;
        }
        self.reset(node).await
    }

    async fn reset(&self, node: &NodeMaintenance) -> TickOutcome {
        let written = self
            .writer
            .write(node, MaintenanceState::Running, |n| {
                n.maintenance_type = MaintenanceType::None;
                n.event_id = None;
            })
            .await;
        match written {
            Ok(_) => TickOutcome::Reset,
            Err(e) => self.write_failed(e),
        }
    }

    /// Whether the event that opened this cycle is still listed, whatever its status
    fn recorded_listed(&self, node: &NodeMaintenance, events: &[ScheduledEvent]) -> bool {
        let mut ours = events
            .iter()
            .filter(|e| e.is_disruptive() && e.targets(&self.instance_id));
        match &node.event_id {
            Some(id) => ours.any(|e| &e.event_id == id),
            // No record of which event opened the cycle: treat any as ours
            None => ours.next().is_some(),
        }
    }

    fn write_failed(&self, err: MaintenanceError) -> TickOutcome {
        warn!(hostname = %self.hostname, error = %err, "Failed to update node, retrying next tick");
        TickOutcome::WriteFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{ImdsClient, MockMetadata};
    use crate::metrics::MetricsRegistry;
    use crate::recorder::MemoryRecorder;
    use crate::store::{MemoryNodeStore, NodeStore};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        store: Arc<MemoryNodeStore>,
        metadata: Arc<MockMetadata>,
        detector: EventDetector,
    }

    async fn fixture(node: NodeMaintenance) -> Fixture {
        let store = Arc::new(MemoryNodeStore::new());
        store.insert(node).await;
        let metadata = Arc::new(MockMetadata::new("vm_0"));
        let writer = Arc::new(StateWriter::new(
            store.clone(),
            Arc::new(MemoryRecorder::new()),
            Arc::new(MetricsRegistry::new()),
            "agent-0",
        ));
        let detector = EventDetector::resolve(
            "node-0",
            metadata.clone(),
            writer,
            Duration::from_secs(25),
        )
        .await
        .unwrap();
        Fixture {
            store,
            metadata,
            detector,
        }
    }

    async fn stored(store: &MemoryNodeStore) -> NodeMaintenance {
        store.get("node-0").await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_resolve_failure_is_fatal() {
        let metadata = Arc::new(MockMetadata::new(""));
        let writer = Arc::new(StateWriter::new(
            Arc::new(MemoryNodeStore::new()),
            Arc::new(MemoryRecorder::new()),
            Arc::new(MetricsRegistry::new()),
            "agent-0",
        ));
        let err = EventDetector::resolve("node-0", metadata, writer, Duration::from_secs(25))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MaintenanceError::Configuration(_)));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_blank_instance_id_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/instance/compute/name"))
            .respond_with(ResponseTemplate::new(200).set_body_string("  \n"))
            .mount(&server)
            .await;

        let metadata = Arc::new(ImdsClient::new(server.uri(), Duration::from_secs(2)));
        let writer = Arc::new(StateWriter::new(
            Arc::new(MemoryNodeStore::new()),
            Arc::new(MemoryRecorder::new()),
            Arc::new(MetricsRegistry::new()),
            "agent-0",
        ));
        let err = EventDetector::resolve("node-0", metadata, writer, Duration::from_secs(25))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, MaintenanceError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_event_opens_cycle() {
        let f = fixture(NodeMaintenance::new("node-0")).await;
        f.metadata.schedule("evt-1", "Reboot").await;

        let outcome = f.detector.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::Scheduled {
                event_id: "evt-1".to_string()
            }
        );

        let node = stored(&f.store).await;
        assert_eq!(node.state, Some(MaintenanceState::Scheduled));
        assert_eq!(node.maintenance_type, MaintenanceType::Reboot);
        assert_eq!(node.event_id.as_deref(), Some("evt-1"));
    }

    #[tokio::test]
    async fn test_second_event_does_not_clobber_cycle() {
        let mut node = NodeMaintenance::new("node-0").with_state(MaintenanceState::Draining);
        node.maintenance_type = MaintenanceType::Reboot;
        node.event_id = Some("evt-1".to_string());
        let f = fixture(node).await;
        f.metadata.schedule("evt-1", "Reboot").await;
        f.metadata.schedule("evt-2", "Redeploy").await;

        assert_eq!(f.detector.tick().await, TickOutcome::InProgress);
        let node = stored(&f.store).await;
        assert_eq!(node.state, Some(MaintenanceState::Draining));
        assert_eq!(node.maintenance_type, MaintenanceType::Reboot);
        assert_eq!(f.store.update_calls(), 0);
    }

    #[tokio::test]
    async fn test_quiet_platform_resets_to_running() {
        let mut node = NodeMaintenance::new("node-0").with_state(MaintenanceState::Started);
        node.maintenance_type = MaintenanceType::Reboot;
        node.event_id = Some("evt-1".to_string());
        let f = fixture(node).await;

        assert_eq!(f.detector.tick().await, TickOutcome::Reset);
        let node = stored(&f.store).await;
        assert_eq!(node.state, Some(MaintenanceState::Running));
        assert_eq!(node.maintenance_type, MaintenanceType::None);
        assert_eq!(node.event_id, None);

        assert_eq!(f.detector.tick().await, TickOutcome::Steady);
        assert_eq!(f.store.update_calls(), 1);
    }

    #[tokio::test]
    async fn test_started_with_new_event_closes_old_cycle_first() {
        let mut node = NodeMaintenance::new("node-0").with_state(MaintenanceState::Started);
        node.event_id = Some("evt-1".to_string());
        let f = fixture(node).await;
        f.metadata.schedule("evt-2", "Freeze").await;

        assert_eq!(f.detector.tick().await, TickOutcome::Reset);
        assert_eq!(
            f.detector.tick().await,
            TickOutcome::Scheduled {
                event_id: "evt-2".to_string()
            }
        );
        let node = stored(&f.store).await;
        assert_eq!(node.maintenance_type, MaintenanceType::Freeze);
    }

    #[tokio::test]
    async fn test_started_with_recorded_event_waits() {
        let mut node = NodeMaintenance::new("node-0").with_state(MaintenanceState::Started);
        node.event_id = Some("evt-1".to_string());
        let f = fixture(node).await;
        f.metadata.schedule("evt-1", "Reboot").await;

        assert_eq!(f.detector.tick().await, TickOutcome::InProgress);
        assert_eq!(f.store.update_calls(), 0);
    }

    #[tokio::test]
    async fn test_started_event_keeps_cycle_open() {
        let mut node = NodeMaintenance::new("node-0").with_state(MaintenanceState::Started);
        node.maintenance_type = MaintenanceType::Reboot;
        node.event_id = Some("evt-1".to_string());
        let f = fixture(node).await;
        f.metadata
            .push(ScheduledEvent {
                event_id: "evt-1".to_string(),
                event_status: "Started".to_string(),
                event_type: "Reboot".to_string(),
                resource_type: "VirtualMachine".to_string(),
                resources: vec!["vm_0".to_string()],
                not_before: String::new(),
            })
            .await;

        assert_eq!(f.detector.tick().await, TickOutcome::InProgress);
        let node = stored(&f.store).await;
        assert_eq!(node.state, Some(MaintenanceState::Started));
        assert_eq!(node.event_id.as_deref(), Some("evt-1"));
        assert_eq!(f.store.update_calls(), 0);

        f.metadata.clear().await;
        assert_eq!(f.detector.tick().await, TickOutcome::Reset);
    }

    #[tokio::test]
    async fn test_drained_node_is_approved_on_tick() {
        let mut node = NodeMaintenance::new("node-0").with_state(MaintenanceState::Drained);
        node.event_id = Some("evt-1".to_string());
        let f = fixture(node).await;
        f.metadata.schedule("evt-1", "Reboot").await;

        assert_eq!(
            f.detector.tick().await,
            TickOutcome::Approval(ReconcileAction::Done)
        );
        assert_eq!(f.metadata.approved().await, vec!["evt-1"]);
        assert_eq!(stored(&f.store).await.state, Some(MaintenanceState::Started));
    }

    #[tokio::test]
    async fn test_event_for_other_instance_is_ignored() {
        let f = fixture(NodeMaintenance::new("node-0").with_state(MaintenanceState::Running)).await;
        f.metadata
            .push(ScheduledEvent {
                event_id: "evt-9".to_string(),
                event_type: "Reboot".to_string(),
                resource_type: "VirtualMachine".to_string(),
                resources: vec!["vm_7".to_string()],
                event_status: "Scheduled".to_string(),
                not_before: String::new(),
            })
            .await;

        assert_eq!(f.detector.tick().await, TickOutcome::Steady);
    }

    #[tokio::test]
    async fn test_failures_skip_tick() {
        let f = fixture(NodeMaintenance::new("node-0").with_state(MaintenanceState::Cordoned)).await;
        f.metadata.set_fail_list(true);
        assert_eq!(f.detector.tick().await, TickOutcome::EventsUnavailable);
        assert_eq!(stored(&f.store).await.state, Some(MaintenanceState::Cordoned));

        f.metadata.set_fail_list(false);
        f.store.remove("node-0").await;
        assert_eq!(f.detector.tick().await, TickOutcome::NodeUnavailable);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture(NodeMaintenance::new("node-0").with_state(MaintenanceState::Running)).await;
        let (tx, rx) = watch::channel(false);

        let handle = async {
            f.detector.run(rx).await;
        };
        let stop = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send(true).unwrap();
        };
        tokio::join!(handle, stop);

        assert!(f.metadata.list_calls() >= 1);
    }
}
