//! Drainsafe Core Library
//!
//! Platform maintenance handling for cluster nodes.
//! This crate provides the maintenance state machine, scheduled event
//! detection, the completion signal and the seams to the outside world.

pub mod annotations;
pub mod completion;
pub mod detector;
pub mod error;
pub mod executor;
pub mod gate;
pub mod metadata;
pub mod metrics;
pub mod reconciler;
pub mod recorder;
pub mod state_machine;
pub mod store;

// Re-export common types
pub use completion::CompletionSignal;
pub use detector::{EventDetector, TickOutcome};
pub use error::{MaintenanceError, Result};
pub use executor::NodeExecutor;
pub use gate::{ApprovalGate, GateState, NoGate};
pub use metadata::{ImdsClient, MetadataService, ScheduledEvent};
pub use reconciler::{NodeStateMachine, ReconcileAction};
pub use recorder::{EventRecorder, EventSeverity, NoopRecorder};
pub use state_machine::{MaintenanceState, MaintenanceType, NodeMaintenance};
pub use store::{NodeStore, StateWriter};
