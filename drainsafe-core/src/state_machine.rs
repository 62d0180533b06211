//! Node Maintenance State Machine
//!
//! Pipeline persisted on the node:
//! SCHEDULED → (PENDING) → APPROVED → CORDONING → CORDONED → DRAINING → DRAINED → STARTED → RUNNING
//!
//! State transitions:
//! - SCHEDULED → APPROVED: approval gate absent or granted
//! - APPROVED → CORDONING: unconditional
//! - CORDONING → CORDONED: node cordoned (or already unschedulable)
//! - CORDONED → DRAINING: unconditional
//! - DRAINING → DRAINED: drain completed within the grace period
//! - DRAINED → STARTED: platform event approved (completion signal)
//! - STARTED → RUNNING: event detector no longer sees the event
//! - RUNNING + unschedulable: uncordon, state unchanged

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Requeue delay while waiting in STARTED for the detector to reset the node
pub const STARTED_REQUEUE: Duration = Duration::from_secs(30);

/// Event reason emitted after uncordoning; never persisted
pub const UNCORDONED_REASON: &str = "NodeUncordoned";

/// Maintenance states, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum MaintenanceState {
    /// Platform event detected against this node
    Scheduled,
    /// Waiting on the approval gate
    Pending,
    /// Maintenance approved, node may be taken out of service
    Approved,
    /// Workload scheduling is being disabled
    Cordoning,
    /// Workload scheduling is disabled
    Cordoned,
    /// Workload is being evicted
    Draining,
    /// Workload evicted, platform may proceed
    Drained,
    /// Platform event approved and in progress
    Started,
    /// Maintenance completed, steady state
    Running,
}

impl MaintenanceState {
    /// Annotation value for this state
    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenanceState::Scheduled => "MaintenanceScheduled",
            MaintenanceState::Pending => "MaintenancePending",
            MaintenanceState::Approved => "MaintenanceApproved",
            MaintenanceState::Cordoning => "NodeCordoning",
            MaintenanceState::Cordoned => "NodeCordoned",
            MaintenanceState::Draining => "NodeDraining",
            MaintenanceState::Drained => "NodeDrained",
            MaintenanceState::Started => "MaintenanceStarted",
            MaintenanceState::Running => "NodeRunning",
        }
    }

    /// Parse an annotation value; unknown values yield `None`
    pub fn parse(value: &str) -> Option<Self> {
        let state = match value {
            "MaintenanceScheduled" => MaintenanceState::Scheduled,
            "MaintenancePending" => MaintenanceState::Pending,
            "MaintenanceApproved" => MaintenanceState::Approved,
            "NodeCordoning" => MaintenanceState::Cordoning,
            "NodeCordoned" => MaintenanceState::Cordoned,
            "NodeDraining" => MaintenanceState::Draining,
            "NodeDrained" => MaintenanceState::Drained,
            "MaintenanceStarted" => MaintenanceState::Started,
            "NodeRunning" => MaintenanceState::Running,
            _ => return None,
        };
        Some(state)
    }

    /// Numeric value exported as a metric
    pub fn ordinal(&self) -> i64 {
        *self as i64
    }
}

impl fmt::Display for MaintenanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Disruption type attached to a maintenance cycle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MaintenanceType {
    Reboot,
    Redeploy,
    Preempt,
    Terminate,
    Freeze,
    /// Unrecognized value, kept verbatim
    Other(String),
    /// No maintenance in flight
    #[default]
    None,
}

impl MaintenanceType {
    /// Parse the platform or annotation spelling, case-insensitively
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "" => MaintenanceType::None,
            "reboot" => MaintenanceType::Reboot,
            "redeploy" => MaintenanceType::Redeploy,
            "preempt" => MaintenanceType::Preempt,
            "terminate" => MaintenanceType::Terminate,
            "freeze" => MaintenanceType::Freeze,
            _ => MaintenanceType::Other(value.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            MaintenanceType::Reboot => "Reboot",
            MaintenanceType::Redeploy => "Redeploy",
            MaintenanceType::Preempt => "Preempt",
            MaintenanceType::Terminate => "Terminate",
            MaintenanceType::Freeze => "Freeze",
            MaintenanceType::Other(value) => value,
            MaintenanceType::None => "",
        }
    }

    /// Drain budget, sized to the warning the platform gives before acting
    pub fn grace_period(&self) -> Duration {
        let secs = match self {
            MaintenanceType::Reboot | MaintenanceType::Freeze => 840,
            MaintenanceType::Redeploy => 540,
            MaintenanceType::Preempt => 15,
            _ => 60,
        };
        Duration::from_secs(secs)
    }
}

impl fmt::Display for MaintenanceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maintenance record of a single node, as persisted in its annotations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeMaintenance {
    /// Node name
    pub name: String,
    /// Current pipeline state, `None` when never annotated or unreadable
    pub state: Option<MaintenanceState>,
    /// Disruption type of the current cycle
    pub maintenance_type: MaintenanceType,
    /// Controller instance that cordoned the node
    pub owner: Option<String>,
    /// Platform event id that opened the cycle
    pub event_id: Option<String>,
    /// Whether the node is cordoned, owned by the control plane
    pub unschedulable: bool,
    /// Object version the record was read at
    pub resource_version: Option<String>,
}

impl NodeMaintenance {
    /// Create an unannotated, schedulable record
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: None,
            maintenance_type: MaintenanceType::None,
            owner: None,
            event_id: None,
            unschedulable: false,
            resource_version: None,
        }
    }

    /// Builder-style state setter
    pub fn with_state(mut self, state: MaintenanceState) -> Self {
        self.state = Some(state);
        self
    }

    /// No maintenance cycle is in flight
    pub fn is_idle(&self) -> bool {
        matches!(self.state, None | Some(MaintenanceState::Running))
    }
}

/// Side effect to perform before persisting the next state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    /// Nothing to do besides the write
    None,
    /// Ask the approval gate; proceed only if granted
    RequestApproval,
    /// Mark the node unschedulable
    Cordon,
    /// Evict workload within the given budget
    Drain { grace_period: Duration },
    /// Mark maintenance completed with the gate and re-enable scheduling
    Uncordon,
}

/// Outcome of planning one reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// State to persist once the side effect succeeds
    pub to: Option<MaintenanceState>,
    /// Side effect to perform first
    pub effect: SideEffect,
    /// Requeue even when the step succeeds
    pub requeue: Option<Duration>,
}

impl Step {
    fn hold() -> Self {
        Self {
            to: None,
            effect: SideEffect::None,
            requeue: None,
        }
    }

    fn advance(to: MaintenanceState, effect: SideEffect) -> Self {
        Self {
            to: Some(to),
            effect,
            requeue: None,
        }
    }

    /// Whether this step changes anything at all
    pub fn is_noop(&self) -> bool {
        self.to.is_none() && self.effect == SideEffect::None
    }
}

/// Decide the next step for a node, one pipeline position at a time
pub fn plan(node: &NodeMaintenance) -> Step {
    let Some(state) = node.state else {
        return Step::hold();
    };

    match state {
        MaintenanceState::Scheduled | MaintenanceState::Pending => {
            Step::advance(MaintenanceState::Approved, SideEffect::RequestApproval)
        }
        MaintenanceState::Approved => Step::advance(MaintenanceState::Cordoning, SideEffect::None),
        MaintenanceState::Cordoning => {
            let effect = if node.unschedulable {
                SideEffect::None
            } else {
                SideEffect::Cordon
            };
            Step::advance(MaintenanceState::Cordoned, effect)
        }
        MaintenanceState::Cordoned => Step::advance(MaintenanceState::Draining, SideEffect::None),
        MaintenanceState::Draining => Step::advance(
            MaintenanceState::Drained,
            SideEffect::Drain {
                grace_period: node.maintenance_type.grace_period(),
            },
        ),
        // Approval of the platform event is the completion signal's job
        MaintenanceState::Drained => Step::hold(),
        MaintenanceState::Started => Step {
            requeue: Some(STARTED_REQUEUE),
            ..Step::hold()
        },
        MaintenanceState::Running => {
            if node.unschedulable {
                Step {
                    effect: SideEffect::Uncordon,
                    ..Step::hold()
                }
            } else {
                Step::hold()
            }
        }
    }
}
