//! Wire types of the instance metadata scheduled events document
//!
//! ```json
//! {
//!   "DocumentIncarnation": 1,
//!   "Events": [
//!     {
//!       "EventId": "F3E6E2D2-E86A-47F0-AA8E-18918049A2B1",
//!       "EventStatus": "Scheduled",
//!       "EventType": "Reboot",
//!       "ResourceType": "VirtualMachine",
//!       "Resources": ["controlplane_0"],
//!       "NotBefore": "Sun, 30 Jun 2019 16:22:03 GMT"
//!     }
//!   ]
//! }
//! ```

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

use crate::state_machine::MaintenanceType;

/// Event types that take the node away from its workload
const DISRUPTIVE_TYPES: [&str; 5] = ["Reboot", "Redeploy", "Preempt", "Terminate", "Freeze"];

/// A platform-originated notice of upcoming maintenance
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScheduledEvent {
    pub event_id: String,
    pub event_status: String,
    pub event_type: String,
    pub resource_type: String,
    #[serde(default)]
    pub resources: Vec<String>,
    #[serde(default)]
    pub not_before: String,
}

impl ScheduledEvent {
    /// Event is still waiting to start
    pub fn is_scheduled(&self) -> bool {
        self.event_status == "Scheduled"
    }

    /// Event takes the node away from its workload
    pub fn is_disruptive(&self) -> bool {
        DISRUPTIVE_TYPES
            .iter()
            .any(|t| t.eq_ignore_ascii_case(&self.event_type))
    }

    /// Event targets the given virtual machine
    pub fn targets(&self, instance_id: &str) -> bool {
        self.resource_type == "VirtualMachine"
            && self
                .resources
                .iter()
                .any(|r| r.eq_ignore_ascii_case(instance_id))
    }

    /// Scheduled, disruptive and aimed at this instance
    pub fn is_actionable(&self, instance_id: &str) -> bool {
        self.is_scheduled() && self.is_disruptive() && self.targets(instance_id)
    }

    pub fn maintenance_type(&self) -> MaintenanceType {
        MaintenanceType::parse(&self.event_type)
    }

    /// Earliest time the platform acts, if the service sent one
    pub fn not_before(&self) -> Option<DateTime<FixedOffset>> {
        if self.not_before.is_empty() {
            return None;
        }
        DateTime::parse_from_rfc2822(&self.not_before).ok()
    }
}

/// Document returned by `GET /scheduledevents`
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScheduledEventList {
    #[serde(default)]
    pub document_incarnation: i64,
    #[serde(default)]
    pub events: Vec<ScheduledEvent>,
}

/// Body of `POST /scheduledevents`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartRequests {
    pub start_requests: Vec<StartRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StartRequest {
    pub event_id: String,
}

impl StartRequests {
    /// Approve a single event
    pub fn single(event_id: &str) -> Self {
        Self {
            start_requests: vec![StartRequest {
                event_id: event_id.to_string(),
            }],
        }
    }
}

/// Events that require draining the given instance, in document order
pub fn actionable<'a, 'b>(
    events: &'a [ScheduledEvent],
    instance_id: &'b str,
) -> impl Iterator<Item = &'a ScheduledEvent> + 'b
where
    'a: 'b,
{
    events.iter().filter(move |e| e.is_actionable(instance_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "DocumentIncarnation": 1,
        "Events": [
            {
                "EventId": "F3E6E2D2-E86A-47F0-AA8E-18918049A2B1",
                "EventStatus": "Scheduled",
                "EventType": "Reboot",
                "ResourceType": "VirtualMachine",
                "Resources": ["controlplane_0"],
                "NotBefore": "Sun, 30 Jun 2019 16:22:03 GMT"
            }
        ]
    }"#;

    fn event(status: &str, event_type: &str, resource_type: &str) -> ScheduledEvent {
        ScheduledEvent {
            event_id: "evt-1".to_string(),
            event_status: status.to_string(),
            event_type: event_type.to_string(),
            resource_type: resource_type.to_string(),
            resources: vec!["vm_1".to_string()],
            not_before: String::new(),
        }
    }

    #[test]
    fn test_parse_document() {
        let list: ScheduledEventList = serde_json::from_str(DOCUMENT).unwrap();
        assert_eq!(list.document_incarnation, 1);
        assert_eq!(list.events.len(), 1);

        let event = &list.events[0];
        assert_eq!(event.event_id, "F3E6E2D2-E86A-47F0-AA8E-18918049A2B1");
        assert_eq!(event.maintenance_type(), MaintenanceType::Reboot);
        assert!(event.is_actionable("controlplane_0"));
        assert!(event.is_actionable("CONTROLPLANE_0"));
        assert!(!event.is_actionable("dummyinstancename"));
        assert!(event.not_before().is_some());
    }

    #[test]
    fn test_empty_document() {
        let list: ScheduledEventList =
            serde_json::from_str(r#"{"DocumentIncarnation": 3, "Events": []}"#).unwrap();
        assert!(list.events.is_empty());
    }

    #[test]
    fn test_classification() {
        assert!(event("Scheduled", "Freeze", "VirtualMachine").is_actionable("vm_1"));
        assert!(event("Scheduled", "terminate", "VirtualMachine").is_actionable("vm_1"));
        assert!(!event("Started", "Reboot", "VirtualMachine").is_actionable("vm_1"));
        assert!(!event("Scheduled", "Reboot", "AvailabilitySet").is_actionable("vm_1"));
        assert!(!event("Scheduled", "LiveMigrate", "VirtualMachine").is_actionable("vm_1"));
    }

    #[test]
    fn test_start_request_body() {
        let body = serde_json::to_value(StartRequests::single("evt-1")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"StartRequests": [{"EventId": "evt-1"}]})
        );
    }

    #[test]
    fn test_actionable_filter_keeps_order() {
        let mut second = event("Scheduled", "Redeploy", "VirtualMachine");
        second.event_id = "evt-2".to_string();
        let events = vec![
            event("Completed", "Reboot", "VirtualMachine"),
            event("Scheduled", "Preempt", "VirtualMachine"),
            second,
        ];
        let ids: Vec<_> = actionable(&events, "vm_1")
            .map(|e| e.event_type.as_str())
            .collect();
        assert_eq!(ids, vec!["Preempt", "Redeploy"]);
    }

    #[test]
    fn test_actionable_events_outlive_instance_id() {
        let events = vec![event("Scheduled", "Reboot", "VirtualMachine")];
        let found = {
            let instance_id = String::from("vm_1");
            let first = actionable(&events, &instance_id).next();
            first
        };
        assert_eq!(found.map(|e| e.event_type.as_str()), Some("Reboot"));
    }
}
