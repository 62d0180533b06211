//! In-memory metadata service for testing

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{MetadataService, ScheduledEvent};
use crate::error::{MaintenanceError, Result};

/// Mock metadata service
pub struct MockMetadata {
    instance_id: String,
    events: RwLock<Vec<ScheduledEvent>>,
    approved: RwLock<Vec<String>>,
    /// Configurable failure of `list_scheduled_events`
    pub fail_list: AtomicBool,
    /// Configurable failure of `approve`
    pub fail_approve: AtomicBool,
    list_calls: AtomicU32,
}

impl MockMetadata {
    /// Create a mock for the given instance with no events
    ///
    /// An empty `instance_id` makes identity resolution fail.
    pub fn new(instance_id: &str) -> Self {
        Self {
            instance_id: instance_id.to_string(),
            events: RwLock::new(Vec::new()),
            approved: RwLock::new(Vec::new()),
            fail_list: AtomicBool::new(false),
            fail_approve: AtomicBool::new(false),
            list_calls: AtomicU32::new(0),
        }
    }

    /// Publish a scheduled event against this instance
    pub async fn schedule(&self, event_id: &str, event_type: &str) {
        let event = ScheduledEvent {
            event_id: event_id.to_string(),
            event_status: "Scheduled".to_string(),
            event_type: event_type.to_string(),
            resource_type: "VirtualMachine".to_string(),
            resources: vec![self.instance_id.clone()],
            not_before: String::new(),
        };
        self.push(event).await;
    }

    /// Publish an arbitrary event
    pub async fn push(&self, event: ScheduledEvent) {
        self.events.write().await.push(event);
    }

    /// Remove every published event
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }

    pub fn set_fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_approve(&self, fail: bool) {
        self.fail_approve.store(fail, Ordering::SeqCst);
    }

    /// Event ids approved so far, in order
    pub async fn approved(&self) -> Vec<String> {
        self.approved.read().await.clone()
    }

    pub fn list_calls(&self) -> u32 {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataService for MockMetadata {
    async fn current_instance_id(&self) -> Result<String> {
        if self.instance_id.is_empty() {
            return Err(MaintenanceError::Transport(
                "received non success status code 404".to_string(),
            ));
        }
        Ok(self.instance_id.clone())
    }

    async fn list_scheduled_events(&self) -> Result<Vec<ScheduledEvent>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(MaintenanceError::Transport(
                "simulated metadata outage".to_string(),
            ));
        }
        Ok(self.events.read().await.clone())
    }

    async fn approve(&self, event_id: &str) -> Result<()> {
        if self.fail_approve.load(Ordering::SeqCst) {
            return Err(MaintenanceError::Transport(
                "received non success status code 500".to_string(),
            ));
        }
        self.approved.write().await.push(event_id.to_string());
        // Approved events stay listed as Started until the platform is done
        for event in self.events.write().await.iter_mut() {
            if event.event_id == event_id {
                event.event_status = "Started".to_string();
            }
        }
        Ok(())
    }
}
