//! Cloud instance metadata access
//!
//! Resolves this node's instance name, lists scheduled platform events
//! and approves them once the node is drained.

mod client;
mod mock;
mod types;

pub use client::{ImdsClient, DEFAULT_ENDPOINT};
pub use mock::MockMetadata;
pub use types::{actionable, ScheduledEvent, ScheduledEventList, StartRequest, StartRequests};

use async_trait::async_trait;

use crate::error::Result;

/// Trait for the instance metadata service
#[async_trait]
pub trait MetadataService: Send + Sync {
    /// Name of the virtual machine this process runs on
    async fn current_instance_id(&self) -> Result<String>;

    /// All events currently published by the platform
    async fn list_scheduled_events(&self) -> Result<Vec<ScheduledEvent>>;

    /// Let the platform start the given event now
    async fn approve(&self, event_id: &str) -> Result<()>;
}
