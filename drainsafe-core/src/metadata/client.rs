//! HTTP client for the instance metadata service
//!
//! No retries happen here; callers own the retry policy.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use tracing::{debug, warn};

use super::types::{ScheduledEvent, ScheduledEventList, StartRequests};
use super::MetadataService;
use crate::error::{MaintenanceError, Result};

/// Link-local metadata endpoint
pub const DEFAULT_ENDPOINT: &str = "http://169.254.169.254/metadata";

const COMPUTE_API_VERSION: &str = "2019-06-01";
const EVENTS_API_VERSION: &str = "2019-08-01";

/// Metadata service client over HTTP
#[derive(Debug, Clone)]
pub struct ImdsClient {
    http: Client,
    endpoint: String,
    timeout: Duration,
}

impl ImdsClient {
    /// Create a client for the given endpoint
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    /// Attach the opt-in header and timeout, send, and reject non-2xx
    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response> {
        let response = request
            .header("Metadata", "true")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Metadata request failed");
                MaintenanceError::transport(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(MaintenanceError::Transport(format!(
                "received non success status code {}",
                status.as_u16()
            )));
        }
        Ok(response)
    }
}

impl Default for ImdsClient {
    fn default() -> Self {
        Self::new(DEFAULT_ENDPOINT, Duration::from_secs(10))
    }
}

#[async_trait]
impl MetadataService for ImdsClient {
    async fn current_instance_id(&self) -> Result<String> {
        let request = self
            .http
            .get(self.url("/instance/compute/name"))
            .query(&[("api-version", COMPUTE_API_VERSION), ("format", "text")]);

        let body = self
            .send(request)
            .await?
            .text()
            .await
            .map_err(MaintenanceError::transport)?;

        let instance_id = body.trim().to_string();
        debug!(instance = %instance_id, "Resolved instance name");
        Ok(instance_id)
    }

    async fn list_scheduled_events(&self) -> Result<Vec<ScheduledEvent>> {
        let request = self
            .http
            .get(self.url("/scheduledevents"))
            .query(&[("api-version", EVENTS_API_VERSION)]);

        let body = self
            .send(request)
            .await?
            .text()
            .await
            .map_err(MaintenanceError::transport)?;

        let list: ScheduledEventList = serde_json::from_str(&body).map_err(|e| {
            warn!(error = %e, "Failed to parse scheduled events document");
            MaintenanceError::Transport(format!("malformed scheduled events document: {}", e))
        })?;

        debug!(
            incarnation = list.document_incarnation,
            events = list.events.len(),
            "Fetched scheduled events"
        );
        Ok(list.events)
    }

    async fn approve(&self, event_id: &str) -> Result<()> {
        let request = self
            .http
            .post(self.url("/scheduledevents"))
            .query(&[("api-version", EVENTS_API_VERSION)])
            .json(&StartRequests::single(event_id));

        self.send(request).await?;
        debug!(event_id = event_id, "Scheduled event approved");
        Ok(())
    }
}
