//! Approval gate backed by repairman `MaintenanceRequest` objects
//!
//! Each node under maintenance gets one cluster-scoped request. The request
//! is created on first use in state `Pending`; an external policy sets
//! `status.isApproved`, and progress is written back to `spec.state`.

use async_trait::async_trait;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::{Client, CustomResource};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use drainsafe_core::error::{MaintenanceError, Result};
use drainsafe_core::gate::{ApprovalGate, GateState};

/// State of a freshly created request
pub const PENDING: &str = "Pending";

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize)]
#[kube(
    group = "repairman.k8s.io",
    version = "v1",
    kind = "MaintenanceRequest",
    status = "MaintenanceRequestStatus",
    schema = "disabled"
)]
pub struct MaintenanceRequestSpec {
    /// Name of the resource under maintenance
    pub name: String,
    /// Kind of the resource under maintenance
    #[serde(rename = "type")]
    pub kind: String,
    /// Maintenance progress
    pub state: String,
}

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceRequestStatus {
    #[serde(default)]
    pub is_approved: bool,
}

/// Name of the request object for a resource
pub fn request_name(name: &str, kind: &str) -> String {
    format!("{}-{}", kind, name).to_ascii_lowercase()
}

/// [`ApprovalGate`] talking to the repairman API
pub struct RepairmanGate {
    api: Api<MaintenanceRequest>,
}

impl RepairmanGate {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

fn gate_error(err: kube::Error) -> MaintenanceError {
    MaintenanceError::Gate(err.to_string())
}

/// Nodes never put through the gate have no request to close
fn completes_missing_request(state: GateState, err: &kube::Error) -> bool {
    state == GateState::Completed && matches!(err, kube::Error::Api(resp) if resp.code == 404)
}

#[async_trait]
impl ApprovalGate for RepairmanGate {
    async fn is_approved(&self, name: &str, kind: &str) -> Result<bool> {
        let request = request_name(name, kind);
        match self.api.get_opt(&request).await.map_err(gate_error)? {
            Some(existing) => {
                let approved = existing.status.map(|s| s.is_approved).unwrap_or(false);
                debug!(request = %request, approved = approved, "Checked maintenance request");
                Ok(approved)
            }
            None => {
                let created = MaintenanceRequest::new(
                    &request,
                    MaintenanceRequestSpec {
                        name: name.to_string(),
                        kind: kind.to_string(),
                        state: PENDING.to_string(),
                    },
                );
                self.api
                    .create(&PostParams::default(), &created)
                    .await
                    .map_err(gate_error)?;
                info!(request = %request, "Maintenance request created, waiting for approval");
                Ok(false)
            }
        }
    }

    async fn mark(&self, name: &str, kind: &str, state: GateState) -> Result<()> {
        let request = request_name(name, kind);
        let patch = json!({ "spec": { "state": state.to_string() } });
        match self
            .api
            .patch(&request, &PatchParams::default(), &Patch::Merge(&patch))
            .await
        {
            Ok(_) => {
                info!(request = %request, state = %state, "Maintenance request updated");
                Ok(())
            }
            Err(e) if completes_missing_request(state, &e) => {
                debug!(request = %request, "No maintenance request to complete");
                Ok(())
            }
            Err(e) => Err(gate_error(e)),
        }
    }
}
