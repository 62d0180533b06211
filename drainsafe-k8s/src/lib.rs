//! Drainsafe Kubernetes Integration
//!
//! Provides the Kubernetes client, annotation-backed node store, node
//! operations, event recording, the repairman approval gate and the node
//! watch loops for Drainsafe.

pub mod client;
pub mod controller;
pub mod events;
pub mod node_ops;
pub mod repairman;
pub mod store;

pub use client::K8sClient;
pub use controller::{run_agent_controller, run_controller};
pub use events::KubeRecorder;
pub use node_ops::{DrainConfig, NodeOperator};
pub use repairman::RepairmanGate;
pub use store::KubeNodeStore;
