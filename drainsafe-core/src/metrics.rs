//! Prometheus metrics for Drainsafe

use once_cell::sync::Lazy;
use prometheus::{
    opts, register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};

use crate::state_machine::MaintenanceState;

/// Current pipeline position per node (see `MaintenanceState::ordinal`)
static NODE_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        opts!(
            "drainsafe_node_maintenance_state",
            "Current maintenance state of the node"
        ),
        &["node"]
    )
    .expect("Failed to create node_maintenance_state metric")
});

/// Persisted state transitions
static TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "drainsafe_transitions_total",
            "Total number of persisted maintenance state transitions"
        ),
        &["from", "to"]
    )
    .expect("Failed to create transitions metric")
});

/// Failed side effects
static STEP_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "drainsafe_step_failures_total",
            "Total number of failed maintenance steps"
        ),
        &["step"]
    )
    .expect("Failed to create step_failures metric")
});

/// Side effect duration
static STEP_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "drainsafe_step_duration_seconds",
        "Duration of maintenance side effects",
        &["step"],
        vec![0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 900.0]
    )
    .expect("Failed to create step_duration metric")
});

/// Detector ticks by outcome
static DETECTOR_TICKS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "drainsafe_detector_ticks_total",
            "Total number of scheduled event detector evaluations"
        ),
        &["outcome"]
    )
    .expect("Failed to create detector_ticks metric")
});

/// Scheduled event approvals by result
static APPROVALS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        opts!(
            "drainsafe_event_approvals_total",
            "Total number of scheduled event approval attempts"
        ),
        &["result"]
    )
    .expect("Failed to create event_approvals metric")
});

/// Metrics registry wrapper
pub struct MetricsRegistry;

impl MetricsRegistry {
    /// Create a new metrics registry
    pub fn new() -> Self {
        // Force initialization of lazy statics
        let _ = &*NODE_STATE;
        let _ = &*TRANSITIONS;
        let _ = &*STEP_FAILURES;
        let _ = &*STEP_DURATION;
        let _ = &*DETECTOR_TICKS;
        let _ = &*APPROVALS;
        Self
    }

    /// Set the node's current state
    pub fn set_node_state(&self, node: &str, state: MaintenanceState) {
        NODE_STATE.with_label_values(&[node]).set(state.ordinal());
    }

    /// Count a persisted transition
    pub fn inc_transition(&self, from: Option<MaintenanceState>, to: MaintenanceState) {
        let from = from.map(|s| s.as_str()).unwrap_or("None");
        TRANSITIONS.with_label_values(&[from, to.as_str()]).inc();
    }

    /// Count a failed side effect
    pub fn inc_step_failure(&self, step: &str) {
        STEP_FAILURES.with_label_values(&[step]).inc();
    }

    /// Record side effect duration
    pub fn observe_step_duration(&self, step: &str, duration_secs: f64) {
        STEP_DURATION
            .with_label_values(&[step])
            .observe(duration_secs);
    }

    /// Count a detector evaluation
    pub fn inc_detector_tick(&self, outcome: &str) {
        DETECTOR_TICKS.with_label_values(&[outcome]).inc();
    }

    /// Count an approval attempt
    pub fn inc_approval(&self, success: bool) {
        let result = if success { "success" } else { "failure" };
        APPROVALS.with_label_values(&[result]).inc();
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registry() {
        let registry = MetricsRegistry::new();

        registry.set_node_state("node-0", MaintenanceState::Draining);
        registry.inc_transition(None, MaintenanceState::Scheduled);
        registry.inc_transition(Some(MaintenanceState::Cordoned), MaintenanceState::Draining);
        registry.inc_step_failure("drain");
        registry.observe_step_duration("drain", 12.5);
        registry.inc_detector_tick("scheduled");
        registry.inc_approval(true);

        assert_eq!(
            NODE_STATE.with_label_values(&["node-0"]).get(),
            MaintenanceState::Draining.ordinal()
        );
    }
}
