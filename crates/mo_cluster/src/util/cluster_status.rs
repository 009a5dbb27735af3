use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::api::v1alpha1::{ComponentPhase, ComponentStatus, MatrixOneCluster, MatrixOneClusterStatus};
use crate::store::ResourceStore;
use crate::util::errors::Result;
use crate::util::status::new_condition;

// Constants for condition types
pub const CLUSTER_READY_CONDITION: &str = "Ready";
pub const LOG_SERVICE_READY_CONDITION: &str = "LogServiceReady";
pub const DATA_NODE_READY_CONDITION: &str = "DataNodeReady";
pub const COMPUTE_NODES_READY_CONDITION: &str = "ComputeNodesReady";
pub const PROXY_READY_CONDITION: &str = "ProxyReady";
pub const WEBUI_READY_CONDITION: &str = "WebUIReady";
pub const STORE_FAILOVER_CONDITION: &str = "StoreFailover";

// Status reasons for conditions
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StatusReason {
    // Generic reasons
    Ready,
    InProgress,
    Degraded,
    Failed,
    Pending,

    // Cluster-specific reasons
    ComponentsReady,
    ComponentsNotReady,
    ValidationFailed,

    // Failover reasons
    StoresReplaced,
    StoresFailing,
    NoFailedStores,
}

impl fmt::Display for StatusReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StatusReason::Ready => write!(f, "Ready"),
            StatusReason::InProgress => write!(f, "InProgress"),
            StatusReason::Degraded => write!(f, "Degraded"),
            StatusReason::Failed => write!(f, "Failed"),
            StatusReason::Pending => write!(f, "Pending"),
            StatusReason::ComponentsReady => write!(f, "ComponentsReady"),
            StatusReason::ComponentsNotReady => write!(f, "ComponentsNotReady"),
            StatusReason::ValidationFailed => write!(f, "ValidationFailed"),
            StatusReason::StoresReplaced => write!(f, "StoresReplaced"),
            StatusReason::StoresFailing => write!(f, "StoresFailing"),
            StatusReason::NoFailedStores => write!(f, "NoFailedStores"),
        }
    }
}

impl From<ComponentPhase> for StatusReason {
    fn from(phase: ComponentPhase) -> Self {
        match phase {
            ComponentPhase::Ready => StatusReason::Ready,
            ComponentPhase::Pending => StatusReason::Pending,
            ComponentPhase::Reconciling => StatusReason::InProgress,
            ComponentPhase::Degraded => StatusReason::Degraded,
            ComponentPhase::Failed => StatusReason::Failed,
        }
    }
}

/// The most severe phase, `Pending` when there is nothing to aggregate.
pub fn aggregate_phase(phases: impl IntoIterator<Item = ComponentPhase>) -> ComponentPhase {
    phases.into_iter().max().unwrap_or(ComponentPhase::Pending)
}

/// `ready/desired`, as printed by kubectl.
pub fn readable(ready: i32, desired: i32) -> String {
    format!("{ready}/{desired}")
}

/// Readiness condition of a component. Carries the component message when it has one.
pub fn component_condition(
    condition_type: &str,
    status: &ComponentStatus,
    observed_generation: Option<i64>,
) -> Condition {
    let message = status.message.clone().unwrap_or_else(|| {
        format!("{} of {} replicas ready", status.ready_replicas, status.replicas)
    });
    new_condition(
        condition_type,
        status.phase == ComponentPhase::Ready,
        &StatusReason::from(status.phase).to_string(),
        message,
        observed_generation,
    )
}

/// Writes the status of a cluster with one patch, and only when it changed.
pub struct ClusterStatusManager<'a, S> {
    store: &'a S,
    cluster: &'a MatrixOneCluster,
}

impl<'a, S: ResourceStore> ClusterStatusManager<'a, S> {
    pub fn new(store: &'a S, cluster: &'a MatrixOneCluster) -> Self {
        Self { store, cluster }
    }

    /// Returns whether a write happened.
    pub async fn write(&self, status: &MatrixOneClusterStatus) -> Result<bool> {
        let name = self.cluster.name_any();
        if self.cluster.status.as_ref() == Some(status) {
            debug!("Status of cluster {} is unchanged", name);
            return Ok(false);
        }
        self.store
            .patch_status::<MatrixOneCluster>(
                self.cluster.namespace().as_deref(),
                &name,
                serde_json::to_value(status)?,
            )
            .await?;
        info!(
            "Updated cluster {} phase to {}",
            name,
            status.phase.as_deref().unwrap_or_default()
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worst_phase_wins() {
        use ComponentPhase::*;
        assert_eq!(aggregate_phase([Ready, Ready]), Ready);
        assert_eq!(aggregate_phase([Ready, Reconciling, Pending]), Reconciling);
        assert_eq!(aggregate_phase([Degraded, Failed, Ready]), Failed);
        assert_eq!(aggregate_phase([]), Pending);
    }

    #[test]
    fn condition_reports_replicas() {
        let status = ComponentStatus {
            phase: ComponentPhase::Degraded,
            replicas: 3,
            ready_replicas: 2,
            message: None,
        };
        let condition = component_condition(LOG_SERVICE_READY_CONDITION, &status, Some(4));
        assert_eq!(condition.status, "False");
        assert_eq!(condition.reason, "Degraded");
        assert_eq!(condition.message, "2 of 3 replicas ready");
        assert_eq!(readable(2, 3), "2/3");
    }
}
