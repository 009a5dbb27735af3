use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{Condition, Time};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{conditions_schema, ComputeNodeGroup, DataNodeSpec, LogServiceSpec, ProxySpec, WebUISpec};
use crate::util::errors::{Error, Result};
use crate::util::status::ConditionalStatus;

pub static MATRIXONE_CLUSTER_FINALIZER: &str = "matrixonecluster.core.matrixorigin.io";

/// Generate the Kubernetes wrapper struct `MatrixOneCluster` from our Spec and Status struct
///
/// This provides a hook for generating the CRD yaml (in crdgen)
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(kind = "MatrixOneCluster", group = "core.matrixorigin.io", version = "v1alpha1", namespaced)]
#[kube(status = "MatrixOneClusterStatus", shortname = "mo")]
#[kube(printcolumn = r#"{"name":"Log", "type":"string", "jsonPath":".status.readable.log"}"#)]
#[kube(printcolumn = r#"{"name":"DN", "type":"string", "jsonPath":".status.readable.dn"}"#)]
#[kube(printcolumn = r#"{"name":"CN", "type":"string", "jsonPath":".status.readable.cn"}"#)]
#[kube(printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#)]
#[serde(rename_all = "camelCase")]
pub struct MatrixOneClusterSpec {
    pub log_service: LogServiceSpec,
    pub dn: DataNodeSpec,
    #[serde(default)]
    pub cn_groups: Vec<ComputeNodeGroup>,
    pub proxy: Option<ProxySpec>,
    pub webui: Option<WebUISpec>,

    /// Image tag used by components that do not set an image.
    pub version: String,
    pub image_repository: String,
    pub image_pull_policy: Option<String>,
    pub node_selector: Option<BTreeMap<String, String>>,
    pub topology_spread: Option<Vec<String>>,
}

impl MatrixOneClusterSpec {
    /// Cluster-wide invariants. Component-level checks live with each component.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for group in &self.cn_groups {
            if group.name.is_empty() {
                return Err(Error::validation("compute node group name must not be empty"));
            }
            if !seen.insert(group.name.as_str()) {
                return Err(Error::validation(format!(
                    "duplicate compute node group name '{}'",
                    group.name
                )));
            }
        }
        Ok(())
    }

    /// The image for a component, falling back to the cluster repository and version.
    pub fn image_for(&self, image: Option<&String>) -> String {
        match image {
            Some(image) if !image.is_empty() => image.clone(),
            _ => format!("{}:{}", self.image_repository, self.version),
        }
    }
}

/// Lifecycle of a single component as seen from the cluster status.
///
/// Variants are ordered by severity, the cluster phase is the most severe component phase.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, JsonSchema)]
pub enum ComponentPhase {
    Ready,
    #[default]
    Pending,
    Reconciling,
    Degraded,
    Failed,
}

impl fmt::Display for ComponentPhase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ComponentPhase::Ready => write!(f, "Ready"),
            ComponentPhase::Pending => write!(f, "Pending"),
            ComponentPhase::Reconciling => write!(f, "Reconciling"),
            ComponentPhase::Degraded => write!(f, "Degraded"),
            ComponentPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// The status object of `MatrixOneCluster`
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatrixOneClusterStatus {
    #[serde(default)]
    #[schemars(schema_with = "conditions_schema")]
    pub conditions: Vec<Condition>,
    pub phase: Option<String>,
    pub log_service: Option<LogServiceStatus>,
    pub dn: Option<ComponentStatus>,
    #[serde(default)]
    pub cn_groups: BTreeMap<String, ComponentStatus>,
    pub cn_group_status: Option<CNGroupStatus>,
    pub proxy: Option<ComponentStatus>,
    pub webui: Option<ComponentStatus>,
    pub readable: Option<ReadableStatus>,
}

impl ConditionalStatus for MatrixOneClusterStatus {
    fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self.conditions
    }
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    #[serde(default)]
    pub phase: ComponentPhase,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub ready_replicas: i32,
    pub message: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogServiceStatus {
    #[serde(flatten)]
    pub component: ComponentStatus,
    /// HAKeeper discovery address, published once a quorum of stores is ready.
    pub discovery: Option<String>,
    #[serde(default)]
    pub failover: FailoverStatus,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailoverStatus {
    #[serde(default)]
    pub failed_stores: Vec<FailedStore>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FailedStore {
    pub store_id: String,
    /// When the store was last seen transitioning to failed.
    pub last_transition_time: Time,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CNGroupStatus {
    pub desired_groups: i32,
    pub ready_groups: i32,
    pub synced_groups: i32,
}

/// `ready/desired` summaries printed by kubectl.
#[derive(Deserialize, Serialize, Clone, Default, Debug, PartialEq, JsonSchema)]
pub struct ReadableStatus {
    pub log: Option<String>,
    pub dn: Option<String>,
    pub cn: Option<String>,
}
