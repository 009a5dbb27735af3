use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, Container, EnvFromSource, EnvVar, HostAlias, Lifecycle, LocalObjectReference,
    PersistentVolumeClaim, PodDNSConfig, PodSecurityContext, Probe, Toleration,
    TopologySpreadConstraint, Volume as PodVolume, VolumeMount,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A sparse patch over the pod template generated for a component.
///
/// Unset fields leave the generated value alone. See [`crate::overlay`] for the merge rules.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Overlay {
    pub main_container: Option<MainContainerOverlay>,

    pub volumes: Option<Vec<PodVolume>>,
    /// Appended to the generated volume claim templates.
    pub volume_claims: Option<Vec<PersistentVolumeClaim>>,
    pub init_containers: Option<Vec<Container>>,
    /// Replace every container except the main one.
    pub sidecar_containers: Option<Vec<Container>>,

    pub service_account_name: Option<String>,
    pub security_context: Option<PodSecurityContext>,
    pub image_pull_secrets: Option<Vec<LocalObjectReference>>,
    pub affinity: Option<Affinity>,
    pub tolerations: Option<Vec<Toleration>>,
    pub priority_class_name: Option<String>,
    pub termination_grace_period_seconds: Option<i64>,
    pub host_aliases: Option<Vec<HostAlias>>,
    pub topology_spread_constraints: Option<Vec<TopologySpreadConstraint>>,
    pub runtime_class_name: Option<String>,
    pub dns_config: Option<PodDNSConfig>,

    pub pod_labels: Option<BTreeMap<String, String>>,
    pub pod_annotations: Option<BTreeMap<String, String>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MainContainerOverlay {
    pub image_pull_policy: Option<String>,
    pub command: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
    pub env_from: Option<Vec<EnvFromSource>>,
    pub env: Option<Vec<EnvVar>>,
    pub readiness_probe: Option<Probe>,
    pub liveness_probe: Option<Probe>,
    pub lifecycle: Option<Lifecycle>,
    pub volume_mounts: Option<Vec<VolumeMount>>,
}
