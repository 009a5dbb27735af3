use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ResourceRequirements;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{Overlay, SharedStorageCache, SharedStorageProvider, Volume};
use crate::config::ConfigTree;

/// Fields shared by every replicated database component.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSetSpec {
    pub replicas: i32,
    /// Defaults to `{imageRepository}:{version}` of the cluster.
    pub image: Option<String>,
    pub resources: Option<ResourceRequirements>,
    pub cache_volume: Option<Volume>,
    pub shared_storage_cache: Option<SharedStorageCache>,
    /// Topology keys the replicas are spread evenly across.
    pub topology_spread: Option<Vec<String>>,
    pub node_selector: Option<BTreeMap<String, String>>,
    pub image_pull_policy: Option<String>,
    /// Raw configuration overrides, rendered as TOML.
    pub config: Option<ConfigTree>,
    pub service_args: Option<Vec<String>>,
    pub overlay: Option<Overlay>,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LogServiceSpec {
    #[serde(flatten)]
    pub set: ComponentSetSpec,
    /// Data volume of each log store.
    pub volume: Volume,
    pub shared_storage: SharedStorageProvider,
    /// How long a store may stay down before it is replaced, e.g. `10m`.
    pub store_failure_timeout: Option<String>,
    pub initial_config: Option<InitialConfig>,
}

/// Bootstrap settings of the log service. Only read when the cluster is first created.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InitialConfig {
    pub log_shards: Option<i32>,
    pub dn_shards: Option<i32>,
    /// Defaults to the replica count, capped at 3.
    pub log_shard_replicas: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataNodeSpec {
    #[serde(flatten)]
    pub set: ComponentSetSpec,
    /// Derive the instance uuid from the pod DNS name instead of the ordinal.
    #[serde(default)]
    pub dns_based_identity: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComputeNodeGroup {
    /// Unique within the cluster.
    pub name: String,
    #[serde(flatten)]
    pub set: ComponentSetSpec,
    /// Store labels the group serves, used to route sessions.
    #[serde(default)]
    pub labels: Vec<StoreLabel>,
    #[serde(default)]
    pub dns_based_identity: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct StoreLabel {
    pub key: String,
    pub values: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProxySpec {
    #[serde(flatten)]
    pub set: ComponentSetSpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WebUISpec {
    pub replicas: i32,
    pub image: Option<String>,
    pub resources: Option<ResourceRequirements>,
    pub overlay: Option<Overlay>,
}
