use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use serde_json::{json, Value};

use crate::api::v1alpha1::{ComponentKind, LogServiceSpec, MatrixOneCluster};
use crate::config::{parse_duration, ConfigTree, OperatorConfig};
use crate::controllers::common::*;
use crate::controllers::component::{BuildContext, Component, Desired, Workload};
use crate::controllers::fileservice::file_service_config;
use crate::controllers::script::{Injection, StartScript};
use crate::failover::StoreHealth;
use crate::store::ResourceStore;
use crate::util::errors::{Error, Result};
use crate::util::hash::content_hash;

const HAKEEPER_REPLICA_ID_BASE: u64 = 131072;
const MAX_HAKEEPER_REPLICAS: i32 = 3;

pub struct LogService<'a> {
    pub cluster: &'a MatrixOneCluster,
    pub spec: &'a LogServiceSpec,
}

impl<'a> LogService<'a> {
    pub fn new(cluster: &'a MatrixOneCluster) -> Self {
        Self {
            cluster,
            spec: &cluster.spec.log_service,
        }
    }

    fn headless_name(&self) -> String {
        format!("{}-headless", self.name())
    }

    fn discovery_service_name(&self) -> String {
        format!("{}-discovery", self.name())
    }

    /// Address other components use to find the HAKeeper.
    pub fn discovery_address(&self) -> String {
        format!(
            "{}.{}.svc:{}",
            self.discovery_service_name(),
            self.cluster.namespace().unwrap_or_default(),
            LOG_SERVICE_PORT
        )
    }

    fn pod_address(&self, ordinal: i32, port: i32) -> String {
        format!(
            "{}-{}.{}.{}.svc:{}",
            self.name(),
            ordinal,
            self.headless_name(),
            self.cluster.namespace().unwrap_or_default(),
            port
        )
    }

    /// Per-store service addresses of the HAKeeper replicas.
    pub fn hakeeper_addresses(&self) -> Vec<String> {
        (0..self.hakeeper_replicas())
            .map(|i| self.pod_address(i, LOG_SERVICE_PORT))
            .collect()
    }

    fn hakeeper_replicas(&self) -> i32 {
        self.spec
            .initial_config
            .as_ref()
            .and_then(|c| c.log_shard_replicas)
            .unwrap_or_else(|| self.spec.set.replicas.min(MAX_HAKEEPER_REPLICAS))
    }

    /// Number of ready stores needed before discovery is published.
    pub fn quorum(&self) -> i32 {
        self.hakeeper_replicas() / 2 + 1
    }

    /// Failure duration after which a store is replaced.
    pub fn failure_timeout(&self, config: &OperatorConfig) -> Result<Duration> {
        match &self.spec.store_failure_timeout {
            Some(raw) => parse_duration("logService.storeFailureTimeout", raw)
                .map_err(|e| Error::validation(e.to_string())),
            None => Ok(config.store_failure_timeout),
        }
    }

    /// Health of the running stores among the desired replicas. A store is healthy when its pod is ready.
    pub async fn store_health<S: ResourceStore>(&self, store: &S) -> Result<Vec<StoreHealth>> {
        let selector = selector_labels(self.cluster, ComponentKind::LogService, &self.instance());
        let pods: Vec<Pod> = store
            .list(self.cluster.namespace().as_deref(), &selector)
            .await?;
        let pods: BTreeMap<String, Pod> = pods.into_iter().map(|p| (p.name_any(), p)).collect();

        Ok((0..self.spec.set.replicas.max(0))
            .filter_map(|ordinal| {
                let store_id = format!("{}-{}", self.name(), ordinal);
                let healthy = pod_ready(pods.get(&store_id)?);
                Some(StoreHealth { store_id, healthy })
            })
            .collect())
    }

    fn render_config(&self) -> Result<String> {
        let set = &self.spec.set;
        let mut conf = set.config.clone().unwrap_or_default();
        conf.merge(&file_service_config(
            &self.spec.shared_storage,
            set,
            Some(&self.spec.volume),
        ));

        let initial = self.spec.initial_config.clone().unwrap_or_default();
        let members: Vec<Value> = (0..self.hakeeper_replicas())
            .map(|i| json!(format!("{}:{}", HAKEEPER_REPLICA_ID_BASE + i as u64, ordinal_uuid(i))))
            .collect();
        let gossip_seeds: Vec<Value> = (0..set.replicas.max(0))
            .map(|i| json!(self.pod_address(i, LOG_GOSSIP_PORT)))
            .collect();

        conf.set(&["service-type"], ComponentKind::LogService.service_type());
        conf.set(&["data-dir"], format!("{DATA_PATH}/{DATA_DIR}"));
        conf.set(&["logservice", "deployment-id"], 1);
        conf.set(&["logservice", "data-dir"], format!("{DATA_PATH}/{DATA_DIR}/logservice"));
        conf.set(&["logservice", "listen-address"], format!("0.0.0.0:{LOG_SERVICE_PORT}"));
        conf.set(&["logservice", "raft-listen-address"], format!("0.0.0.0:{LOG_RAFT_PORT}"));
        conf.set(&["logservice", "gossip-listen-address"], format!("0.0.0.0:{LOG_GOSSIP_PORT}"));
        conf.set(&["logservice", "gossip-seed-addresses"], gossip_seeds);
        conf.set(&["logservice", "BootstrapConfig", "bootstrap-cluster"], true);
        conf.set(
            &["logservice", "BootstrapConfig", "num-of-log-shards"],
            initial.log_shards.unwrap_or(1),
        );
        conf.set(
            &["logservice", "BootstrapConfig", "num-of-dn-shards"],
            initial.dn_shards.unwrap_or(1),
        );
        conf.set(
            &["logservice", "BootstrapConfig", "num-of-log-shard-replicas"],
            self.hakeeper_replicas(),
        );
        conf.set(&["logservice", "BootstrapConfig", "init-hakeeper-members"], members);
        set_hakeeper_client(&mut conf, &self.hakeeper_addresses(), None);
        conf.render()
    }
}

/// The uuid the start script derives for an ordinal without DNS based identity.
pub fn ordinal_uuid(ordinal: i32) -> String {
    format!("00000000-0000-0000-0000-1{:011x}", ordinal)
}

pub fn pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Points a component at the HAKeeper.
pub fn set_hakeeper_client(conf: &mut ConfigTree, addresses: &[String], discovery: Option<&str>) {
    conf.set(&["hakeeper-client", "service-addresses"], addresses.to_vec());
    if let Some(discovery) = discovery {
        conf.set(&["hakeeper-client", "discovery-address"], discovery);
    }
}

impl Component for LogService<'_> {
    fn kind(&self) -> ComponentKind {
        ComponentKind::LogService
    }

    fn name(&self) -> String {
        format!("{}-{}", self.cluster.name_any(), self.kind().as_str())
    }

    fn instance(&self) -> String {
        self.kind().as_str().to_string()
    }

    fn replicas(&self) -> i32 {
        self.spec.set.replicas
    }

    fn validate(&self) -> Result<()> {
        if self.spec.set.replicas < 0 {
            return Err(Error::validation("logService.replicas must not be negative"));
        }
        if let Some(initial) = &self.spec.initial_config {
            let fields = [
                ("logShards", initial.log_shards),
                ("dnShards", initial.dn_shards),
                ("logShardReplicas", initial.log_shard_replicas),
            ];
            if let Some((field, _)) = fields.iter().find(|(_, v)| v.is_some_and(|v| v <= 0)) {
                return Err(Error::validation(format!(
                    "logService.initialConfig.{field} must be positive"
                )));
            }
        }
        if let Some(raw) = &self.spec.store_failure_timeout {
            parse_duration("logService.storeFailureTimeout", raw)
                .map_err(|e| Error::validation(e.to_string()))?;
        }
        Ok(())
    }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Desired> {
        let name = self.name();
        let instance = self.instance();
        let labels = object_labels(self.cluster, self.kind(), &instance);
        let selector = selector_labels(self.cluster, self.kind(), &instance);
        let ports = vec![
            ("service", LOG_SERVICE_PORT),
            ("raft", LOG_RAFT_PORT),
            ("gossip", LOG_GOSSIP_PORT),
        ];

        let config = self.render_config()?;
        let args = ctx
            .default_args
            .service_args(self.kind(), self.spec.set.service_args.as_deref());
        let script = StartScript {
            identity: Injection {
                section: "logservice",
                keys: vec![
                    ("service-address", LOG_SERVICE_PORT),
                    ("raft-service-address", LOG_RAFT_PORT),
                    ("gossip-service-address", LOG_GOSSIP_PORT),
                ],
            },
            extra: Vec::new(),
            service_args: &args,
        }
        .render();
        let cm_name = format!("{name}-config");
        let config_map = config_map(self.cluster, &cm_name, &labels, config, script);
        let config_hash = content_hash(&config_map.data)?;

        let statefulset = SetWorkload {
            name: name.clone(),
            headless_service: self.headless_name(),
            labels: labels.clone(),
            selector: selector.clone(),
            set: &self.spec.set,
            data_volume: Some(&self.spec.volume),
            ports: ports.clone(),
            env: Vec::new(),
            config_map: cm_name,
            config_hash,
        }
        .build(self.cluster, ctx);

        Ok(Desired {
            config_map: Some(config_map),
            services: vec![
                headless_service(self.cluster, &self.headless_name(), &labels, &selector, &ports),
                client_service(
                    self.cluster,
                    &self.discovery_service_name(),
                    &labels,
                    &selector,
                    &[("service", LOG_SERVICE_PORT)],
                ),
            ],
            workload: Workload::StatefulSet(Box::new(statefulset)),
        })
    }
}
