use kube::ResourceExt;
use serde_json::{Map, Value};

use crate::api::v1alpha1::{ComponentKind, ComputeNodeGroup, MatrixOneCluster};
use crate::controllers::common::*;
use crate::controllers::component::{BuildContext, Component, DependencySnapshot, Desired, Workload};
use crate::controllers::fileservice::file_service_config;
use crate::controllers::logservice::set_hakeeper_client;
use crate::controllers::script::{Injection, StartScript};
use crate::util::errors::{Error, Result};
use crate::util::hash::content_hash;

/// One named group of compute nodes.
pub struct ComputeNode<'a> {
    pub cluster: &'a MatrixOneCluster,
    pub group: &'a ComputeNodeGroup,
}

impl<'a> ComputeNode<'a> {
    pub fn new(cluster: &'a MatrixOneCluster, group: &'a ComputeNodeGroup) -> Self {
        Self { cluster, group }
    }

    fn headless_name(&self) -> String {
        format!("{}-headless", self.name())
    }

    fn render_config(&self, deps: &DependencySnapshot) -> Result<String> {
        let set = &self.group.set;
        let mut conf = set.config.clone().unwrap_or_default();
        conf.merge(&file_service_config(&deps.shared_storage, set, set.cache_volume.as_ref()));
        set_hakeeper_client(&mut conf, &deps.hakeeper_addresses, deps.discovery.as_deref());
        conf.set(&["service-type"], self.kind().service_type());
        conf.set(&["cn", "listen-address"], format!("0.0.0.0:{CN_SERVICE_PORT}"));
        conf.set(&["cn", "frontend", "port"], CN_SQL_PORT);
        conf.set(
            &["cn", "lockservice", "listen-address"],
            format!("0.0.0.0:{LOCK_SERVICE_PORT}"),
        );
        if !self.group.labels.is_empty() {
            let labels: Map<String, Value> = self
                .group
                .labels
                .iter()
                .map(|l| (l.key.clone(), Value::from(l.values.clone())))
                .collect();
            conf.set(&["cn", "labels"], Value::Object(labels));
        }
        conf.render()
    }
}

impl Component for ComputeNode<'_> {
    fn kind(&self) -> ComponentKind {
        ComponentKind::ComputeNode
    }

    fn name(&self) -> String {
        format!("{}-{}-{}", self.cluster.name_any(), self.kind().as_str(), self.group.name)
    }

    fn instance(&self) -> String {
        self.group.name.clone()
    }

    fn replicas(&self) -> i32 {
        self.group.set.replicas
    }

    fn validate(&self) -> Result<()> {
        let group = &self.group.name;
        if self.group.set.replicas < 0 {
            return Err(Error::validation(format!(
                "compute node group '{group}': replicas must not be negative"
            )));
        }
        for label in &self.group.labels {
            if label.key.is_empty() {
                return Err(Error::validation(format!(
                    "compute node group '{group}': store label key must not be empty"
                )));
            }
            if label.values.is_empty() || label.values.iter().any(String::is_empty) {
                return Err(Error::validation(format!(
                    "compute node group '{group}': store label '{}' needs non-empty values",
                    label.key
                )));
            }
        }
        Ok(())
    }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Desired> {
        let name = self.name();
        let instance = self.instance();
        let labels = object_labels(self.cluster, self.kind(), &instance);
        let selector = selector_labels(self.cluster, self.kind(), &instance);
        let ports = vec![
            ("sql", CN_SQL_PORT),
            ("service", CN_SERVICE_PORT),
            ("lock", LOCK_SERVICE_PORT),
        ];

        let config = self.render_config(ctx.deps)?;
        let args = ctx
            .default_args
            .service_args(self.kind(), self.group.set.service_args.as_deref());
        let script = StartScript {
            identity: Injection {
                section: "cn",
                keys: vec![("service-address", CN_SERVICE_PORT), ("sql-address", CN_SQL_PORT)],
            },
            extra: vec![Injection {
                section: "cn.lockservice",
                keys: vec![("service-address", LOCK_SERVICE_PORT)],
            }],
            service_args: &args,
        }
        .render();
        let cm_name = format!("{name}-config");
        let config_map = config_map(self.cluster, &cm_name, &labels, config, script);
        let config_hash = content_hash(&config_map.data)?;

        let mut extra_env = Vec::new();
        if self.group.dns_based_identity {
            extra_env.push(env("HOSTNAME_UUID", "y"));
        }
        let statefulset = SetWorkload {
            name: name.clone(),
            headless_service: self.headless_name(),
            labels: labels.clone(),
            selector: selector.clone(),
            set: &self.group.set,
            data_volume: self.group.set.cache_volume.as_ref(),
            ports: ports.clone(),
            env: extra_env,
            config_map: cm_name,
            config_hash,
        }
        .build(self.cluster, ctx);

        Ok(Desired {
            config_map: Some(config_map),
            services: vec![
                headless_service(self.cluster, &self.headless_name(), &labels, &selector, &ports),
                client_service(self.cluster, &name, &labels, &selector, &[("sql", CN_SQL_PORT)]),
            ],
            workload: Workload::StatefulSet(Box::new(statefulset)),
        })
    }
}
