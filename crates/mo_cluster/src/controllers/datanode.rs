use kube::ResourceExt;

use crate::api::v1alpha1::{ComponentKind, DataNodeSpec, MatrixOneCluster};
use crate::controllers::common::*;
use crate::controllers::component::{BuildContext, Component, Desired, DependencySnapshot, Workload};
use crate::controllers::fileservice::file_service_config;
use crate::controllers::logservice::set_hakeeper_client;
use crate::controllers::script::{Injection, StartScript};
use crate::util::errors::{Error, Result};
use crate::util::hash::content_hash;

pub struct DataNode<'a> {
    pub cluster: &'a MatrixOneCluster,
    pub spec: &'a DataNodeSpec,
}

impl<'a> DataNode<'a> {
    pub fn new(cluster: &'a MatrixOneCluster) -> Self {
        Self {
            cluster,
            spec: &cluster.spec.dn,
        }
    }

    fn headless_name(&self) -> String {
        format!("{}-headless", self.name())
    }

    fn render_config(&self, deps: &DependencySnapshot) -> Result<String> {
        let set = &self.spec.set;
        let mut conf = set.config.clone().unwrap_or_default();
        conf.merge(&file_service_config(&deps.shared_storage, set, set.cache_volume.as_ref()));
        set_hakeeper_client(&mut conf, &deps.hakeeper_addresses, deps.discovery.as_deref());
        conf.set(&["service-type"], self.kind().service_type());
        conf.set(&["dn", "listen-address"], format!("0.0.0.0:{DN_SERVICE_PORT}"));
        conf.set(
            &["dn", "lockservice", "listen-address"],
            format!("0.0.0.0:{LOCK_SERVICE_PORT}"),
        );
        conf.render()
    }
}

impl Component for DataNode<'_> {
    fn kind(&self) -> ComponentKind {
        ComponentKind::DataNode
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
            return Err(Error::validation("dn.replicas must not be negative"));
        }
        Ok(())
    }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Desired> {
        let name = self.name();
        let instance = self.instance();
        let labels = object_labels(self.cluster, self.kind(), &instance);
        let selector = selector_labels(self.cluster, self.kind(), &instance);
        let ports = vec![("service", DN_SERVICE_PORT), ("lock", LOCK_SERVICE_PORT)];

        let config = self.render_config(ctx.deps)?;
        let args = ctx
            .default_args
            .service_args(self.kind(), self.spec.set.service_args.as_deref());
        let script = StartScript {
            identity: Injection {
                section: "dn",
                keys: vec![("service-address", DN_SERVICE_PORT)],
            },
            extra: vec![Injection {
                section: "dn.lockservice",
                keys: vec![("service-address", LOCK_SERVICE_PORT)],
            }],
            service_args: &args,
        }
        .render();
        let cm_name = format!("{name}-config");
        let config_map = config_map(self.cluster, &cm_name, &labels, config, script);
        let config_hash = content_hash(&config_map.data)?;

        let mut extra_env = Vec::new();
        if self.spec.dns_based_identity {
            extra_env.push(env("HOSTNAME_UUID", "y"));
        }
        let statefulset = SetWorkload {
            name: name.clone(),
            headless_service: self.headless_name(),
            labels: labels.clone(),
            selector: selector.clone(),
            set: &self.spec.set,
            data_volume: self.spec.set.cache_volume.as_ref(),
            ports: ports.clone(),
            env: extra_env,
            config_map: cm_name,
            config_hash,
        }
        .build(self.cluster, ctx);

        Ok(Desired {
            config_map: Some(config_map),
            services: vec![headless_service(
                self.cluster,
                &self.headless_name(),
                &labels,
                &selector,
                &ports,
            )],
            workload: Workload::StatefulSet(Box::new(statefulset)),
        })
    }
}
