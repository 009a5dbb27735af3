use kube::ResourceExt;

use crate::api::v1alpha1::{ComponentKind, MatrixOneCluster, ProxySpec};
use crate::controllers::common::*;
use crate::controllers::component::{BuildContext, Component, DependencySnapshot, Desired, Workload};
use crate::controllers::logservice::set_hakeeper_client;
use crate::controllers::script::{Injection, StartScript};
use crate::util::errors::{Error, Result};
use crate::util::hash::content_hash;

/// SQL proxy routing sessions to compute node groups.
pub struct Proxy<'a> {
    pub cluster: &'a MatrixOneCluster,
    pub spec: &'a ProxySpec,
}

impl<'a> Proxy<'a> {
    pub fn new(cluster: &'a MatrixOneCluster, spec: &'a ProxySpec) -> Self {
        Self { cluster, spec }
    }

    fn headless_name(&self) -> String {
        format!("{}-headless", self.name())
    }

    fn render_config(&self, deps: &DependencySnapshot) -> Result<String> {
        let mut conf = self.spec.set.config.clone().unwrap_or_default();
        set_hakeeper_client(&mut conf, &deps.hakeeper_addresses, deps.discovery.as_deref());
        conf.set(&["service-type"], self.kind().service_type());
        conf.set(&["proxy", "listen-address"], format!("0.0.0.0:{PROXY_PORT}"));
        conf.render()
    }
}

impl Component for Proxy<'_> {
    fn kind(&self) -> ComponentKind {
        ComponentKind::Proxy
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
            return Err(Error::validation("proxy.replicas must not be negative"));
        }
        Ok(())
    }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Desired> {
        let name = self.name();
        let instance = self.instance();
        let labels = object_labels(self.cluster, self.kind(), &instance);
        let selector = selector_labels(self.cluster, self.kind(), &instance);
        let ports = vec![("sql", PROXY_PORT)];

        let config = self.render_config(ctx.deps)?;
        let args = ctx
            .default_args
            .service_args(self.kind(), self.spec.set.service_args.as_deref());
        let script = StartScript {
            identity: Injection {
                section: "proxy",
                keys: vec![("service-address", PROXY_PORT)],
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
            data_volume: self.spec.set.cache_volume.as_ref(),
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
                client_service(self.cluster, &name, &labels, &selector, &ports),
            ],
            workload: Workload::StatefulSet(Box::new(statefulset)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::build_context;

    #[test]
    fn proxy_config_has_no_file_services() {
        let mo = crate::tests::cluster("mo");
        let spec = ProxySpec::default();
        let (deps, _, _) = build_context(Some("mo-log-discovery.default.svc:32000"));
        let rendered = Proxy::new(&mo, &spec).render_config(&deps).unwrap();
        let parsed: toml::Value = toml::from_str(&rendered).unwrap();

        assert_eq!(parsed["service-type"].as_str(), Some("PROXY"));
        assert_eq!(parsed["proxy"]["listen-address"].as_str(), Some("0.0.0.0:6009"));
        assert!(parsed.get("fileservice").is_none());
    }
}
