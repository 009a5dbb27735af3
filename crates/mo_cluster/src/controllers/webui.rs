use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;

use crate::api::v1alpha1::{ComponentKind, MatrixOneCluster, WebUISpec};
use crate::controllers::common::*;
use crate::controllers::component::{BuildContext, Component, Desired, Workload};
use crate::overlay::{self, MAIN_CONTAINER};
use crate::util::errors::{Error, Result};

/// Stateless dashboard. Runs as a Deployment and needs no configuration document.
pub struct WebUI<'a> {
    pub cluster: &'a MatrixOneCluster,
    pub spec: &'a WebUISpec,
}

impl<'a> WebUI<'a> {
    pub fn new(cluster: &'a MatrixOneCluster, spec: &'a WebUISpec) -> Self {
        Self { cluster, spec }
    }
}

impl Component for WebUI<'_> {
    fn kind(&self) -> ComponentKind {
        ComponentKind::WebUI
    }

    fn name(&self) -> String {
        format!("{}-{}", self.cluster.name_any(), self.kind().as_str())
    }

    fn instance(&self) -> String {
        self.kind().as_str().to_string()
    }

    fn replicas(&self) -> i32 {
        self.spec.replicas
    }

    fn validate(&self) -> Result<()> {
        if self.spec.replicas < 0 {
            return Err(Error::validation("webui.replicas must not be negative"));
        }
        Ok(())
    }

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Desired> {
        let name = self.name();
        let instance = self.instance();
        let labels = object_labels(self.cluster, self.kind(), &instance);
        let selector = selector_labels(self.cluster, self.kind(), &instance);
        let ports = [("http", WEBUI_PORT)];
        let spec = &self.cluster.spec;
        let overlay = self.spec.overlay.as_ref();

        let mut main = Container {
            name: MAIN_CONTAINER.to_string(),
            image: Some(spec.image_for(self.spec.image.as_ref())),
            image_pull_policy: spec.image_pull_policy.clone(),
            resources: self.spec.resources.clone(),
            ports: Some(container_ports(&ports)),
            ..Default::default()
        };
        overlay::apply_main_container(overlay, &mut main);

        let mut pod_spec = PodSpec {
            containers: vec![main],
            node_selector: spec.node_selector.clone(),
            readiness_gates: readiness_gates(ctx.config),
            ..Default::default()
        };
        overlay::apply_pod_spec(overlay, &mut pod_spec);

        let mut pod_meta = ObjectMeta {
            labels: Some(selector.clone()),
            ..Default::default()
        };
        overlay::apply_pod_meta(overlay, &mut pod_meta);

        let deployment = Deployment {
            metadata: object_meta(self.cluster, &name, &labels),
            spec: Some(DeploymentSpec {
                replicas: Some(self.spec.replicas),
                selector: LabelSelector {
                    match_labels: Some(selector.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(pod_meta),
                    spec: Some(pod_spec),
                },
                ..Default::default()
            }),
            ..Default::default()
        };

        Ok(Desired {
            config_map: None,
            services: vec![client_service(self.cluster, &name, &labels, &selector, &ports)],
            workload: Workload::Deployment(Box::new(deployment)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1alpha1::Overlay;
    use crate::tests::{build_context, cluster};
    use std::collections::BTreeMap;

    #[test]
    fn builds_deployment_with_overlay() {
        let mo = cluster("mo");
        let spec = WebUISpec {
            replicas: 2,
            overlay: Some(Overlay {
                pod_labels: Some(BTreeMap::from([("team".to_string(), "dba".to_string())])),
                ..Default::default()
            }),
            ..Default::default()
        };
        let (deps, args, config) = build_context(None);
        let ctx = BuildContext {
            deps: &deps,
            default_args: &args,
            config: &config,
        };
        let desired = WebUI::new(&mo, &spec).build(&ctx).unwrap();

        assert!(desired.config_map.is_none());
        let Workload::Deployment(deployment) = desired.workload else {
            panic!("web UI runs as a Deployment");
        };
        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(2));
        let labels = spec.template.metadata.unwrap().labels.unwrap();
        assert_eq!(labels["team"], "dba");
        assert_eq!(labels[COMPONENT_LABEL], "webui");
        assert_eq!(
            spec.template.spec.unwrap().containers[0].image.as_deref(),
            Some("matrixorigin/matrixone:1.1.0")
        );
    }
}
