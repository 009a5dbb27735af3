//! Building blocks shared by the component reconcilers.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, EnvVarSource, ObjectFieldSelector,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PodReadinessGate, PodSpec, PodTemplateSpec,
    SecretKeySelector, Service, ServicePort, ServiceSpec, TopologySpreadConstraint, Volume as PodVolume,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use crate::api::v1alpha1::{
    ComponentKind, ComponentSetSpec, MatrixOneCluster, SharedStorageProvider, Volume,
};
use crate::config::OperatorConfig;
use crate::controllers::component::BuildContext;
use crate::overlay::{self, MAIN_CONTAINER};

pub const CLUSTER_LABEL: &str = "matrixorigin.io/cluster";
pub const COMPONENT_LABEL: &str = "matrixorigin.io/component";
pub const INSTANCE_LABEL: &str = "matrixorigin.io/instance";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "matrixone-operator";

/// Hash of the desired object last written by the operator.
pub const MANAGED_HASH_ANNOTATION: &str = "matrixorigin.io/managed-hash";
/// Hash of the rendered configuration, rolls pods when it changes.
pub const CONFIG_HASH_ANNOTATION: &str = "matrixorigin.io/config-hash";

pub const CONFIG_VOLUME: &str = "config";
pub const CONFIG_PATH: &str = "/etc/matrixone/config";
pub const CONFIG_FILE: &str = "config.toml";
pub const ENTRYPOINT: &str = "start.sh";
pub const DATA_VOLUME: &str = "data";
pub const DATA_PATH: &str = "/var/lib/matrixone";
pub const DATA_DIR: &str = "data";

pub const POD_NAME_ENV: &str = "POD_NAME";
pub const NAMESPACE_ENV: &str = "NAMESPACE";
pub const HEADLESS_SERVICE_ENV: &str = "HEADLESS_SERVICE_NAME";

pub const LOG_SERVICE_PORT: i32 = 32000;
pub const LOG_RAFT_PORT: i32 = 32001;
pub const LOG_GOSSIP_PORT: i32 = 32002;
pub const DN_SERVICE_PORT: i32 = 41010;
pub const CN_SQL_PORT: i32 = 6001;
pub const CN_SERVICE_PORT: i32 = 18000;
pub const LOCK_SERVICE_PORT: i32 = 6003;
pub const PROXY_PORT: i32 = 6009;
pub const WEBUI_PORT: i32 = 8007;

/// Labels selecting the pods of one component instance.
pub fn selector_labels(cluster: &MatrixOneCluster, kind: ComponentKind, instance: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (CLUSTER_LABEL.to_string(), cluster.name_any()),
        (COMPONENT_LABEL.to_string(), kind.as_str().to_string()),
        (INSTANCE_LABEL.to_string(), instance.to_string()),
    ])
}

/// Labels on every generated object of a component instance.
pub fn object_labels(cluster: &MatrixOneCluster, kind: ComponentKind, instance: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(cluster, kind, instance);
    labels.insert(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string());
    labels
}

/// Labels matching everything generated for a component kind, across instances.
pub fn kind_labels(cluster: &MatrixOneCluster, kind: ComponentKind) -> BTreeMap<String, String> {
    BTreeMap::from([
        (CLUSTER_LABEL.to_string(), cluster.name_any()),
        (COMPONENT_LABEL.to_string(), kind.as_str().to_string()),
    ])
}

pub fn object_meta(cluster: &MatrixOneCluster, name: &str, labels: &BTreeMap<String, String>) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: cluster.namespace(),
        labels: Some(labels.clone()),
        owner_references: cluster.controller_owner_ref(&()).map(|oref| vec![oref]),
        ..Default::default()
    }
}

pub fn field_ref_env(name: &str, field_path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: Some("v1".to_string()),
                field_path: field_path.to_string(),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn env(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        ..Default::default()
    }
}

fn secret_env(name: &str, secret: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                key: name.to_string(),
                name: secret.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Credential environment for the shared storage provider.
pub fn storage_env(provider: &SharedStorageProvider) -> Vec<EnvVar> {
    let Some(s3) = provider.s3() else {
        return Vec::new();
    };
    let mut vars = Vec::new();
    if let Some(secret) = &s3.secret_ref {
        vars.push(secret_env("AWS_ACCESS_KEY_ID", &secret.name));
        vars.push(secret_env("AWS_SECRET_ACCESS_KEY", &secret.name));
    }
    if let Some(region) = &s3.region {
        vars.push(env("AWS_REGION", region.clone()));
    }
    vars
}

/// Spreads the pods evenly across each topology key.
pub fn topology_spread(keys: &[String], labels: &BTreeMap<String, String>) -> Option<Vec<TopologySpreadConstraint>> {
    if keys.is_empty() {
        return None;
    }
    Some(
        keys.iter()
            .map(|key| TopologySpreadConstraint {
                max_skew: 1,
                topology_key: key.clone(),
                when_unsatisfiable: "DoNotSchedule".to_string(),
                label_selector: Some(LabelSelector {
                    match_labels: Some(labels.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            })
            .collect(),
    )
}

fn service_ports(ports: &[(&str, i32)]) -> Vec<ServicePort> {
    ports
        .iter()
        .map(|(name, port)| ServicePort {
            name: Some(name.to_string()),
            port: *port,
            target_port: Some(IntOrString::Int(*port)),
            ..Default::default()
        })
        .collect()
}

pub fn container_ports(ports: &[(&str, i32)]) -> Vec<ContainerPort> {
    ports
        .iter()
        .map(|(name, port)| ContainerPort {
            name: Some(name.to_string()),
            container_port: *port,
            ..Default::default()
        })
        .collect()
}

/// Headless service giving every pod a stable DNS name. Not-ready pods are published so
/// peers can find each other while bootstrapping.
pub fn headless_service(
    cluster: &MatrixOneCluster,
    name: &str,
    labels: &BTreeMap<String, String>,
    selector: &BTreeMap<String, String>,
    ports: &[(&str, i32)],
) -> Service {
    Service {
        metadata: object_meta(cluster, name, labels),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            publish_not_ready_addresses: Some(true),
            selector: Some(selector.clone()),
            ports: Some(service_ports(ports)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn client_service(
    cluster: &MatrixOneCluster,
    name: &str,
    labels: &BTreeMap<String, String>,
    selector: &BTreeMap<String, String>,
    ports: &[(&str, i32)],
) -> Service {
    Service {
        metadata: object_meta(cluster, name, labels),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".to_string()),
            selector: Some(selector.clone()),
            ports: Some(service_ports(ports)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn config_map(
    cluster: &MatrixOneCluster,
    name: &str,
    labels: &BTreeMap<String, String>,
    config: String,
    script: String,
) -> ConfigMap {
    ConfigMap {
        metadata: object_meta(cluster, name, labels),
        data: Some(BTreeMap::from([
            (CONFIG_FILE.to_string(), config),
            (ENTRYPOINT.to_string(), script),
        ])),
        ..Default::default()
    }
}

pub fn volume_claim(name: &str, volume: &Volume) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: volume.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([("storage".to_string(), volume.size.clone())])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Readiness gates the operator is configured to add to every pod.
pub fn readiness_gates(config: &OperatorConfig) -> Option<Vec<PodReadinessGate>> {
    if config.readiness_gates.is_empty() {
        return None;
    }
    Some(
        config
            .readiness_gates
            .iter()
            .map(|gate| PodReadinessGate {
                condition_type: gate.clone(),
            })
            .collect(),
    )
}

/// The memory request of a component, if any.
pub fn memory_request(set: &ComponentSetSpec) -> Option<&Quantity> {
    set.resources.as_ref()?.requests.as_ref()?.get("memory")
}

/// Everything a replicated component needs to render its StatefulSet.
pub struct SetWorkload<'a> {
    pub name: String,
    pub headless_service: String,
    pub labels: BTreeMap<String, String>,
    pub selector: BTreeMap<String, String>,
    pub set: &'a ComponentSetSpec,
    /// Data volume mounted at [`DATA_PATH`], when the component keeps local data.
    pub data_volume: Option<&'a Volume>,
    pub ports: Vec<(&'static str, i32)>,
    /// Extra environment of the main container, after the pod identity.
    pub env: Vec<EnvVar>,
    pub config_map: String,
    pub config_hash: String,
}

impl SetWorkload<'_> {
    pub fn build(self, cluster: &MatrixOneCluster, ctx: &BuildContext<'_>) -> StatefulSet {
        let spec = &cluster.spec;
        let set = self.set;

        let mut mounts = vec![VolumeMount {
            name: CONFIG_VOLUME.to_string(),
            mount_path: CONFIG_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        }];
        if self.data_volume.is_some() {
            mounts.push(VolumeMount {
                name: DATA_VOLUME.to_string(),
                mount_path: DATA_PATH.to_string(),
                ..Default::default()
            });
        }

        let mut env_vars = vec![
            field_ref_env(POD_NAME_ENV, "metadata.name"),
            field_ref_env(NAMESPACE_ENV, "metadata.namespace"),
            env(HEADLESS_SERVICE_ENV, self.headless_service.clone()),
        ];
        env_vars.extend(self.env);
        env_vars.extend(storage_env(&ctx.deps.shared_storage));

        let mut main = Container {
            name: MAIN_CONTAINER.to_string(),
            image: Some(spec.image_for(set.image.as_ref())),
            image_pull_policy: set.image_pull_policy.clone().or_else(|| spec.image_pull_policy.clone()),
            resources: set.resources.clone(),
            command: Some(vec!["/bin/sh".to_string(), format!("{CONFIG_PATH}/{ENTRYPOINT}")]),
            ports: Some(container_ports(&self.ports)),
            env: Some(env_vars),
            volume_mounts: Some(mounts),
            ..Default::default()
        };
        overlay::apply_main_container(set.overlay.as_ref(), &mut main);

        let topology_keys = set.topology_spread.as_ref().or(spec.topology_spread.as_ref());

        let mut pod_spec = PodSpec {
            containers: vec![main],
            volumes: Some(vec![PodVolume {
                name: CONFIG_VOLUME.to_string(),
                config_map: Some(ConfigMapVolumeSource {
                    name: self.config_map.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            readiness_gates: readiness_gates(ctx.config),
            node_selector: set.node_selector.clone().or_else(|| spec.node_selector.clone()),
            topology_spread_constraints: topology_keys
                .and_then(|keys| topology_spread(keys, &self.selector)),
            ..Default::default()
        };
        overlay::apply_pod_spec(set.overlay.as_ref(), &mut pod_spec);

        let mut pod_meta = ObjectMeta {
            labels: Some(self.selector.clone()),
            annotations: Some(BTreeMap::from([(
                CONFIG_HASH_ANNOTATION.to_string(),
                self.config_hash.clone(),
            )])),
            ..Default::default()
        };
        overlay::apply_pod_meta(set.overlay.as_ref(), &mut pod_meta);

        let mut claims = Vec::new();
        if let Some(volume) = self.data_volume {
            claims.push(volume_claim(DATA_VOLUME, volume));
        }
        overlay::append_volume_claims(set.overlay.as_ref(), &mut claims);

        StatefulSet {
            metadata: object_meta(cluster, &self.name, &self.labels),
            spec: Some(StatefulSetSpec {
                replicas: Some(set.replicas),
                service_name: Some(self.headless_service.clone()),
                pod_management_policy: Some("Parallel".to_string()),
                selector: LabelSelector {
                    match_labels: Some(self.selector.clone()),
                    ..Default::default()
                },
                template: PodTemplateSpec {
                    metadata: Some(pod_meta),
                    spec: Some(pod_spec),
                },
                volume_claim_templates: (!claims.is_empty()).then_some(claims),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1alpha1::{S3Provider, S3ProviderType};
    use k8s_openapi::api::core::v1::LocalObjectReference;

    #[test]
    fn s3_credentials_come_from_the_secret() {
        let provider = SharedStorageProvider::S3(S3Provider {
            path: "bucket".to_string(),
            provider_type: S3ProviderType::Aws,
            secret_ref: Some(LocalObjectReference {
                name: "aws-creds".to_string(),
            }),
            region: Some("eu-west-1".to_string()),
            ..Default::default()
        });
        let vars = storage_env(&provider);
        let names: Vec<_> = vars.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY", "AWS_REGION"]);
        let secret = vars[0].value_from.as_ref().and_then(|s| s.secret_key_ref.as_ref()).unwrap();
        assert_eq!(secret.name, "aws-creds");
    }

    #[test]
    fn no_topology_keys_no_constraints() {
        assert!(topology_spread(&[], &BTreeMap::new()).is_none());
        let constraints = topology_spread(&["topology.kubernetes.io/zone".to_string()], &BTreeMap::new()).unwrap();
        assert_eq!(constraints[0].max_skew, 1);
    }
}
