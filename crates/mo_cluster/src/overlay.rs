//! Merging user overlays onto generated pod templates.
//!
//! Every function treats a `None` overlay as the identity and only touches fields the overlay
//! sets. Callers apply overlays after all generated defaults are in place.

use k8s_openapi::api::core::v1::{Container, PersistentVolumeClaim, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use crate::api::v1alpha1::Overlay;

/// Name of the container running the database service.
pub const MAIN_CONTAINER: &str = "main";

/// Adds overlay labels and annotations to the pod metadata. Overlay values win.
pub fn apply_pod_meta(overlay: Option<&Overlay>, meta: &mut ObjectMeta) {
    let Some(o) = overlay else {
        return;
    };
    if let Some(labels) = &o.pod_labels {
        meta.labels
            .get_or_insert_with(Default::default)
            .extend(labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    if let Some(annotations) = &o.pod_annotations {
        meta.annotations
            .get_or_insert_with(Default::default)
            .extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
}

pub fn apply_pod_spec(overlay: Option<&Overlay>, pod: &mut PodSpec) {
    let Some(o) = overlay else {
        return;
    };
    if let Some(volumes) = &o.volumes {
        pod.volumes = Some(upsert_by_key(
            pod.volumes.take().unwrap_or_default(),
            volumes,
            |v| v.name.as_str(),
        ));
    }
    if o.affinity.is_some() {
        pod.affinity = o.affinity.clone();
    }
    if let Some(sa) = o.service_account_name.as_ref().filter(|sa| !sa.is_empty()) {
        pod.service_account_name = Some(sa.clone());
    }
    if o.security_context.is_some() {
        pod.security_context = o.security_context.clone();
    }
    if o.image_pull_secrets.is_some() {
        pod.image_pull_secrets = o.image_pull_secrets.clone();
    }
    if o.tolerations.is_some() {
        pod.tolerations = o.tolerations.clone();
    }
    if let Some(pc) = o.priority_class_name.as_ref().filter(|pc| !pc.is_empty()) {
        pod.priority_class_name = Some(pc.clone());
    }
    if o.termination_grace_period_seconds.is_some() {
        pod.termination_grace_period_seconds = o.termination_grace_period_seconds;
    }
    if o.host_aliases.is_some() {
        pod.host_aliases = o.host_aliases.clone();
    }
    if o.topology_spread_constraints.is_some() {
        pod.topology_spread_constraints = o.topology_spread_constraints.clone();
    }
    if o.runtime_class_name.is_some() {
        pod.runtime_class_name = o.runtime_class_name.clone();
    }
    if o.dns_config.is_some() {
        pod.dns_config = o.dns_config.clone();
    }
    if o.init_containers.is_some() {
        pod.init_containers = o.init_containers.clone();
    }
    if let Some(sidecars) = &o.sidecar_containers {
        let main = pod.containers.iter().find(|c| c.name == MAIN_CONTAINER).cloned();
        pod.containers = main.into_iter().chain(sidecars.iter().cloned()).collect();
    }
}

pub fn apply_main_container(overlay: Option<&Overlay>, container: &mut Container) {
    let Some(mc) = overlay.and_then(|o| o.main_container.as_ref()) else {
        return;
    };
    if mc.image_pull_policy.is_some() {
        container.image_pull_policy = mc.image_pull_policy.clone();
    }
    if mc.command.is_some() {
        container.command = mc.command.clone();
    }
    if mc.args.is_some() {
        container.args = mc.args.clone();
    }
    if mc.env_from.is_some() {
        container.env_from = mc.env_from.clone();
    }
    if let Some(env) = &mc.env {
        container.env = Some(upsert_by_key(container.env.take().unwrap_or_default(), env, |e| {
            e.name.as_str()
        }));
    }
    if mc.readiness_probe.is_some() {
        container.readiness_probe = mc.readiness_probe.clone();
    }
    if mc.liveness_probe.is_some() {
        container.liveness_probe = mc.liveness_probe.clone();
    }
    if mc.lifecycle.is_some() {
        container.lifecycle = mc.lifecycle.clone();
    }
    if let Some(mounts) = &mc.volume_mounts {
        container.volume_mounts = Some(upsert_by_key(
            container.volume_mounts.take().unwrap_or_default(),
            mounts,
            |m| m.name.as_str(),
        ));
    }
}

pub fn append_volume_claims(overlay: Option<&Overlay>, claims: &mut Vec<PersistentVolumeClaim>) {
    if let Some(extra) = overlay.and_then(|o| o.volume_claims.as_ref()) {
        claims.extend(extra.iter().cloned());
    }
}

/// Replaces items of `base` whose key matches an item of `overlay` in place and appends the
/// rest of `overlay` in order.
pub fn upsert_by_key<T: Clone>(mut base: Vec<T>, overlay: &[T], key: impl Fn(&T) -> &str) -> Vec<T> {
    for item in overlay {
        match base.iter().position(|b| key(b) == key(item)) {
            Some(i) => base[i] = item.clone(),
            None => base.push(item.clone()),
        }
    }
    base
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1alpha1::MainContainerOverlay;
    use k8s_openapi::api::core::v1::{EmptyDirVolumeSource, EnvVar, Toleration, Volume};
    use std::collections::BTreeMap;

    fn volume(name: &str, medium: Option<&str>) -> Volume {
        Volume {
            name: name.to_string(),
            empty_dir: Some(EmptyDirVolumeSource {
                medium: medium.map(String::from),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn container(name: &str) -> Container {
        Container {
            name: name.to_string(),
            ..Default::default()
        }
    }

    fn generated() -> PodSpec {
        PodSpec {
            containers: vec![container(MAIN_CONTAINER), container("generated-sidecar")],
            volumes: Some(vec![volume("a", None)]),
            service_account_name: Some("default".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn missing_overlay_is_identity() {
        let mut pod = generated();
        apply_pod_spec(None, &mut pod);
        assert_eq!(pod, generated());

        let mut main = container(MAIN_CONTAINER);
        apply_main_container(Some(&Overlay::default()), &mut main);
        assert_eq!(main, container(MAIN_CONTAINER));
    }

    #[test]
    fn volumes_are_upserted_in_order() {
        let overlay = Overlay {
            volumes: Some(vec![volume("a", Some("Memory")), volume("b", None)]),
            ..Default::default()
        };
        let mut pod = generated();
        pod.volumes = Some(vec![volume("a", None), volume("z", None)]);
        apply_pod_spec(Some(&overlay), &mut pod);

        assert_eq!(
            pod.volumes,
            Some(vec![volume("a", Some("Memory")), volume("z", None), volume("b", None)])
        );
    }

    #[test]
    fn unset_fields_keep_generated_values() {
        let overlay = Overlay {
            tolerations: Some(vec![Toleration {
                key: Some("dedicated".to_string()),
                ..Default::default()
            }]),
            service_account_name: Some(String::new()),
            ..Default::default()
        };
        let mut pod = generated();
        apply_pod_spec(Some(&overlay), &mut pod);

        assert_eq!(pod.service_account_name.as_deref(), Some("default"));
        assert_eq!(pod.tolerations.map(|t| t.len()), Some(1));
        assert_eq!(pod.volumes, generated().volumes);
    }

    #[test]
    fn sidecars_replace_everything_but_main() {
        let overlay = Overlay {
            sidecar_containers: Some(vec![container("logger")]),
            ..Default::default()
        };
        let mut pod = generated();
        apply_pod_spec(Some(&overlay), &mut pod);

        let names: Vec<_> = pod.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec![MAIN_CONTAINER, "logger"]);
    }

    #[test]
    fn main_container_env_is_upserted() {
        let env = |name: &str, value: &str| EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            ..Default::default()
        };
        let overlay = Overlay {
            main_container: Some(MainContainerOverlay {
                env: Some(vec![env("GOMEMLIMIT", "4GiB"), env("NAMESPACE", "override")]),
                args: Some(vec!["-debug".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let mut main = Container {
            env: Some(vec![env("POD_NAME", "p"), env("NAMESPACE", "ns")]),
            ..container(MAIN_CONTAINER)
        };
        apply_main_container(Some(&overlay), &mut main);

        assert_eq!(
            main.env,
            Some(vec![env("POD_NAME", "p"), env("NAMESPACE", "override"), env("GOMEMLIMIT", "4GiB")])
        );
        assert_eq!(main.args, Some(vec!["-debug".to_string()]));
    }

    #[test]
    fn pod_meta_overlay_wins() {
        let overlay = Overlay {
            pod_labels: Some(BTreeMap::from([("tier".to_string(), "gold".to_string())])),
            pod_annotations: Some(BTreeMap::from([("a".to_string(), "b".to_string())])),
            ..Default::default()
        };
        let mut meta = ObjectMeta {
            labels: Some(BTreeMap::from([("tier".to_string(), "silver".to_string())])),
            ..Default::default()
        };
        apply_pod_meta(Some(&overlay), &mut meta);

        assert_eq!(meta.labels.unwrap()["tier"], "gold");
        assert_eq!(meta.annotations.unwrap()["a"], "b");
    }

    #[test]
    fn claims_are_appended() {
        let claim = |name: &str| PersistentVolumeClaim {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let overlay = Overlay {
            volume_claims: Some(vec![claim("extra")]),
            ..Default::default()
        };
        let mut claims = vec![claim("data")];
        append_volume_claims(Some(&overlay), &mut claims);
        append_volume_claims(None, &mut claims);
        assert_eq!(claims, vec![claim("data"), claim("extra")]);
    }
}
