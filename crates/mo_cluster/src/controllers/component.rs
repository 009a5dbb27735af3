//! The contract every component reconciler implements and the driver that syncs it.

use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Container, PodTemplateSpec, Service, ServicePort};
use kube::ResourceExt;
use tracing::{debug, info};

use crate::api::v1alpha1::{ComponentKind, ComponentPhase, ComponentStatus, SharedStorageProvider};
use crate::config::{DefaultArgs, OperatorConfig};
use crate::controllers::common::{INSTANCE_LABEL, MANAGED_HASH_ANNOTATION};
use crate::store::{ResourceStore, StoreObject};
use crate::util::errors::Result;
use crate::util::hash::content_hash;

/// What the log service exposes to the components that depend on it.
#[derive(Clone, Debug, PartialEq)]
pub struct DependencySnapshot {
    pub discovery: Option<String>,
    pub hakeeper_addresses: Vec<String>,
    pub shared_storage: SharedStorageProvider,
}

/// Inputs shared by every component build in one pass.
pub struct BuildContext<'a> {
    pub deps: &'a DependencySnapshot,
    pub default_args: &'a DefaultArgs,
    pub config: &'a OperatorConfig,
}

pub enum Workload {
    StatefulSet(Box<StatefulSet>),
    Deployment(Box<Deployment>),
}

/// Desired children of one component instance.
pub struct Desired {
    pub config_map: Option<ConfigMap>,
    pub services: Vec<Service>,
    pub workload: Workload,
}

pub trait Component {
    fn kind(&self) -> ComponentKind;

    /// Name of the workload, other objects derive theirs from it.
    fn name(&self) -> String;

    /// Value of the instance label.
    fn instance(&self) -> String;

    fn replicas(&self) -> i32;

    fn validate(&self) -> Result<()>;

    fn build(&self, ctx: &BuildContext<'_>) -> Result<Desired>;
}

/// Result of reconciling one component.
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    pub status: ComponentStatus,
    /// Whether desired objects were written this pass. False while waiting on a dependency.
    pub synced: bool,
}

pub const WAITING_FOR_DISCOVERY: &str = "waiting for the log service discovery address";

/// Validates, builds and syncs a component, then derives its phase from the live workload.
pub async fn reconcile_component<S, C>(
    store: &S,
    component: &C,
    ctx: &BuildContext<'_>,
    previous: Option<&ComponentStatus>,
) -> Result<Outcome>
where
    S: ResourceStore,
    C: Component + ?Sized,
{
    component.validate()?;
    let replicas = component.replicas();

    if component.kind().needs_discovery() && ctx.deps.discovery.is_none() {
        info!("{} '{}' waits for discovery", component.kind(), component.name());
        return Ok(Outcome {
            status: ComponentStatus {
                phase: ComponentPhase::Reconciling,
                replicas,
                ready_replicas: 0,
                message: Some(WAITING_FOR_DISCOVERY.to_string()),
            },
            synced: false,
        });
    }

    let desired = component.build(ctx)?;
    if let Some(cm) = &desired.config_map {
        sync_object(store, cm).await?;
    }
    for svc in &desired.services {
        sync_object(store, svc).await?;
    }
    let ready_replicas = match &desired.workload {
        Workload::StatefulSet(sts) => sync_object(store, sts.as_ref())
            .await?
            .status
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0),
        Workload::Deployment(deployment) => sync_object(store, deployment.as_ref())
            .await?
            .status
            .and_then(|s| s.ready_replicas)
            .unwrap_or(0),
    };

    let phase = next_phase(previous.map(|p| p.phase), ready_replicas, replicas);
    Ok(Outcome {
        status: ComponentStatus {
            phase,
            replicas,
            ready_replicas,
            message: None,
        },
        synced: true,
    })
}

/// Ready once every replica is ready. A component that was ready and lost replicas is
/// degraded, one that never got there is still reconciling.
pub fn next_phase(previous: Option<ComponentPhase>, ready: i32, desired: i32) -> ComponentPhase {
    if ready >= desired {
        ComponentPhase::Ready
    } else if matches!(previous, Some(ComponentPhase::Ready | ComponentPhase::Degraded)) {
        ComponentPhase::Degraded
    } else {
        ComponentPhase::Reconciling
    }
}

/// Fields the operator owns on a child object. Anything else may be defaulted or edited by
/// other controllers and is left alone.
pub trait ManagedFields {
    /// Whether `self`, as read back from the store, differs from `desired` in a managed field.
    fn drifted(&self, desired: &Self) -> bool;
}

impl ManagedFields for ConfigMap {
    fn drifted(&self, desired: &Self) -> bool {
        self.data != desired.data || self.binary_data != desired.binary_data
    }
}

fn ports_drifted(existing: Option<&Vec<ServicePort>>, desired: Option<&Vec<ServicePort>>) -> bool {
    let existing = existing.map(Vec::as_slice).unwrap_or_default();
    let desired = desired.map(Vec::as_slice).unwrap_or_default();
    existing.len() != desired.len()
        || existing.iter().zip(desired).any(|(e, d)| {
            e.name != d.name
                || e.port != d.port
                || (d.target_port.is_some() && e.target_port != d.target_port)
        })
}

impl ManagedFields for Service {
    fn drifted(&self, desired: &Self) -> bool {
        let (Some(existing), Some(desired)) = (self.spec.as_ref(), desired.spec.as_ref()) else {
            return self.spec.is_none() != desired.spec.is_none();
        };
        existing.selector != desired.selector
            || (desired.cluster_ip.is_some() && existing.cluster_ip != desired.cluster_ip)
            || (desired.type_.is_some() && existing.type_ != desired.type_)
            || existing.publish_not_ready_addresses.unwrap_or_default()
                != desired.publish_not_ready_addresses.unwrap_or_default()
            || ports_drifted(existing.ports.as_ref(), desired.ports.as_ref())
    }
}

fn container_drifted(existing: &Container, desired: &Container) -> bool {
    existing.name != desired.name
        || existing.image != desired.image
        || existing.command != desired.command
        || existing.args != desired.args
        || existing.env != desired.env
        || existing.volume_mounts != desired.volume_mounts
}

/// Compares the labels and annotations the operator sets plus every container it declares.
fn template_drifted(existing: &PodTemplateSpec, desired: &PodTemplateSpec) -> bool {
    let subset = |live: Option<&BTreeMap<String, String>>, want: Option<&BTreeMap<String, String>>| {
        want.into_iter()
            .flatten()
            .any(|(k, v)| live.and_then(|l| l.get(k)) != Some(v))
    };
    let (live_meta, want_meta) = (existing.metadata.as_ref(), desired.metadata.as_ref());
    if subset(
        live_meta.and_then(|m| m.labels.as_ref()),
        want_meta.and_then(|m| m.labels.as_ref()),
    ) || subset(
        live_meta.and_then(|m| m.annotations.as_ref()),
        want_meta.and_then(|m| m.annotations.as_ref()),
    ) {
        return true;
    }
    let (Some(existing), Some(desired)) = (existing.spec.as_ref(), desired.spec.as_ref()) else {
        return existing.spec.is_none() != desired.spec.is_none();
    };
    existing.containers.len() != desired.containers.len()
        || existing
            .containers
            .iter()
            .zip(&desired.containers)
            .any(|(e, d)| container_drifted(e, d))
}

impl ManagedFields for StatefulSet {
    fn drifted(&self, desired: &Self) -> bool {
        let (Some(existing), Some(desired)) = (self.spec.as_ref(), desired.spec.as_ref()) else {
            return self.spec.is_none() != desired.spec.is_none();
        };
        existing.replicas != desired.replicas
            || existing.service_name != desired.service_name
            || template_drifted(&existing.template, &desired.template)
    }
}

impl ManagedFields for Deployment {
    fn drifted(&self, desired: &Self) -> bool {
        let (Some(existing), Some(desired)) = (self.spec.as_ref(), desired.spec.as_ref()) else {
            return self.spec.is_none() != desired.spec.is_none();
        };
        existing.replicas != desired.replicas || template_drifted(&existing.template, &desired.template)
    }
}

/// Creates the object when absent. Applies it when its managed hash changed or when a managed
/// field of the live object no longer matches. Returns the live object.
pub async fn sync_object<S, K>(store: &S, desired: &K) -> Result<K>
where
    S: ResourceStore,
    K: StoreObject + ManagedFields,
{
    let hash = content_hash(desired)?;
    let mut desired = desired.clone();
    desired
        .annotations_mut()
        .insert(MANAGED_HASH_ANNOTATION.to_string(), hash.clone());

    let name = desired.name_any();
    let namespace = desired.namespace();
    match store.get::<K>(namespace.as_deref(), &name).await? {
        None => {
            info!("Creating {} '{}'", K::kind(&()), name);
            store.create(&desired).await
        }
        Some(existing)
            if existing.annotations().get(MANAGED_HASH_ANNOTATION) == Some(&hash)
                && !existing.drifted(&desired) =>
        {
            debug!("{} '{}' is up to date", K::kind(&()), name);
            Ok(existing)
        }
        Some(existing) => {
            if existing.annotations().get(MANAGED_HASH_ANNOTATION) == Some(&hash) {
                info!("Reverting drift on {} '{}'", K::kind(&()), name);
            } else {
                info!("Updating {} '{}'", K::kind(&()), name);
            }
            store.apply(&desired).await
        }
    }
}

/// Deletes every object of kind `K` carrying `labels` whose instance label is not in `keep`.
pub async fn delete_orphans<S, K>(
    store: &S,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    keep: &BTreeSet<String>,
) -> Result<usize>
where
    S: ResourceStore,
    K: StoreObject,
{
    let mut deleted = 0;
    for obj in store.list::<K>(Some(namespace), labels).await? {
        if obj.labels().get(INSTANCE_LABEL).is_some_and(|i| keep.contains(i)) {
            continue;
        }
        info!("Deleting orphaned {} '{}'", K::kind(&()), obj.name_any());
        store.delete::<K>(Some(namespace), &obj.name_any()).await?;
        deleted += 1;
    }
    Ok(deleted)
}
