//! One reconciliation pass over a whole cluster.
//!
//! The log service goes first because everything else depends on its discovery address. The
//! remaining components are reconciled independently against the resulting snapshot, and the
//! cluster status is written once at the end.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Condition;
use kube::ResourceExt;
use tracing::{error, info, warn};

use crate::api::v1alpha1::{
    CNGroupStatus, ComponentKind, ComponentPhase, ComponentStatus, LogServiceStatus, MatrixOneCluster,
    MatrixOneClusterStatus, ReadableStatus,
};
use crate::bucket;
use crate::config::{DefaultArgs, OperatorConfig};
use crate::controllers::common::kind_labels;
use crate::controllers::component::{
    delete_orphans, reconcile_component, BuildContext, Component, DependencySnapshot, Outcome,
};
use crate::controllers::computenode::ComputeNode;
use crate::controllers::datanode::DataNode;
use crate::controllers::logservice::LogService;
use crate::controllers::proxy::Proxy;
use crate::controllers::webui::WebUI;
use crate::failover::FailoverTracker;
use crate::store::ResourceStore;
use crate::util::cluster_status::*;
use crate::util::errors::{Error, Result, StdError};
use crate::util::status::{new_condition, ConditionalStatus};

/// Log service result of one pass.
struct LogOutcome {
    status: LogServiceStatus,
    /// Stores whose pods were deleted this pass.
    replaced: Vec<String>,
    /// Stores currently failing, replaced or not.
    failing: usize,
}

pub struct Orchestrator<'a, S> {
    store: &'a S,
    default_args: &'a DefaultArgs,
    config: &'a OperatorConfig,
}

impl<'a, S: ResourceStore> Orchestrator<'a, S> {
    pub fn new(store: &'a S, default_args: &'a DefaultArgs, config: &'a OperatorConfig) -> Self {
        Self {
            store,
            default_args,
            config,
        }
    }

    /// Drives every component of `cluster` towards its spec and writes the resulting status.
    ///
    /// Transient errors leave the affected component's previous status in place. The first one
    /// is returned after the status write so the caller can retry.
    pub async fn reconcile(&self, cluster: &MatrixOneCluster, now: DateTime<Utc>) -> Result<MatrixOneClusterStatus> {
        let name = cluster.name_any();
        let ns = cluster
            .namespace()
            .ok_or_else(|| Error::StdError(StdError::MetadataMissing("namespace".to_string())))?;
        let generation = cluster.metadata.generation;
        let previous = cluster.status.clone().unwrap_or_default();
        let mut status = previous.clone();
        let status_manager = ClusterStatusManager::new(self.store, cluster);

        if let Err(e) = cluster.spec.validate() {
            warn!("Cluster {}/{} is invalid: {}", ns, name, e);
            status.phase = Some(ComponentPhase::Failed.to_string());
            status.set_condition(new_condition(
                CLUSTER_READY_CONDITION,
                false,
                &StatusReason::ValidationFailed.to_string(),
                e.to_string(),
                generation,
            ));
            status_manager.write(&status).await?;
            return Ok(status);
        }

        let mut transient: Option<Error> = None;
        let log = LogService::new(cluster);

        // log service
        let log_outcome = match self.reconcile_log_service(cluster, &log, previous.log_service.as_ref(), now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let previous_log = previous.log_service.clone().unwrap_or_default();
                let component = settle(
                    Err(e),
                    Some(&previous_log.component),
                    log.replicas(),
                    "log service",
                    &mut transient,
                );
                LogOutcome {
                    failing: previous_log.failover.failed_stores.len(),
                    status: LogServiceStatus {
                        component,
                        ..previous_log
                    },
                    replaced: Vec::new(),
                }
            }
        };

        let discovery = match log_outcome.status.component.phase {
            ComponentPhase::Failed => None,
            _ => log_outcome.status.discovery.clone(),
        };
        let deps = DependencySnapshot {
            discovery,
            hakeeper_addresses: log.hakeeper_addresses(),
            shared_storage: cluster.spec.log_service.shared_storage.clone(),
        };
        let ctx = BuildContext {
            deps: &deps,
            default_args: self.default_args,
            config: self.config,
        };

        // data node
        let dn = DataNode::new(cluster);
        let dn_status = settle(
            reconcile_component(self.store, &dn, &ctx, previous.dn.as_ref())
                .await
                .map(|o| o.status),
            previous.dn.as_ref(),
            dn.replicas(),
            "data node",
            &mut transient,
        );

        // compute node groups
        let mut cn_groups = BTreeMap::new();
        let mut synced_groups = 0;
        for group in &cluster.spec.cn_groups {
            let cn = ComputeNode::new(cluster, group);
            let previous_group = previous.cn_groups.get(&group.name);
            let result = reconcile_component(self.store, &cn, &ctx, previous_group).await;
            if matches!(result, Ok(Outcome { synced: true, .. })) {
                synced_groups += 1;
            }
            let group_status = settle(
                result.map(|o| o.status),
                previous_group,
                cn.replicas(),
                &format!("compute node group {}", group.name),
                &mut transient,
            );
            cn_groups.insert(group.name.clone(), group_status);
        }
        let keep: BTreeSet<String> = cluster.spec.cn_groups.iter().map(|g| g.name.clone()).collect();
        if let Err(e) = self.collect_orphans(cluster, &ns, ComponentKind::ComputeNode, &keep).await {
            note_transient(e, "compute node orphan collection", &mut transient);
        }

        // proxy
        let proxy_status = match &cluster.spec.proxy {
            Some(spec) => {
                let proxy = Proxy::new(cluster, spec);
                Some(settle(
                    reconcile_component(self.store, &proxy, &ctx, previous.proxy.as_ref())
                        .await
                        .map(|o| o.status),
                    previous.proxy.as_ref(),
                    proxy.replicas(),
                    "proxy",
                    &mut transient,
                ))
            }
            None => {
                if let Err(e) = self
                    .collect_orphans(cluster, &ns, ComponentKind::Proxy, &BTreeSet::new())
                    .await
                {
                    note_transient(e, "proxy orphan collection", &mut transient);
                }
                None
            }
        };

        // web ui
        let webui_status = match &cluster.spec.webui {
            Some(spec) => {
                let webui = WebUI::new(cluster, spec);
                Some(settle(
                    reconcile_component(self.store, &webui, &ctx, previous.webui.as_ref())
                        .await
                        .map(|o| o.status),
                    previous.webui.as_ref(),
                    webui.replicas(),
                    "web ui",
                    &mut transient,
                ))
            }
            None => {
                if let Err(e) = self
                    .collect_orphans(cluster, &ns, ComponentKind::WebUI, &BTreeSet::new())
                    .await
                {
                    note_transient(e, "web ui orphan collection", &mut transient);
                }
                None
            }
        };

        // conditions
        let log_status = &log_outcome.status.component;
        status.set_condition(component_condition(LOG_SERVICE_READY_CONDITION, log_status, generation));
        status.set_condition(component_condition(DATA_NODE_READY_CONDITION, &dn_status, generation));
        if cn_groups.is_empty() {
            status.remove_condition(COMPUTE_NODES_READY_CONDITION);
        } else {
            let combined = ComponentStatus {
                phase: aggregate_phase(cn_groups.values().map(|s| s.phase)),
                replicas: cn_groups.values().map(|s| s.replicas).sum(),
                ready_replicas: cn_groups.values().map(|s| s.ready_replicas).sum(),
                message: cn_groups
                    .iter()
                    .find_map(|(group, s)| s.message.as_ref().map(|m| format!("{group}: {m}"))),
            };
            status.set_condition(component_condition(COMPUTE_NODES_READY_CONDITION, &combined, generation));
        }
        match &proxy_status {
            Some(s) => status.set_condition(component_condition(PROXY_READY_CONDITION, s, generation)),
            None => status.remove_condition(PROXY_READY_CONDITION),
        };
        match &webui_status {
            Some(s) => status.set_condition(component_condition(WEBUI_READY_CONDITION, s, generation)),
            None => status.remove_condition(WEBUI_READY_CONDITION),
        };
        status.set_condition(failover_condition(&log_outcome, generation));

        let phase = aggregate_phase(
            [log_status.phase, dn_status.phase]
                .into_iter()
                .chain(cn_groups.values().map(|s| s.phase))
                .chain(proxy_status.iter().map(|s| s.phase))
                .chain(webui_status.iter().map(|s| s.phase)),
        );
        let (reason, message) = if phase == ComponentPhase::Ready {
            (StatusReason::ComponentsReady, "all components are ready".to_string())
        } else {
            (StatusReason::ComponentsNotReady, format!("cluster is {phase}"))
        };
        status.set_condition(new_condition(
            CLUSTER_READY_CONDITION,
            phase == ComponentPhase::Ready,
            &reason.to_string(),
            message,
            generation,
        ));
        status.phase = Some(phase.to_string());

        status.readable = Some(ReadableStatus {
            log: Some(readable(log_status.ready_replicas, log_status.replicas)),
            dn: Some(readable(dn_status.ready_replicas, dn_status.replicas)),
            cn: (!cn_groups.is_empty()).then(|| {
                readable(
                    cn_groups.values().map(|s| s.ready_replicas).sum(),
                    cn_groups.values().map(|s| s.replicas).sum(),
                )
            }),
        });
        status.cn_group_status = Some(CNGroupStatus {
            desired_groups: cn_groups.len() as i32,
            ready_groups: cn_groups
                .values()
                .filter(|s| s.phase == ComponentPhase::Ready)
                .count() as i32,
            synced_groups,
        });
        status.log_service = Some(log_outcome.status);
        status.dn = Some(dn_status);
        status.cn_groups = cn_groups;
        status.proxy = proxy_status;
        status.webui = webui_status;

        status_manager.write(&status).await?;
        match transient {
            Some(e) => Err(e),
            None => Ok(status),
        }
    }

    async fn reconcile_log_service(
        &self,
        cluster: &MatrixOneCluster,
        log: &LogService<'_>,
        previous: Option<&LogServiceStatus>,
        now: DateTime<Utc>,
    ) -> Result<LogOutcome> {
        log.validate()?;
        let ns = cluster.namespace().unwrap_or_default();
        if let Some(s3) = log.spec.shared_storage.s3() {
            bucket::claim(self.store, s3, &owner(cluster)).await?;
        }

        let deps = DependencySnapshot {
            discovery: None,
            hakeeper_addresses: log.hakeeper_addresses(),
            shared_storage: log.spec.shared_storage.clone(),
        };
        let ctx = BuildContext {
            deps: &deps,
            default_args: self.default_args,
            config: self.config,
        };
        let mut component = reconcile_component(self.store, log, &ctx, previous.map(|p| &p.component))
            .await?
            .status;

        // published once a quorum of HAKeeper replicas is up, never withdrawn
        let discovery = previous
            .and_then(|p| p.discovery.clone())
            .or_else(|| (component.ready_replicas >= log.quorum()).then(|| log.discovery_address()));

        let mut tracker = previous
            .map(|p| FailoverTracker::from_status(&p.failover))
            .unwrap_or_default();
        // a store that has not bootstrapped yet is starting, not failing
        let report = match discovery {
            Some(_) => log.store_health(self.store).await?,
            None => Vec::new(),
        };
        tracker.observe(&report, now);
        let threshold = log.failure_timeout(self.config)?;
        let replaced = tracker.failed_for(threshold, now);
        for store_id in &replaced {
            warn!(
                "Store {} of cluster {}/{} failed for over {:?}, replacing it",
                store_id,
                ns,
                cluster.name_any(),
                threshold
            );
            self.store.delete::<Pod>(Some(&ns), store_id).await?;
            tracker.rearm(store_id, now);
        }
        if !replaced.is_empty() {
            component.phase = ComponentPhase::Degraded;
            component.message = Some(format!("replaced failed stores: {}", replaced.join(", ")));
        }

        Ok(LogOutcome {
            failing: tracker.len(),
            status: LogServiceStatus {
                component,
                discovery,
                failover: tracker.to_status(),
            },
            replaced,
        })
    }

    /// Deletes the children of `kind` whose instance is not in `keep`.
    async fn collect_orphans(
        &self,
        cluster: &MatrixOneCluster,
        ns: &str,
        kind: ComponentKind,
        keep: &BTreeSet<String>,
    ) -> Result<usize> {
        let labels = kind_labels(cluster, kind);
        let deleted = delete_orphans::<S, StatefulSet>(self.store, ns, &labels, keep).await?
            + delete_orphans::<S, Deployment>(self.store, ns, &labels, keep).await?
            + delete_orphans::<S, Service>(self.store, ns, &labels, keep).await?
            + delete_orphans::<S, ConfigMap>(self.store, ns, &labels, keep).await?;
        if deleted > 0 {
            info!("Collected {} orphaned {} objects of cluster {}/{}", deleted, kind, ns, cluster.name_any());
        }
        Ok(deleted)
    }

    /// Releases everything the cluster holds outside its own namespace.
    pub async fn cleanup(&self, cluster: &MatrixOneCluster) -> Result<()> {
        if let Some(s3) = cluster.spec.log_service.shared_storage.s3() {
            bucket::release(self.store, s3, &owner(cluster)).await?;
        }
        Ok(())
    }
}

/// Binding recorded on bucket claims.
fn owner(cluster: &MatrixOneCluster) -> String {
    format!("{}/{}", cluster.namespace().unwrap_or_default(), cluster.name_any())
}

/// Turns a component result into the status to record.
fn settle(
    result: Result<ComponentStatus>,
    previous: Option<&ComponentStatus>,
    replicas: i32,
    what: &str,
    transient: &mut Option<Error>,
) -> ComponentStatus {
    match result {
        Ok(status) => status,
        Err(e) if e.is_terminal() => {
            error!("Failed to reconcile {}: {}", what, e);
            ComponentStatus {
                phase: ComponentPhase::Failed,
                replicas,
                ready_replicas: previous.map_or(0, |p| p.ready_replicas),
                message: Some(format!("{}: {}", e.inner().reason(), e)),
            }
        }
        Err(e) => {
            note_transient(e, what, transient);
            previous.cloned().unwrap_or_default()
        }
    }
}

fn note_transient(e: Error, what: &str, transient: &mut Option<Error>) {
    warn!("Transient error reconciling {}: {}", what, e);
    if transient.is_none() {
        *transient = Some(e);
    }
}

fn failover_condition(log: &LogOutcome, generation: Option<i64>) -> Condition {
    if !log.replaced.is_empty() {
        new_condition(
            STORE_FAILOVER_CONDITION,
            true,
            &StatusReason::StoresReplaced.to_string(),
            format!("replaced stores: {}", log.replaced.join(", ")),
            generation,
        )
    } else if log.failing > 0 {
        let ids: Vec<&str> = log
            .status
            .failover
            .failed_stores
            .iter()
            .map(|s| s.store_id.as_str())
            .collect();
        new_condition(
            STORE_FAILOVER_CONDITION,
            false,
            &StatusReason::StoresFailing.to_string(),
            format!("failing stores: {}", ids.join(", ")),
            generation,
        )
    } else {
        new_condition(
            STORE_FAILOVER_CONDITION,
            false,
            &StatusReason::NoFailedStores.to_string(),
            "no failed stores",
            generation,
        )
    }
}
