//! Shared fixtures and end-to-end passes against the in-memory store.

use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};
use kube::api::ObjectMeta;
use serde_json::json;

use crate::api::v1alpha1::{ComponentKind, MatrixOneCluster, MatrixOneClusterSpec};
use crate::config::{DefaultArgs, OperatorConfig};
use crate::controllers::common::selector_labels;
use crate::controllers::component::DependencySnapshot;
use crate::controllers::logservice::LogService;

/// A cluster in `default` with three log stores on a shared file system and one data node.
pub fn cluster(name: &str) -> MatrixOneCluster {
    let spec: MatrixOneClusterSpec = serde_json::from_value(json!({
        "logService": {
            "replicas": 3,
            "volume": {"size": "10Gi"},
            "sharedStorage": {"fileSystem": {"path": "/mnt/shared"}}
        },
        "dn": {"replicas": 1},
        "version": "1.1.0",
        "imageRepository": "matrixorigin/matrixone"
    }))
    .unwrap();
    let mut mo = MatrixOneCluster::new(name, spec);
    mo.metadata.namespace = Some("default".to_string());
    mo
}

pub fn build_context(discovery: Option<&str>) -> (DependencySnapshot, DefaultArgs, OperatorConfig) {
    let mo = cluster("mo");
    let deps = DependencySnapshot {
        discovery: discovery.map(str::to_string),
        hakeeper_addresses: LogService::new(&mo).hakeeper_addresses(),
        shared_storage: mo.spec.log_service.shared_storage.clone(),
    };
    let args = DefaultArgs {
        dn: vec!["-debug-http=:6060".to_string()],
        ..Default::default()
    };
    (deps, args, OperatorConfig::default())
}

/// A log service pod of `cluster` with its Ready condition set to `ready`.
pub fn ready_pod(cluster: &MatrixOneCluster, name: &str, ready: bool) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            labels: Some(selector_labels(
                cluster,
                ComponentKind::LogService,
                ComponentKind::LogService.as_str(),
            )),
            ..Default::default()
        },
        status: Some(PodStatus {
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::v1alpha1::{
        BucketClaim, BucketState, ComponentPhase, ComputeNodeGroup, S3Provider, S3ProviderType,
        SharedStorageProvider, StoreLabel,
    };
    use crate::controllers::component::{reconcile_component, BuildContext, WAITING_FOR_DISCOVERY};
    use crate::controllers::computenode::ComputeNode;
    use crate::controllers::orchestrator::Orchestrator;
    use crate::store::{KubeStore, MemoryStore, ResourceStore};
    use crate::util::cluster_status::{CLUSTER_READY_CONDITION, STORE_FAILOVER_CONDITION};
    use crate::util::errors::{Error, StdError};
    use crate::util::status::find_status_condition;
    use assert_json_diff::assert_json_include;
    use chrono::{DateTime, Duration, Utc};
    use k8s_openapi::api::apps::v1::StatefulSet;
    use k8s_openapi::api::core::v1::{ConfigMap, Service};
    use kube::{Client, ResourceExt};

    fn t0() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    /// Stores the cluster and returns a store holding it.
    fn store_with(clusters: &[&MatrixOneCluster]) -> MemoryStore {
        let store = MemoryStore::new();
        for mo in clusters {
            store.insert(*mo).unwrap();
        }
        store
    }

    async fn fetch(store: &MemoryStore, name: &str) -> MatrixOneCluster {
        store.get(Some("default"), name).await.unwrap().unwrap()
    }

    async fn pass(store: &MemoryStore, name: &str, now: DateTime<Utc>) -> MatrixOneCluster {
        let mo = fetch(store, name).await;
        let args = DefaultArgs::default();
        let config = OperatorConfig::default();
        Orchestrator::new(store, &args, &config)
            .reconcile(&mo, now)
            .await
            .unwrap();
        fetch(store, name).await
    }

    fn log_ready(store: &MemoryStore, name: &str, ready: i32) {
        store
            .set_status::<StatefulSet>(
                Some("default"),
                &format!("{name}-log"),
                json!({"replicas": ready, "readyReplicas": ready}),
            )
            .unwrap();
    }

    fn s3() -> SharedStorageProvider {
        SharedStorageProvider::S3(S3Provider {
            path: "mo-data/prod".to_string(),
            endpoint: Some("http://minio.storage:9000".to_string()),
            provider_type: S3ProviderType::Minio,
            ..Default::default()
        })
    }

    fn group(name: &str) -> ComputeNodeGroup {
        serde_json::from_value(json!({"name": name, "replicas": 2})).unwrap()
    }

    #[tokio::test]
    async fn data_node_waits_for_discovery() {
        let store = store_with(&[&cluster("mo")]);
        let mo = pass(&store, "mo", t0()).await;

        let status = mo.status.unwrap();
        assert_eq!(status.phase.as_deref(), Some("Reconciling"));
        let dn = status.dn.unwrap();
        assert_eq!(dn.phase, ComponentPhase::Reconciling);
        assert_eq!(dn.message.as_deref(), Some(WAITING_FOR_DISCOVERY));
        assert!(status.log_service.unwrap().discovery.is_none());

        let log: Option<StatefulSet> = store.get(Some("default"), "mo-log").await.unwrap();
        assert!(log.is_some());
        let dn: Option<StatefulSet> = store.get(Some("default"), "mo-dn").await.unwrap();
        assert!(dn.is_none());
        let dn_config: Option<ConfigMap> = store.get(Some("default"), "mo-dn-config").await.unwrap();
        assert!(dn_config.is_none());
    }

    #[tokio::test]
    async fn data_node_starts_once_log_service_is_ready() {
        let store = store_with(&[&cluster("mo")]);
        pass(&store, "mo", t0()).await;
        log_ready(&store, "mo", 3);
        let mo = pass(&store, "mo", t0()).await;

        let status = mo.status.unwrap();
        let log = status.log_service.unwrap();
        assert_eq!(log.component.phase, ComponentPhase::Ready);
        assert_eq!(log.discovery.as_deref(), Some("mo-log-discovery.default.svc:32000"));

        let config: ConfigMap = store.get(Some("default"), "mo-dn-config").await.unwrap().unwrap();
        let rendered: toml::Value = toml::from_str(&config.data.unwrap()["config.toml"]).unwrap();
        assert_eq!(
            rendered["hakeeper-client"]["discovery-address"].as_str(),
            Some("mo-log-discovery.default.svc:32000")
        );

        let dn: StatefulSet = store.get(Some("default"), "mo-dn").await.unwrap().unwrap();
        assert_json_include!(
            actual: serde_json::to_value(&dn).unwrap(),
            expected: json!({
                "metadata": {"labels": {"matrixorigin.io/component": "dn"}},
                "spec": {"replicas": 1, "serviceName": "mo-dn-headless"}
            })
        );
        assert_eq!(status.dn.unwrap().phase, ComponentPhase::Reconciling);
        assert_eq!(status.readable.unwrap().log.as_deref(), Some("3/3"));
    }

    #[tokio::test]
    async fn discovery_stays_published_when_the_log_service_degrades() {
        let store = store_with(&[&cluster("mo")]);
        pass(&store, "mo", t0()).await;
        log_ready(&store, "mo", 3);
        pass(&store, "mo", t0()).await;
        log_ready(&store, "mo", 1);
        let mo = pass(&store, "mo", t0()).await;

        let log = mo.status.unwrap().log_service.unwrap();
        assert_eq!(log.component.phase, ComponentPhase::Degraded);
        assert!(log.discovery.is_some());
    }

    #[tokio::test]
    async fn clusters_sharing_a_bucket_share_one_claim() {
        let mut a = cluster("a");
        a.spec.log_service.shared_storage = s3();
        let mut b = cluster("b");
        b.spec.log_service.shared_storage = s3();
        let store = store_with(&[&a, &b]);

        pass(&store, "a", t0()).await;
        pass(&store, "b", t0()).await;

        let claims: Vec<BucketClaim> = store.list(None, &Default::default()).await.unwrap();
        assert_eq!(claims.len(), 1);
        let status = claims[0].status.clone().unwrap();
        assert_eq!(status.bind_to, vec!["default/a", "default/b"]);
        assert_eq!(status.state, Some(BucketState::InUse));

        let args = DefaultArgs::default();
        let config = OperatorConfig::default();
        let orchestrator = Orchestrator::new(&store, &args, &config);
        orchestrator.cleanup(&fetch(&store, "a").await).await.unwrap();
        orchestrator.cleanup(&fetch(&store, "b").await).await.unwrap();
        let claims: Vec<BucketClaim> = store.list(None, &Default::default()).await.unwrap();
        assert_eq!(claims[0].status.as_ref().unwrap().state, Some(BucketState::Released));
    }

    #[tokio::test]
    async fn conflicting_claims_fail_the_log_service() {
        let mut mo = cluster("mo");
        mo.spec.log_service.shared_storage = s3();
        let store = store_with(&[&mo]);
        let s3 = mo.spec.log_service.shared_storage.s3().unwrap().clone();
        let identity = crate::bucket::identity(&s3);
        for suffix in ["x", "y"] {
            let mut claim = BucketClaim::new(
                &format!("bucket-{suffix}"),
                crate::api::v1alpha1::BucketClaimSpec { s3: s3.clone() },
            );
            claim.labels_mut().insert(
                crate::api::v1alpha1::BUCKET_UNIQUE_ID_LABEL.to_string(),
                identity.clone(),
            );
            store.insert(&claim).unwrap();
        }

        let status = pass(&store, "mo", t0()).await.status.unwrap();
        let log = status.log_service.unwrap();
        assert_eq!(log.component.phase, ComponentPhase::Failed);
        assert!(log.component.message.unwrap().starts_with("BucketClaimConflict"));
        assert_eq!(status.phase.as_deref(), Some("Failed"));
        let sts: Option<StatefulSet> = store.get(Some("default"), "mo-log").await.unwrap();
        assert!(sts.is_none());
    }

    #[tokio::test]
    async fn empty_label_key_is_rejected_before_any_write() {
        let mo = cluster("mo");
        let mut tp = group("tp");
        tp.labels = vec![StoreLabel {
            key: String::new(),
            values: vec!["acc1".to_string()],
        }];
        let store = MemoryStore::new();
        let (deps, args, config) = build_context(Some("mo-log-discovery.default.svc:32000"));
        let ctx = BuildContext {
            deps: &deps,
            default_args: &args,
            config: &config,
        };

        let err = reconcile_component(&store, &ComputeNode::new(&mo, &tp), &ctx, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StdError(StdError::ValidationError(_))));
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn invalid_group_fails_alone() {
        let mut mo = cluster("mo");
        let mut bad = group("bad");
        bad.labels = vec![StoreLabel {
            key: String::new(),
            values: vec!["acc1".to_string()],
        }];
        mo.spec.cn_groups = vec![group("tp"), bad];
        let store = store_with(&[&mo]);
        pass(&store, "mo", t0()).await;
        log_ready(&store, "mo", 3);
        let status = pass(&store, "mo", t0()).await.status.unwrap();

        assert_eq!(status.cn_groups["bad"].phase, ComponentPhase::Failed);
        assert_ne!(status.cn_groups["tp"].phase, ComponentPhase::Failed);
        let bad: Option<StatefulSet> = store.get(Some("default"), "mo-cn-bad").await.unwrap();
        assert!(bad.is_none());
        let tp: Option<StatefulSet> = store.get(Some("default"), "mo-cn-tp").await.unwrap();
        assert!(tp.is_some());
        let groups = status.cn_group_status.unwrap();
        assert_eq!((groups.desired_groups, groups.synced_groups), (2, 1));
    }

    #[tokio::test]
    async fn duplicate_group_names_fail_the_cluster() {
        let mut mo = cluster("mo");
        mo.spec.cn_groups = vec![group("tp"), group("tp")];
        let store = store_with(&[&mo]);
        let status = pass(&store, "mo", t0()).await.status.unwrap();

        assert_eq!(status.phase.as_deref(), Some("Failed"));
        let ready = find_status_condition(&status.conditions, CLUSTER_READY_CONDITION).unwrap();
        assert_eq!(ready.reason, "ValidationFailed");
        let log: Option<StatefulSet> = store.get(Some("default"), "mo-log").await.unwrap();
        assert!(log.is_none());
    }

    #[tokio::test]
    async fn unchanged_state_is_not_rewritten() {
        let mut mo = cluster("mo");
        mo.spec.cn_groups = vec![group("tp")];
        let store = store_with(&[&mo]);
        pass(&store, "mo", t0()).await;
        log_ready(&store, "mo", 3);
        pass(&store, "mo", t0()).await;
        pass(&store, "mo", t0()).await;

        let before = store.writes();
        pass(&store, "mo", t0() + Duration::minutes(1)).await;
        assert_eq!(store.writes(), before);
    }

    #[tokio::test]
    async fn long_failed_store_is_replaced() {
        let mo = cluster("mo");
        let store = store_with(&[&mo]);
        store.insert(&ready_pod(&mo, "mo-log-0", true)).unwrap();
        store.insert(&ready_pod(&mo, "mo-log-1", false)).unwrap();
        pass(&store, "mo", t0()).await;
        log_ready(&store, "mo", 2);

        let status = pass(&store, "mo", t0()).await.status.unwrap();
        let failover = find_status_condition(&status.conditions, STORE_FAILOVER_CONDITION).unwrap();
        assert_eq!((failover.status.as_str(), failover.reason.as_str()), ("False", "StoresFailing"));

        // not yet past the threshold
        pass(&store, "mo", t0() + Duration::minutes(5)).await;
        let pod: Option<Pod> = store.get(Some("default"), "mo-log-1").await.unwrap();
        assert!(pod.is_some());

        let later = t0() + Duration::minutes(11);
        let status = pass(&store, "mo", later).await.status.unwrap();
        let pod: Option<Pod> = store.get(Some("default"), "mo-log-1").await.unwrap();
        assert!(pod.is_none());
        let healthy: Option<Pod> = store.get(Some("default"), "mo-log-0").await.unwrap();
        assert!(healthy.is_some());

        let log = status.log_service.unwrap();
        assert_eq!(log.component.phase, ComponentPhase::Degraded);
        assert_eq!(log.failover.failed_stores[0].store_id, "mo-log-1");
        assert_eq!(log.failover.failed_stores[0].last_transition_time.0, later);
        let failover = find_status_condition(&status.conditions, STORE_FAILOVER_CONDITION).unwrap();
        assert_eq!(failover.status, "True");
        assert!(failover.message.contains("mo-log-1"));
    }

    #[tokio::test]
    async fn store_failure_timeout_is_per_cluster() {
        let mut mo = cluster("mo");
        mo.spec.log_service.store_failure_timeout = Some("1m".to_string());
        let store = store_with(&[&mo]);
        store.insert(&ready_pod(&mo, "mo-log-0", true)).unwrap();
        store.insert(&ready_pod(&mo, "mo-log-1", true)).unwrap();
        store.insert(&ready_pod(&mo, "mo-log-2", false)).unwrap();
        pass(&store, "mo", t0()).await;
        log_ready(&store, "mo", 2);

        pass(&store, "mo", t0()).await;
        pass(&store, "mo", t0() + Duration::minutes(2)).await;
        let pod: Option<Pod> = store.get(Some("default"), "mo-log-2").await.unwrap();
        assert!(pod.is_none());
    }

    #[tokio::test]
    async fn bootstrapping_stores_are_not_replaced() {
        let mo = cluster("mo");
        let store = store_with(&[&mo]);
        store.insert(&ready_pod(&mo, "mo-log-0", false)).unwrap();

        pass(&store, "mo", t0()).await;
        let status = pass(&store, "mo", t0() + Duration::minutes(11)).await.status.unwrap();

        let pod: Option<Pod> = store.get(Some("default"), "mo-log-0").await.unwrap();
        assert!(pod.is_some());
        let log = status.log_service.unwrap();
        assert!(log.discovery.is_none());
        assert!(log.failover.failed_stores.is_empty());
        let failover = find_status_condition(&status.conditions, STORE_FAILOVER_CONDITION).unwrap();
        assert_eq!(failover.reason, "NoFailedStores");
    }

    #[tokio::test]
    async fn removed_components_are_collected() {
        let mut mo = cluster("mo");
        mo.spec.cn_groups = vec![group("tp"), group("ap")];
        mo.spec.proxy = Some(serde_json::from_value(json!({"replicas": 1})).unwrap());
        let store = store_with(&[&mo]);
        pass(&store, "mo", t0()).await;
        log_ready(&store, "mo", 3);
        pass(&store, "mo", t0()).await;
        let ap: Option<StatefulSet> = store.get(Some("default"), "mo-cn-ap").await.unwrap();
        assert!(ap.is_some());

        let mut mo = fetch(&store, "mo").await;
        mo.spec.cn_groups.retain(|g| g.name == "tp");
        mo.spec.proxy = None;
        store.insert(&mo).unwrap();
        let status = pass(&store, "mo", t0()).await.status.unwrap();

        let ap: Option<StatefulSet> = store.get(Some("default"), "mo-cn-ap").await.unwrap();
        assert!(ap.is_none());
        let ap_svc: Option<Service> = store.get(Some("default"), "mo-cn-ap").await.unwrap();
        assert!(ap_svc.is_none());
        let ap_config: Option<ConfigMap> = store.get(Some("default"), "mo-cn-ap-config").await.unwrap();
        assert!(ap_config.is_none());
        let proxy: Option<StatefulSet> = store.get(Some("default"), "mo-proxy").await.unwrap();
        assert!(proxy.is_none());
        let tp: Option<StatefulSet> = store.get(Some("default"), "mo-cn-tp").await.unwrap();
        assert!(tp.is_some());

        assert!(status.proxy.is_none());
        assert_eq!(status.cn_groups.keys().collect::<Vec<_>>(), vec!["tp"]);
    }

    #[tokio::test]
    #[ignore = "uses k8s current-context"]
    async fn integration_reconcile_should_set_status() {
        let client = Client::try_default().await.unwrap();
        let store = KubeStore::new(client);
        let mo = cluster("test-cluster");
        store.apply(&mo).await.unwrap();

        let args = DefaultArgs::default();
        let config = OperatorConfig::default();
        Orchestrator::new(&store, &args, &config)
            .reconcile(&mo, Utc::now())
            .await
            .unwrap();

        let output: MatrixOneCluster = store.get(Some("default"), "test-cluster").await.unwrap().unwrap();
        assert!(output.status.is_some());
        let log: Option<StatefulSet> = store.get(Some("default"), "test-cluster-log").await.unwrap();
        assert!(log.is_some());
    }
}
