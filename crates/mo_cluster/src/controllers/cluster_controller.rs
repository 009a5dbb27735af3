use crate::api::v1alpha1::{ComponentKind, MatrixOneCluster, MATRIXONE_CLUSTER_FINALIZER};
use crate::config::{DefaultArgs, OperatorConfig};
use crate::controllers::common::{CLUSTER_LABEL, COMPONENT_LABEL};
use crate::controllers::orchestrator::Orchestrator;
use crate::store::KubeStore;
use crate::util::{errors, errors::Result, metrics};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::{ConfigMap, Pod, Service},
};
use kube::{
    api::{Api, ListParams, ResourceExt},
    client::Client,
    runtime::{
        controller::{Action, Controller},
        events::{Event, EventType, Recorder, Reporter},
        finalizer::{finalizer, Event as Finalizer},
        reflector::ObjectRef,
        watcher::{self, Config},
    },
    Resource,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::*;

impl MatrixOneCluster {
    // Reconcile (for non-finalizer related changes)
    async fn reconcile(&self, ctx: Arc<Context>) -> Result<Action> {
        let orchestrator = Orchestrator::new(&ctx.store, &ctx.default_args, &ctx.config);

        match orchestrator.reconcile(self, Utc::now()).await {
            Ok(status) => {
                let failed = status
                    .log_service
                    .as_ref()
                    .map_or(0, |l| l.failover.failed_stores.len());
                ctx.metrics.set_failed_stores(self, failed);
                if failed > 0 {
                    self.publish(
                        &ctx,
                        EventType::Warning,
                        "StoresFailing",
                        format!("{failed} log service stores are failing"),
                    )
                    .await?;
                }
            }
            Err(e) => {
                error!("failed to reconcile cluster {}: {}", self.name_any(), e);
                return Err(e);
            }
        }

        // If no events were received, check back after the configured interval
        Ok(Action::requeue(ctx.config.requeue_interval))
    }

    // Finalizer cleanup (the object was deleted, ensure nothing is orphaned)
    async fn cleanup(&self, ctx: Arc<Context>) -> Result<Action> {
        Orchestrator::new(&ctx.store, &ctx.default_args, &ctx.config)
            .cleanup(self)
            .await?;
        self.publish(
            &ctx,
            EventType::Normal,
            "DeleteRequested",
            format!("Delete `{}`", self.name_any()),
        )
        .await?;
        Ok(Action::await_change())
    }

    async fn publish(&self, ctx: &Context, type_: EventType, reason: &str, note: String) -> Result<()> {
        let recorder = ctx.diagnostics.read().await.recorder(ctx.client.clone());
        recorder
            .publish(
                &Event {
                    type_,
                    reason: reason.into(),
                    note: Some(note),
                    action: "Reconciling".into(),
                    secondary: None,
                },
                &self.object_ref(&()),
            )
            .await
            .map_err(|e| errors::Error::StdError(errors::StdError::KubeError(e)))
    }
}

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub fn to_context(
        &self,
        client: Client,
        config: Arc<OperatorConfig>,
        default_args: Arc<DefaultArgs>,
    ) -> std::result::Result<Arc<Context>, prometheus::Error> {
        Ok(Arc::new(Context {
            store: KubeStore::new(client.clone()),
            client,
            metrics: metrics::Metrics::default().register(&self.registry)?,
            diagnostics: self.diagnostics.clone(),
            config,
            default_args,
        }))
    }
}

// Context for our reconciler
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Resource store the orchestrator writes through
    pub store: KubeStore,
    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    /// Prometheus metrics
    pub metrics: metrics::Metrics,
    /// Operator configuration, loaded once at startup
    pub config: Arc<OperatorConfig>,
    /// Default service args, loaded once at startup
    pub default_args: Arc<DefaultArgs>,
}

pub async fn reconcile(cluster: Arc<MatrixOneCluster>, ctx: Arc<Context>) -> Result<Action> {
    let _timer = ctx.metrics.count_and_measure("cluster");
    ctx.diagnostics.write().await.last_event = Utc::now();

    let ns = cluster.namespace().ok_or_else(|| {
        errors::Error::StdError(errors::StdError::MetadataMissing("namespace".to_string()))
    })?;
    let clusters: Api<MatrixOneCluster> = Api::namespaced(ctx.client.clone(), &ns);

    info!("Reconciling MatrixOneCluster \"{}\" in {}", cluster.name_any(), ns);
    finalizer(&clusters, MATRIXONE_CLUSTER_FINALIZER, cluster, |event| async {
        match event {
            Finalizer::Apply(cluster) => cluster.reconcile(ctx.clone()).await,
            Finalizer::Cleanup(cluster) => cluster.cleanup(ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| errors::Error::StdError(errors::StdError::FinalizerError(Box::new(e))))
}

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: "matrixone-operator".into(),
        }
    }
}
impl Diagnostics {
    fn recorder(&self, client: Client) -> Recorder {
        Recorder::new(client, self.reporter.clone())
    }
}

fn error_policy(cluster: Arc<MatrixOneCluster>, error: &errors::Error, ctx: Arc<Context>) -> Action {
    warn!("reconcile failed: {:?}", error);
    ctx.metrics.reconcile_cluster_failure(&cluster, error);
    Action::requeue(ctx.config.requeue_interval)
}

/// Maps a log service pod to the cluster it belongs to, so store health changes trigger a pass.
fn cluster_of_pod(pod: Pod) -> Option<ObjectRef<MatrixOneCluster>> {
    let cluster = pod.labels().get(CLUSTER_LABEL)?;
    Some(ObjectRef::new(cluster).within(&pod.namespace()?))
}

/// Initialize the controller and shared state (given the crd is installed)
pub async fn run(
    state: State,
    client: Client,
    config: Arc<OperatorConfig>,
    default_args: Arc<DefaultArgs>,
) -> anyhow::Result<()> {
    let clusters = Api::<MatrixOneCluster>::all(client.clone());
    if let Err(e) = clusters.list(&ListParams::default().limit(1)).await {
        error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        anyhow::bail!("MatrixOneCluster CRD is not installed");
    }

    let ctx = state.to_context(client.clone(), config, default_args)?;
    let log_pods = format!("{}={}", COMPONENT_LABEL, ComponentKind::LogService.as_str());

    Controller::new(clusters, Config::default().any_semantic())
        .owns(Api::<StatefulSet>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Deployment>::all(client.clone()), watcher::Config::default())
        .owns(Api::<Service>::all(client.clone()), watcher::Config::default())
        .owns(Api::<ConfigMap>::all(client.clone()), watcher::Config::default())
        .watches(
            Api::<Pod>::all(client.clone()),
            watcher::Config::default().labels(&log_pods),
            cluster_of_pod,
        )
        .run(reconcile, error_policy, ctx)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
    Ok(())
}
