use std::sync::Arc;

use kube::Client;
use mo_cluster::config::{DefaultArgs, OperatorConfig};
use mo_cluster::controllers::cluster_controller::{self, State};
use mo_cluster::store::KubeStore;
use mo_cluster::util::telemetry;
use tracing::info;

mod handlers;
mod server;

const BIND_ADDRESS: &str = "0.0.0.0:8080";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init().await;

    let config = OperatorConfig::from_env()?;
    info!(
        "Starting matrixone-operator in namespace {} (store failure timeout {:?})",
        config.namespace, config.store_failure_timeout
    );

    let client = Client::try_default().await?;
    // default args are read once, a change needs an operator restart
    let default_args = DefaultArgs::load(
        &KubeStore::new(client.clone()),
        &config.namespace,
        &config.default_args_configmap,
    )
    .await?;

    // Initiatilize Kubernetes controller state
    let state = State::default();
    let controller = cluster_controller::run(
        state.clone(),
        client,
        Arc::new(config),
        Arc::new(default_args),
    );

    // Both runtimes implements graceful shutdown, so poll until both are done
    let (controller, server) = tokio::join!(controller, server::start_server(state, BIND_ADDRESS));
    controller?;
    server?;
    Ok(())
}
