//! kvrepl Kubernetes Operator binary.
//!
//! Runs the KvCluster controller, which keeps one master and N replicas
//! configured across each cluster's ready pods.

use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::runtime::Controller;
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::{Api, Client, CustomResourceExt, ResourceExt};
use kvrepl_operator::OperatorConfig;
use kvrepl_operator::controller::{
    ClusterController, ControllerContext, ReconcileAction, cluster_error_policy,
};
use kvrepl_operator::crd::KvCluster;
use kvrepl_operator::directory::{APP_LABEL, PART_OF_LABEL};
use kvrepl_operator::error::OperatorError;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kvrepl_operator=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .init();

    if std::env::args().any(|arg| arg == "--generate-crds") {
        generate_crds()?;
        return Ok(());
    }

    tracing::info!("Starting kvrepl Kubernetes Operator");

    let config = OperatorConfig::from_env()?;
    tracing::info!(
        admin_port = config.admin_port,
        part_of = %config.part_of,
        role_label = %config.role_label,
        "Loaded configuration"
    );

    let client = Client::try_default().await?;
    tracing::info!("Connected to Kubernetes cluster");

    let ctx = Arc::new(ControllerContext::new(client.clone(), config));
    run_cluster_controller(client, ctx).await
}

/// Run the KvCluster controller.
///
/// Pod changes are mapped back to the owning cluster through the `app` label,
/// so a pod turning ready or disappearing triggers a reconciliation.
async fn run_cluster_controller(client: Client, ctx: Arc<ControllerContext>) -> anyhow::Result<()> {
    tracing::info!("Starting KvCluster controller");

    let clusters: Api<KvCluster> = Api::all(client.clone());
    let pods: Api<Pod> = Api::all(client);
    let pod_selector = format!("{}={}", PART_OF_LABEL, ctx.config.part_of);
    let controller = ClusterController::new(ctx.clone());

    Controller::new(clusters, WatcherConfig::default())
        .watches(
            pods,
            WatcherConfig::default().labels(&pod_selector),
            |pod: Pod| {
                let namespace = pod.namespace()?;
                let cluster = pod.labels().get(APP_LABEL)?.clone();
                Some(ObjectRef::<KvCluster>::new(&cluster).within(&namespace))
            },
        )
        .shutdown_on_signal()
        .run(
            move |cluster, _ctx| {
                let controller = controller.clone();
                async move {
                    let ReconcileAction::Requeue(duration) = controller.reconcile(cluster).await?;
                    Ok::<_, OperatorError>(Action::requeue(duration))
                }
            },
            cluster_error_policy,
            ctx.clone(),
        )
        .for_each(|result| async move {
            match result {
                Ok((obj, action)) => {
                    tracing::debug!(
                        cluster = %obj.name,
                        ?action,
                        "Reconciled cluster"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Cluster controller stream error");
                }
            }
        })
        .await;

    Ok(())
}

/// Generate CRD YAML.
fn generate_crds() -> anyhow::Result<()> {
    println!("---");
    println!("{}", serde_yaml::to_string(&KvCluster::crd())?);
    Ok(())
}
