//! Fleet operator: keeps sharded Prometheus and PrometheusAgent workloads'
//! StatefulSets and status in line, and records on each ServiceMonitor which
//! workloads select it.

#![forbid(unsafe_code)]

use std::sync::Arc;

use fleet_core::{ObjectKey, ALL_NAMESPACES};
use fleet_kubehub::{
    cluster_list_watch, namespaced_list_watch, plan_namespaces, KubeResources, NamespacePlan, ResourceClient,
};
use fleet_store::{CacheOptions, MultiNamespaceCache};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub mod bindings;
pub mod config;
pub mod crd;
pub mod error;
pub mod queue;
pub mod reconciler;
pub mod reporter;
pub mod status;
pub mod tracker;
pub mod worker;
pub mod workload;

pub use bindings::{BindingCaches, StatusController};
pub use config::Config;
pub use crd::{Prometheus, PrometheusAgent, ServiceMonitor, Workload};
pub use error::{Error, Result};
pub use queue::WorkQueue;
pub use reconciler::ResourceReconciler;
pub use status::StatusAggregator;
pub use tracker::ReconciliationTracker;
pub use workload::WorkloadController;

/// Everything one workload kind needs: its queue, tracker and controller.
pub struct WorkloadParts<W> {
    pub queue: Arc<WorkQueue<ObjectKey>>,
    pub tracker: Arc<ReconciliationTracker>,
    pub controller: Arc<WorkloadController<W>>,
}

/// Wire a workload controller over the given caches and clients, and
/// register its event handlers.
pub fn workload_parts<W: Workload>(
    config: &Config,
    workloads: Arc<MultiNamespaceCache<W>>,
    statefulsets: Arc<MultiNamespaceCache<StatefulSet>>,
    sts_client: Arc<dyn ResourceClient<StatefulSet>>,
    pods: Arc<dyn ResourceClient<Pod>>,
    status_client: Arc<dyn ResourceClient<W>>,
) -> WorkloadParts<W> {
    let queue = WorkQueue::new(W::RESOURCE, config.backoff_base, config.backoff_max);
    let tracker = Arc::new(ReconciliationTracker::new());
    let reconciler = ResourceReconciler::<W>::new(Arc::clone(&queue));
    let aggregator = StatusAggregator::new(
        Arc::clone(&statefulsets),
        pods,
        Arc::clone(&tracker),
        Arc::clone(&reconciler),
    );
    let controller = WorkloadController::new(
        workloads,
        statefulsets,
        sts_client,
        status_client,
        Arc::clone(&tracker),
        reconciler,
        aggregator,
    );
    controller.register();
    WorkloadParts { queue, tracker, controller }
}

/// Run both workload controllers and the ServiceMonitor status controller
/// against a live cluster until `cancel` fires. Failing to sync any cache at
/// startup is fatal.
pub async fn run(client: Client, config: Config, cancel: CancellationToken) -> Result<()> {
    let plan = plan_namespaces(&config.allow_namespaces, &config.deny_namespaces, None)?;
    info!(plan = ?plan, workers = config.workers, "operator: starting");
    let options = CacheOptions { resync: config.resync, watch_buffer: config.watch_buffer };

    let prometheuses = Arc::new(MultiNamespaceCache::<Prometheus>::new(
        &plan,
        |ns| namespaced_list_watch(&client, ns),
        options.clone(),
    ));
    let agents = Arc::new(MultiNamespaceCache::<PrometheusAgent>::new(
        &plan,
        |ns| namespaced_list_watch(&client, ns),
        options.clone(),
    ));
    let monitors = Arc::new(MultiNamespaceCache::<ServiceMonitor>::new(
        &plan,
        |ns| namespaced_list_watch(&client, ns),
        options.clone(),
    ));
    let statefulsets = Arc::new(MultiNamespaceCache::<StatefulSet>::new(
        &plan,
        |ns| namespaced_list_watch(&client, ns),
        options.clone(),
    ));
    // Namespaces are cluster-scoped: one cluster-wide cache, deny-set applied
    // client-side by name.
    let ns_plan = NamespacePlan { namespaces: vec![ALL_NAMESPACES.to_string()], deny: plan.deny.clone(), modifier: None };
    let namespaces = Arc::new(MultiNamespaceCache::<Namespace>::new(
        &ns_plan,
        |_| cluster_list_watch(&client),
        options,
    ));

    let pods: Arc<dyn ResourceClient<Pod>> = Arc::new(KubeResources::<Pod>::new(client.clone()));
    let sts_client: Arc<dyn ResourceClient<StatefulSet>> = Arc::new(KubeResources::<StatefulSet>::new(client.clone()));

    let prom = workload_parts(
        &config,
        Arc::clone(&prometheuses),
        Arc::clone(&statefulsets),
        Arc::clone(&sts_client),
        Arc::clone(&pods),
        Arc::new(KubeResources::<Prometheus>::new(client.clone())),
    );
    let agent = workload_parts(
        &config,
        Arc::clone(&agents),
        Arc::clone(&statefulsets),
        sts_client,
        pods,
        Arc::new(KubeResources::<PrometheusAgent>::new(client.clone())),
    );

    let status_queue = WorkQueue::new("servicemonitors", config.backoff_base, config.backoff_max);
    let status = StatusController::new(
        BindingCaches {
            prometheuses: Arc::clone(&prometheuses),
            agents: Arc::clone(&agents),
            monitors: Arc::clone(&monitors),
            namespaces: Arc::clone(&namespaces),
        },
        Arc::new(KubeResources::<ServiceMonitor>::new(client)),
        Arc::clone(&prom.tracker),
        Arc::clone(&agent.tracker),
        Arc::clone(&status_queue),
    );
    status.register();

    prometheuses.start(&cancel);
    agents.start(&cancel);
    monitors.start(&cancel);
    statefulsets.start(&cancel);
    namespaces.start(&cancel);

    prometheuses.wait_for_sync(&cancel).await?;
    agents.wait_for_sync(&cancel).await?;
    monitors.wait_for_sync(&cancel).await?;
    statefulsets.wait_for_sync(&cancel).await?;
    namespaces.wait_for_sync(&cancel).await?;
    info!("operator: caches synced");

    tokio::join!(
        worker::run_workers(prom.controller, prom.queue, config.workers, cancel.clone()),
        worker::run_workers(agent.controller, agent.queue, config.workers, cancel.clone()),
        worker::run_workers(status, status_queue, config.workers, cancel.clone()),
    );
    info!("operator: stopped");
    Ok(())
}
