#![forbid(unsafe_code)]

mod common;

use std::sync::Arc;

use common::{all_namespaces_cache, eventually, pod, prometheus, start, statefulset};
use fleet_core::{ConditionStatus, ConditionType, ObjectKey};
use fleet_kubehub::fake::FakeCluster;
use fleet_operator::worker::run_workers;
use fleet_operator::{workload_parts, Config, Prometheus, WorkloadParts};
use fleet_store::MultiNamespaceCache;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use tokio_util::sync::CancellationToken;

struct Env {
    workloads: Arc<FakeCluster<Prometheus>>,
    statefulsets: Arc<FakeCluster<StatefulSet>>,
    workload_cache: Arc<MultiNamespaceCache<Prometheus>>,
    sts_cache: Arc<MultiNamespaceCache<StatefulSet>>,
    parts: WorkloadParts<Prometheus>,
    cancel: CancellationToken,
}

impl Drop for Env {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// `ops/main` with `shards` shards, one ready pod per listed StatefulSet,
/// plus a StatefulSet owned by an unrelated workload.
async fn env(shards: i32, paused: bool, statefulset_names: &[&str]) -> Env {
    let workloads = FakeCluster::<Prometheus>::new();
    let statefulsets = FakeCluster::<StatefulSet>::new();
    let pods = FakeCluster::<Pod>::new();

    let mut wl = prometheus("ops", "main", shards, 1, None);
    wl.spec.paused = paused;
    let wl = workloads.apply(wl);
    for name in statefulset_names {
        let sts = statefulsets.apply(statefulset(&wl, name, "r1"));
        pods.apply(pod(&sts, 0, true, "r1"));
    }
    let other = workloads.apply(prometheus("ops", "other", 1, 1, None));
    statefulsets.apply(statefulset(&other, "prometheus-other", "r1"));

    let workload_cache = all_namespaces_cache(&workloads);
    let sts_cache = all_namespaces_cache(&statefulsets);
    let parts = workload_parts(
        &Config::default(),
        Arc::clone(&workload_cache),
        Arc::clone(&sts_cache),
        statefulsets.clone(),
        pods,
        workloads.clone(),
    );
    let cancel = CancellationToken::new();
    start(&workload_cache, &cancel).await;
    start(&sts_cache, &cancel).await;
    Env { workloads, statefulsets, workload_cache, sts_cache, parts, cancel }
}

impl Env {
    async fn caught_up(&self, key: &ObjectKey) -> bool {
        let cluster = Arc::clone(&self.workloads);
        let cache = Arc::clone(&self.workload_cache);
        let key = key.clone();
        eventually(move || {
            let want = cluster.object(&key).and_then(|o| o.metadata.resource_version);
            let have = cache.get(&key).ok().and_then(|o| o.metadata.resource_version.clone());
            want == have
        })
        .await
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scale_down_prunes_orphaned_shard_and_publishes_status_once() {
    let env = env(1, false, &["prometheus-main", "prometheus-main-shard-1"]).await;
    let key = ObjectKey::namespaced("ops", "main");

    env.parts.controller.process(&key).await.unwrap();
    assert_eq!(env.statefulsets.deletes(), 1);
    assert!(env.statefulsets.object(&ObjectKey::namespaced("ops", "prometheus-main-shard-1")).is_none());
    assert!(env.statefulsets.object(&ObjectKey::namespaced("ops", "prometheus-main")).is_some());
    assert!(env.statefulsets.object(&ObjectKey::namespaced("ops", "prometheus-other")).is_some());

    assert_eq!(env.workloads.status_writes(), 1);
    let status = env.workloads.object(&key).and_then(|p| p.status).unwrap();
    assert_eq!(status.replicas, 1);
    assert_eq!(status.available_replicas, 1);
    assert_eq!(status.condition(ConditionType::Available).unwrap().status, ConditionStatus::True);
    assert_eq!(status.condition(ConditionType::Reconciled).unwrap().status, ConditionStatus::True);
    assert!(env.parts.tracker.get_status(&key).unwrap().ok);

    assert!(env.caught_up(&key).await);
    let sts_cache = Arc::clone(&env.sts_cache);
    assert!(eventually(move || sts_cache.list().len() == 2).await);
    env.parts.controller.process(&key).await.unwrap();
    assert_eq!(env.workloads.status_writes(), 1);
    assert_eq!(env.statefulsets.deletes(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn paused_workload_keeps_its_statefulsets() {
    let env = env(1, true, &["prometheus-main", "prometheus-main-shard-1"]).await;
    let key = ObjectKey::namespaced("ops", "main");

    env.parts.controller.process(&key).await.unwrap();
    assert_eq!(env.statefulsets.deletes(), 0);
    let status = env.workloads.object(&key).and_then(|p| p.status).unwrap();
    assert!(status.paused);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deleted_workload_drops_tracked_outcome() {
    let env = env(1, false, &["prometheus-main"]).await;
    let key = ObjectKey::namespaced("ops", "main");

    env.parts.controller.process(&key).await.unwrap();
    assert_eq!(env.parts.tracker.len(), 1);

    env.workloads.remove(&key);
    let cache = Arc::clone(&env.workload_cache);
    let k = key.clone();
    assert!(eventually(move || cache.get(&k).is_err()).await);
    env.parts.controller.process(&key).await.unwrap();
    assert!(env.parts.tracker.get_status(&key).is_none());
    assert!(env.parts.tracker.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn workers_converge_from_cache_events() {
    let env = env(2, false, &["prometheus-main", "prometheus-main-shard-1"]).await;
    let workers = tokio::spawn(run_workers(
        Arc::clone(&env.parts.controller),
        Arc::clone(&env.parts.queue),
        2,
        env.cancel.clone(),
    ));

    let cluster = Arc::clone(&env.workloads);
    let key = ObjectKey::namespaced("ops", "main");
    assert!(
        eventually(move || {
            cluster
                .object(&key)
                .and_then(|p| p.status)
                .map_or(false, |s| s.replicas == 2 && s.shard_statuses.len() == 2)
        })
        .await
    );
    env.cancel.cancel();
    workers.await.unwrap();
}
