#![forbid(unsafe_code)]

mod common;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use common::{agent, prometheus, statefulset};
use fleet_core::ObjectKey;
use fleet_operator::reconciler::{
    deletion_in_progress, expected_shard_names, key_to_statefulset_key, owner_key,
};
use fleet_operator::{Prometheus, PrometheusAgent, ResourceReconciler, WorkQueue};
use fleet_store::EventHandler;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

fn queue() -> Arc<WorkQueue<ObjectKey>> {
    WorkQueue::new("test", Duration::from_millis(5), Duration::from_millis(50))
}

#[test]
fn expected_names_follow_shard_order() {
    let p = prometheus("ops", "main", 3, 1, None);
    let names = expected_shard_names(&p);
    assert_eq!(names, vec!["prometheus-main", "prometheus-main-shard-1", "prometheus-main-shard-2"]);
    assert_eq!(expected_shard_names(&p), names);

    let a = agent("ops", "main", None);
    assert_eq!(expected_shard_names(&a), vec!["prom-agent-main"]);
}

#[test]
fn statefulset_keys_are_distinct_per_shard() {
    let key = ObjectKey::namespaced("ops", "main");
    let keys: BTreeSet<ObjectKey> = (0..16).map(|i| key_to_statefulset_key::<Prometheus>(&key, i)).collect();
    assert_eq!(keys.len(), 16);
    assert!(keys.iter().all(|k| k.namespace() == Some("ops")));

    let p = prometheus("ops", "main", 16, 1, None);
    let from_names: Vec<String> = expected_shard_names(&p);
    let from_keys: Vec<String> = (0..16).map(|i| key_to_statefulset_key::<Prometheus>(&key, i).name().to_string()).collect();
    assert_eq!(from_names, from_keys);
}

#[test]
fn kinds_do_not_collide() {
    let key = ObjectKey::namespaced("ops", "main");
    assert_ne!(key_to_statefulset_key::<Prometheus>(&key, 0), key_to_statefulset_key::<PrometheusAgent>(&key, 0));
}

#[test]
fn deletion_marker_and_owner_lookup() {
    let mut p = prometheus("ops", "main", 1, 1, None);
    p.metadata.uid = Some("u-1".into());
    let mut sts = statefulset(&p, "prometheus-main", "r1");
    assert!(!deletion_in_progress(&sts));
    assert_eq!(owner_key::<Prometheus>(&sts), Some(ObjectKey::namespaced("ops", "main")));
    assert_eq!(owner_key::<PrometheusAgent>(&sts), None);

    sts.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
    assert!(deletion_in_progress(&sts));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn statefulset_events_enqueue_owner_and_track_deletion() {
    let q = queue();
    let r = ResourceReconciler::<Prometheus>::new(Arc::clone(&q));
    let handler = r.statefulset_handler();

    let mut p = prometheus("ops", "main", 2, 1, None);
    p.metadata.uid = Some("u-1".into());
    let mut sts = statefulset(&p, "prometheus-main-shard-1", "r1");
    sts.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
    let sts = Arc::new(sts);

    handler.on_add(&sts);
    let key = ObjectKey::namespaced("ops", "prometheus-main-shard-1");
    assert!(r.is_deleting(&key));
    let owner = ObjectKey::namespaced("ops", "main");
    assert_eq!(q.get().await, Some(owner.clone()));
    q.done(&owner);

    handler.on_delete(&sts);
    assert!(!r.is_deleting(&key));
    assert_eq!(q.len(), 1);

    let wl_handler = r.workload_handler();
    wl_handler.on_add(&Arc::new(prometheus("ops", "other", 1, 1, None)));
    wl_handler.on_add(&Arc::new(prometheus("ops", "other", 1, 1, None)));
    assert_eq!(q.len(), 2);
}
