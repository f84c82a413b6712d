#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fleet_core::{NamespaceSet, ObjectKey};
use fleet_kubehub::fake::{labels, FakeCluster};
use fleet_kubehub::{plan_namespaces, ClientError, NamespacePlan};
use fleet_store::{CacheOptions, EventHandler, MultiNamespaceCache, StoreError};
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ObjectMeta;
use tokio_util::sync::CancellationToken;

fn cm(ns: &str, name: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta { namespace: Some(ns.into()), name: Some(name.into()), ..Default::default() },
        ..Default::default()
    }
}

fn set(items: &[&str]) -> NamespaceSet {
    items.iter().copied().collect()
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
}

impl Recorder {
    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn count(&self, prefix: &str) -> usize {
        self.events().iter().filter(|e| e.starts_with(prefix)).count()
    }

    fn push(&self, kind: &str, obj: &ConfigMap) {
        let key = format!(
            "{}/{}",
            obj.metadata.namespace.as_deref().unwrap_or(""),
            obj.metadata.name.as_deref().unwrap_or("")
        );
        self.events.lock().unwrap().push(format!("{}:{}", kind, key));
    }
}

impl EventHandler<ConfigMap> for Recorder {
    fn on_add(&self, obj: &Arc<ConfigMap>) {
        self.push("add", obj);
    }

    fn on_update(&self, _old: &Arc<ConfigMap>, new: &Arc<ConfigMap>) {
        self.push("update", new);
    }

    fn on_delete(&self, obj: &Arc<ConfigMap>) {
        self.push("delete", obj);
    }
}

async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

fn cache_for(cluster: &Arc<FakeCluster<ConfigMap>>, plan: &NamespacePlan, options: CacheOptions) -> MultiNamespaceCache<ConfigMap> {
    let cluster = Arc::clone(cluster);
    MultiNamespaceCache::new(plan, move |ns| cluster.list_watch(ns), options)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn explicit_namespaces_behave_as_one_cache() {
    let cluster = FakeCluster::<ConfigMap>::new();
    cluster.apply(cm("a", "one"));
    cluster.apply(cm("b", "two"));
    cluster.apply(cm("c", "three"));

    let plan = plan_namespaces(&set(&["a", "b"]), &NamespaceSet::new(), None).unwrap();
    let cache = cache_for(&cluster, &plan, CacheOptions::default());
    assert_eq!(cache.namespaces(), vec!["a", "b"]);

    let cancel = CancellationToken::new();
    cache.start(&cancel);
    cache.wait_for_sync(&cancel).await.unwrap();
    assert!(cache.has_synced());

    let mut names: Vec<_> = cache.list().iter().map(|o| o.metadata.name.clone().unwrap()).collect();
    names.sort();
    assert_eq!(names, vec!["one", "two"]);

    let hit = cache.get(&ObjectKey::namespaced("b", "two")).unwrap();
    assert_eq!(hit.metadata.name.as_deref(), Some("two"));
    assert!(matches!(cache.get(&ObjectKey::namespaced("c", "three")), Err(StoreError::NotFound(_))));
    cancel.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_before_sync_is_not_a_miss() {
    let cluster = FakeCluster::<ConfigMap>::new();
    cluster.apply(cm("a", "one"));
    let plan = plan_namespaces(&set(&["a"]), &NamespaceSet::new(), None).unwrap();
    let cache = cache_for(&cluster, &plan, CacheOptions::default());
    assert!(!cache.has_synced());
    assert!(matches!(cache.get(&ObjectKey::namespaced("a", "one")), Err(StoreError::NotSynced(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deny_set_hides_namespaces_from_list_and_events() {
    let cluster = FakeCluster::<ConfigMap>::new();
    cluster.apply(cm("default", "keep"));
    cluster.apply(cm("kube-system", "hidden"));

    let plan = plan_namespaces(&NamespaceSet::all(), &set(&["kube-system"]), None).unwrap();
    let cache = cache_for(&cluster, &plan, CacheOptions::default());
    let rec = Arc::new(Recorder::default());
    cache.add_event_handler(rec.clone());

    let cancel = CancellationToken::new();
    cache.start(&cancel);
    cache.wait_for_sync(&cancel).await.unwrap();
    assert_eq!(cache.list().len(), 1);

    cluster.apply(cm("kube-system", "late"));
    cluster.apply(cm("default", "late"));
    assert!(eventually(|| rec.count("add:default/late") == 1).await);
    assert!(rec.events().iter().all(|e| !e.contains("kube-system")));
    cancel.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_handler_sees_every_namespace() {
    let cluster = FakeCluster::<ConfigMap>::new();
    let plan = plan_namespaces(&set(&["a", "b"]), &NamespaceSet::new(), None).unwrap();
    let cache = cache_for(&cluster, &plan, CacheOptions::default());
    let rec = Arc::new(Recorder::default());
    cache.add_event_handler(rec.clone());

    let cancel = CancellationToken::new();
    cache.start(&cancel);
    cache.wait_for_sync(&cancel).await.unwrap();

    cluster.apply(cm("a", "x"));
    cluster.apply(cm("b", "y"));
    let mut changed = cm("a", "x");
    changed.data = Some([("k".to_string(), "v".to_string())].into_iter().collect());
    cluster.apply(changed);
    cluster.remove(&ObjectKey::namespaced("b", "y"));

    assert!(eventually(|| rec.events().len() == 4).await, "events: {:?}", rec.events());
    assert_eq!(rec.count("add:"), 2);
    assert_eq!(rec.count("update:a/x"), 1);
    assert_eq!(rec.count("delete:b/y"), 1);
    assert!(matches!(cache.get(&ObjectKey::namespaced("b", "y")), Err(StoreError::NotFound(_))));
    cancel.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expired_watch_relists_and_keeps_going() {
    let cluster = FakeCluster::<ConfigMap>::new();
    cluster.apply(cm("a", "x"));
    let plan = plan_namespaces(&set(&["a"]), &NamespaceSet::new(), None).unwrap();
    let cache = cache_for(&cluster, &plan, CacheOptions::default());
    let rec = Arc::new(Recorder::default());
    cache.add_event_handler(rec.clone());

    let cancel = CancellationToken::new();
    cache.start(&cancel);
    cache.wait_for_sync(&cancel).await.unwrap();
    let lists_before = cluster.list_calls();

    cluster.expire_watches();
    cluster.remove(&ObjectKey::namespaced("a", "x"));
    cluster.apply(cm("a", "y"));

    assert!(eventually(|| cache.get(&ObjectKey::namespaced("a", "y")).is_ok()).await);
    assert!(eventually(|| rec.count("delete:a/x") == 1).await);
    assert!(cluster.list_calls() > lists_before);
    assert!(cache.has_synced());
    cancel.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_initial_list_fails_only_that_cache() {
    let cluster = FakeCluster::<ConfigMap>::new();
    cluster.fail_next_list(ClientError::Api { code: 500, message: "boom".into() });
    let plan = plan_namespaces(&set(&["a"]), &NamespaceSet::new(), None).unwrap();
    let cache = cache_for(&cluster, &plan, CacheOptions::default());

    let cancel = CancellationToken::new();
    cache.start(&cancel);
    let err = cache.wait_for_sync(&cancel).await.unwrap_err();
    assert!(matches!(err, StoreError::SyncFailed { ref namespace, .. } if namespace == "a"), "{err:?}");
    assert!(!cache.has_synced());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn resync_replays_cached_objects() {
    let cluster = FakeCluster::<ConfigMap>::new();
    cluster.apply(cm("a", "x"));
    let plan = plan_namespaces(&set(&["a"]), &NamespaceSet::new(), None).unwrap();
    let options = CacheOptions { resync: Some(Duration::from_millis(30)), ..Default::default() };
    let cache = cache_for(&cluster, &plan, options);
    let rec = Arc::new(Recorder::default());
    cache.add_event_handler(rec.clone());

    let cancel = CancellationToken::new();
    cache.start(&cancel);
    cache.wait_for_sync(&cancel).await.unwrap();
    assert!(eventually(|| rec.count("update:a/x") >= 2).await);
    assert_eq!(rec.count("add:a/x"), 1);
    cancel.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn list_matching_filters_by_labels() {
    let cluster = FakeCluster::<ConfigMap>::new();
    let mut web = cm("a", "web");
    web.metadata.labels = labels(&[("app", "web")]);
    cluster.apply(web);
    cluster.apply(cm("a", "other"));
    let plan = plan_namespaces(&set(&["a"]), &NamespaceSet::new(), None).unwrap();
    let cache = cache_for(&cluster, &plan, CacheOptions::default());

    let cancel = CancellationToken::new();
    cache.start(&cancel);
    cache.wait_for_sync(&cancel).await.unwrap();

    let sel = LabelSelector { match_labels: labels(&[("app", "web")]), ..Default::default() };
    let hits = cache.list_matching(&sel).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].metadata.name.as_deref(), Some("web"));
    assert_eq!(cache.list_matching(&LabelSelector::default()).unwrap().len(), 2);
    cancel.cancel();
}
