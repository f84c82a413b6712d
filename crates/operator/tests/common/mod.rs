#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use fleet_core::NamespaceSet;
use fleet_kubehub::fake::{labels, FakeCluster};
use fleet_kubehub::{plan_namespaces, NamespacedEntity};
use fleet_operator::crd::{PrometheusAgentSpec, PrometheusSpec, ServiceMonitorSpec};
use fleet_operator::reporter::REVISION_LABEL;
use fleet_operator::{Prometheus, PrometheusAgent, ServiceMonitor, Workload};
use fleet_store::{CacheOptions, MultiNamespaceCache};
use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec, StatefulSetStatus};
use k8s_openapi::api::core::v1::{
    ContainerState, ContainerStateWaiting, ContainerStatus, Namespace, Pod, PodCondition, PodStatus,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use kube::api::ObjectMeta;
use kube::Resource;
use tokio_util::sync::CancellationToken;

pub fn all_namespaces_cache<K>(cluster: &Arc<FakeCluster<K>>) -> Arc<MultiNamespaceCache<K>>
where
    K: Resource<DynamicType = ()> + NamespacedEntity + Clone + Send + Sync + 'static,
{
    let plan = plan_namespaces(&NamespaceSet::all(), &NamespaceSet::new(), None).unwrap();
    let cluster = Arc::clone(cluster);
    Arc::new(MultiNamespaceCache::new(&plan, move |ns| cluster.list_watch(ns), CacheOptions::default()))
}

pub async fn start<K>(cache: &MultiNamespaceCache<K>, cancel: &CancellationToken)
where
    K: Resource + NamespacedEntity + Send + Sync + 'static,
{
    cache.start(cancel);
    cache.wait_for_sync(cancel).await.unwrap();
}

pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..300 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}

pub fn meta(ns: &str, name: &str) -> ObjectMeta {
    ObjectMeta { namespace: Some(ns.into()), name: Some(name.into()), generation: Some(1), ..Default::default() }
}

pub fn selector(pairs: &[(&str, &str)]) -> LabelSelector {
    LabelSelector { match_labels: labels(pairs), match_expressions: None }
}

pub fn prometheus(ns: &str, name: &str, shards: i32, replicas: i32, sel: Option<LabelSelector>) -> Prometheus {
    let mut p = Prometheus::new(
        name,
        PrometheusSpec {
            shards: Some(shards),
            replicas: Some(replicas),
            service_monitor_selector: sel,
            ..Default::default()
        },
    );
    p.metadata = meta(ns, name);
    p
}

pub fn agent(ns: &str, name: &str, sel: Option<LabelSelector>) -> PrometheusAgent {
    let mut a = PrometheusAgent::new(name, PrometheusAgentSpec { service_monitor_selector: sel, ..Default::default() });
    a.metadata = meta(ns, name);
    a
}

pub fn service_monitor(ns: &str, name: &str, pairs: &[(&str, &str)]) -> ServiceMonitor {
    let mut sm = ServiceMonitor::new(name, ServiceMonitorSpec::default());
    sm.metadata = meta(ns, name);
    sm.metadata.labels = labels(pairs);
    sm
}

pub fn namespace(name: &str, pairs: &[(&str, &str)]) -> Namespace {
    Namespace {
        metadata: ObjectMeta { name: Some(name.into()), labels: labels(pairs), ..Default::default() },
        ..Default::default()
    }
}

/// StatefulSet for one shard of `wl`, owned by it.
pub fn statefulset<W: Workload>(wl: &W, name: &str, revision: &str) -> StatefulSet {
    let meta_wl = wl.meta();
    StatefulSet {
        metadata: ObjectMeta {
            namespace: meta_wl.namespace.clone(),
            name: Some(name.into()),
            owner_references: Some(vec![OwnerReference {
                api_version: W::api_version(&()).to_string(),
                kind: W::kind(&()).to_string(),
                name: meta_wl.name.clone().unwrap_or_default(),
                uid: meta_wl.uid.clone().unwrap_or_default(),
                controller: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            selector: selector(&[("app", name)]),
            ..Default::default()
        }),
        status: Some(StatefulSetStatus { update_revision: Some(revision.into()), ..Default::default() }),
    }
}

/// Pod `idx` of `sts` (which must already carry a uid).
pub fn pod(sts: &StatefulSet, idx: usize, ready: bool, revision: &str) -> Pod {
    let sts_name = sts.metadata.name.clone().unwrap_or_default();
    let mut pod_labels = labels(&[("app", sts_name.as_str()), (REVISION_LABEL, revision)]);
    if let Some(l) = pod_labels.as_mut() {
        l.insert("pod-index".into(), idx.to_string());
    }
    let status = if ready {
        PodStatus {
            conditions: Some(vec![PodCondition { type_: "Ready".into(), status: "True".into(), ..Default::default() }]),
            ..Default::default()
        }
    } else {
        PodStatus {
            conditions: Some(vec![PodCondition { type_: "Ready".into(), status: "False".into(), ..Default::default() }]),
            container_statuses: Some(vec![ContainerStatus {
                name: "prometheus".into(),
                state: Some(ContainerState {
                    waiting: Some(ContainerStateWaiting { reason: Some("CrashLoopBackOff".into()), message: None }),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            ..Default::default()
        }
    };
    Pod {
        metadata: ObjectMeta {
            namespace: sts.metadata.namespace.clone(),
            name: Some(format!("{}-{}", sts_name, idx)),
            labels: pod_labels,
            owner_references: Some(vec![OwnerReference {
                api_version: "apps/v1".into(),
                kind: "StatefulSet".into(),
                name: sts_name.clone(),
                uid: sts.metadata.uid.clone().unwrap_or_default(),
                controller: Some(true),
                ..Default::default()
            }]),
            ..Default::default()
        },
        spec: None,
        status: Some(status),
    }
}
