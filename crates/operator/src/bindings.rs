//! ServiceMonitor status controller.
//!
//! Every run recomputes a ServiceMonitor's bindings from the caches: one
//! entry per Prometheus or PrometheusAgent whose namespace selector and
//! label selector both select it. The status is written only when the
//! recomputed set differs from the persisted one.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_core::conditions::same_condition_set;
use fleet_core::{Condition, ConditionStatus, ConditionType, ObjectKey};
use fleet_kubehub::selector::{self, Labels};
use fleet_kubehub::{object_key, ResourceClient};
use fleet_store::{EventHandler, MultiNamespaceCache, StoreError};
use k8s_openapi::api::core::v1::Namespace;
use kube::Resource;
use metrics::counter;
use tracing::{debug, warn};

use crate::crd::{Prometheus, PrometheusAgent, ServiceMonitor, ServiceMonitorStatus, Workload, WorkloadBinding};
use crate::error::Result;
use crate::queue::WorkQueue;
use crate::tracker::ReconciliationTracker;
use crate::worker::Reconcile;

/// Caches the controller reads from.
#[derive(Clone)]
pub struct BindingCaches {
    pub prometheuses: Arc<MultiNamespaceCache<Prometheus>>,
    pub agents: Arc<MultiNamespaceCache<PrometheusAgent>>,
    pub monitors: Arc<MultiNamespaceCache<ServiceMonitor>>,
    pub namespaces: Arc<MultiNamespaceCache<Namespace>>,
}

pub struct StatusController {
    caches: BindingCaches,
    client: Arc<dyn ResourceClient<ServiceMonitor>>,
    prometheus_tracker: Arc<ReconciliationTracker>,
    agent_tracker: Arc<ReconciliationTracker>,
    queue: Arc<WorkQueue<ObjectKey>>,
}

fn labels_of<K: Resource>(obj: &K) -> Labels {
    obj.meta().labels.clone().unwrap_or_default()
}

fn binding_order(a: &WorkloadBinding, b: &WorkloadBinding) -> Ordering {
    a.identity().cmp(&b.identity())
}

/// Order-independent comparison of two binding sets; condition timestamps
/// are ignored.
pub fn same_bindings(a: &[WorkloadBinding], b: &[WorkloadBinding]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a: Vec<&WorkloadBinding> = a.iter().collect();
    let mut b: Vec<&WorkloadBinding> = b.iter().collect();
    a.sort_by(|x, y| binding_order(x, y));
    b.sort_by(|x, y| binding_order(x, y));
    a.iter()
        .zip(b.iter())
        .all(|(x, y)| x.identity() == y.identity() && same_condition_set(&x.conditions, &y.conditions))
}

/// Accepted condition mirroring the workload's tracked outcome.
pub fn accepted_condition(tracker: &ReconciliationTracker, key: &ObjectKey, generation: Option<i64>, now: DateTime<Utc>) -> Condition {
    match tracker.get_status(key) {
        None => Condition::new(ConditionType::Accepted, ConditionStatus::Unknown, "NotFound", "", generation, now),
        Some(o) => Condition::new(
            ConditionType::Accepted,
            if o.ok { ConditionStatus::True } else { ConditionStatus::False },
            o.reason.clone(),
            o.message.clone(),
            generation,
            now,
        ),
    }
}

impl StatusController {
    pub fn new(
        caches: BindingCaches,
        client: Arc<dyn ResourceClient<ServiceMonitor>>,
        prometheus_tracker: Arc<ReconciliationTracker>,
        agent_tracker: Arc<ReconciliationTracker>,
        queue: Arc<WorkQueue<ObjectKey>>,
    ) -> Arc<Self> {
        Arc::new(Self { caches, client, prometheus_tracker, agent_tracker, queue })
    }

    /// Attach the controller's handlers to the caches.
    pub fn register(self: &Arc<Self>) {
        self.caches.prometheuses.add_event_handler(Arc::new(ParentEvents(Arc::clone(self))));
        self.caches.agents.add_event_handler(Arc::new(ParentEvents(Arc::clone(self))));
        self.caches.monitors.add_event_handler(Arc::new(MonitorEvents(Arc::clone(&self.queue))));
        self.caches.namespaces.add_event_handler(Arc::new(NamespaceEvents(Arc::clone(self))));
    }

    pub fn queue(&self) -> &Arc<WorkQueue<ObjectKey>> {
        &self.queue
    }

    /// Whether `wl` selects `sm`. A workload without a ServiceMonitor
    /// selector selects nothing; without a namespace selector it only looks
    /// at its own namespace.
    pub fn selects<W: Workload>(&self, wl: &W, sm: &ServiceMonitor) -> Result<bool> {
        let Some(sel) = wl.service_monitor_selector() else { return Ok(false) };
        let sm_ns = sm.meta().namespace.as_deref().unwrap_or("");
        match wl.service_monitor_namespace_selector() {
            None => {
                if wl.meta().namespace.as_deref().unwrap_or("") != sm_ns {
                    return Ok(false);
                }
            }
            Some(ns_sel) => {
                let ns_labels = match self.caches.namespaces.get(&ObjectKey::cluster(sm_ns)) {
                    Ok(ns) => labels_of(ns.as_ref()),
                    Err(StoreError::NotFound(_)) => return Ok(false),
                    Err(e) => return Err(e.into()),
                };
                if !selector::matches(ns_sel, &ns_labels)? {
                    return Ok(false);
                }
            }
        }
        Ok(selector::matches(sel, &labels_of(sm))?)
    }

    /// ServiceMonitors currently selected by `wl`. Malformed selectors
    /// select nothing for this pass.
    fn selected_by<W: Workload>(&self, wl: &W) -> Vec<ObjectKey> {
        let mut keys = Vec::new();
        for sm in self.caches.monitors.list() {
            match self.selects(wl, &sm) {
                Ok(true) => keys.push(object_key(sm.as_ref())),
                Ok(false) => {}
                Err(e) => {
                    warn!(workload = %object_key(wl), error = %e, "bindings: skipping workload with unusable selector");
                    return keys;
                }
            }
        }
        keys
    }

    fn enqueue_selected<W: Workload>(&self, wl: &W) {
        for key in self.selected_by(wl) {
            self.queue.add(key);
        }
    }

    fn bindings_for<W: Workload>(
        &self,
        cache: &MultiNamespaceCache<W>,
        tracker: &ReconciliationTracker,
        sm: &ServiceMonitor,
        previous: &[WorkloadBinding],
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkloadBinding>> {
        let group = W::group(&()).to_string();
        let mut out = Vec::new();
        for wl in cache.list() {
            match self.selects(wl.as_ref(), sm) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e @ crate::Error::Store(_)) => return Err(e),
                Err(e) => {
                    warn!(workload = %object_key(wl.as_ref()), monitor = %object_key(sm), error = %e, "bindings: skipping pairing");
                    continue;
                }
            }
            let key = object_key(wl.as_ref());
            let mut binding = WorkloadBinding {
                group: group.clone(),
                resource: W::RESOURCE.to_string(),
                name: key.name().to_string(),
                namespace: key.namespace().unwrap_or("").to_string(),
                conditions: Vec::new(),
            };
            let prev_conditions = previous
                .iter()
                .find(|b| b.identity() == binding.identity())
                .map(|b| b.conditions.as_slice())
                .unwrap_or(&[]);
            binding.conditions = vec![
                accepted_condition(tracker, &key, wl.meta().generation, now).carry_transition_time(prev_conditions),
            ];
            out.push(binding);
        }
        Ok(out)
    }

    /// Recompute and, when changed, persist the bindings of one
    /// ServiceMonitor. A ServiceMonitor that no longer exists is not an error.
    pub async fn process(&self, key: &ObjectKey) -> Result<()> {
        let sm = match self.caches.monitors.get(key) {
            Ok(sm) => sm,
            Err(StoreError::NotFound(_)) => {
                debug!(monitor = %key, "bindings: servicemonitor gone");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let now = Utc::now();
        let previous = sm.status.as_ref().map(|s| s.bindings.as_slice()).unwrap_or(&[]);

        let mut bindings = self.bindings_for(&self.caches.prometheuses, &self.prometheus_tracker, &sm, previous, now)?;
        bindings.extend(self.bindings_for(&self.caches.agents, &self.agent_tracker, &sm, previous, now)?);
        bindings.sort_by(binding_order);

        if same_bindings(previous, &bindings) {
            debug!(monitor = %key, bindings = bindings.len(), "bindings: unchanged");
            return Ok(());
        }

        let mut updated = ServiceMonitor::clone(&sm);
        let count = bindings.len();
        updated.status = Some(ServiceMonitorStatus { bindings });
        self.client.update_status(&updated).await?;
        counter!("fleet_status_updates_total", 1, "kind" => "ServiceMonitor");
        debug!(monitor = %key, bindings = count, "bindings: status updated");
        Ok(())
    }
}

#[async_trait]
impl Reconcile for StatusController {
    fn name(&self) -> &'static str {
        "servicemonitor-status"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<()> {
        self.process(key).await
    }
}

struct ParentEvents(Arc<StatusController>);

impl<W: Workload> EventHandler<W> for ParentEvents {
    fn on_add(&self, obj: &Arc<W>) {
        self.0.enqueue_selected(obj.as_ref());
    }

    fn on_update(&self, old: &Arc<W>, new: &Arc<W>) {
        self.0.enqueue_selected(old.as_ref());
        if !Arc::ptr_eq(old, new) {
            self.0.enqueue_selected(new.as_ref());
        }
    }

    fn on_delete(&self, obj: &Arc<W>) {
        self.0.enqueue_selected(obj.as_ref());
    }
}

struct MonitorEvents(Arc<WorkQueue<ObjectKey>>);

impl EventHandler<ServiceMonitor> for MonitorEvents {
    fn on_add(&self, obj: &Arc<ServiceMonitor>) {
        self.0.add(object_key(obj.as_ref()));
    }

    fn on_update(&self, old: &Arc<ServiceMonitor>, new: &Arc<ServiceMonitor>) {
        if old.metadata.labels != new.metadata.labels {
            self.0.add(object_key(new.as_ref()));
        }
    }
}

/// Namespace arrivals and label changes can move ServiceMonitors in or out
/// of a workload's namespace selector. The Namespace and ServiceMonitor
/// streams are unordered, so a monitor may have been processed before its
/// Namespace was cached.
struct NamespaceEvents(Arc<StatusController>);

impl NamespaceEvents {
    fn enqueue_monitors_in(&self, ns: &Namespace) {
        let ns = ns.metadata.name.as_deref().unwrap_or("");
        for sm in self.0.caches.monitors.list() {
            if sm.metadata.namespace.as_deref() == Some(ns) {
                self.0.queue.add(object_key(sm.as_ref()));
            }
        }
    }
}

impl EventHandler<Namespace> for NamespaceEvents {
    fn on_add(&self, obj: &Arc<Namespace>) {
        self.enqueue_monitors_in(obj);
    }

    fn on_update(&self, old: &Arc<Namespace>, new: &Arc<Namespace>) {
        if old.metadata.labels != new.metadata.labels {
            self.enqueue_monitors_in(new);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use fleet_core::conditions;

    fn binding(name: &str, status: ConditionStatus, at: i64) -> WorkloadBinding {
        let ts = Utc.timestamp_opt(at, 0).single().unwrap();
        WorkloadBinding {
            group: "monitoring.coreos.com".into(),
            resource: "prometheuses".into(),
            name: name.into(),
            namespace: "ops".into(),
            conditions: vec![Condition::new(ConditionType::Accepted, status, "", "", Some(1), ts)],
        }
    }

    #[test]
    fn binding_sets_compare_without_order_or_timestamps() {
        let a = vec![binding("a", ConditionStatus::True, 1), binding("b", ConditionStatus::Unknown, 1)];
        let b = vec![binding("b", ConditionStatus::Unknown, 5), binding("a", ConditionStatus::True, 9)];
        assert!(same_bindings(&a, &b));
        assert!(!same_bindings(&a, &b[..1]));
        let c = vec![binding("b", ConditionStatus::Unknown, 5), binding("a", ConditionStatus::False, 9)];
        assert!(!same_bindings(&a, &c));
        assert!(conditions::find(&a[0].conditions, ConditionType::Accepted).is_some());
    }
}
