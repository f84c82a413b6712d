//! Workload status: replica totals, per-shard counts and the Available and
//! Reconciled conditions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use fleet_core::{Condition, ConditionStatus, ConditionType, ReconciliationOutcome, ShardStatus, WorkloadStatus};
use fleet_kubehub::{object_key, ResourceClient};
use fleet_store::{MultiNamespaceCache, StoreError};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;
use kube::Resource;
use tracing::debug;

use crate::crd::Workload;
use crate::error::Result;
use crate::reconciler::{key_to_statefulset_key, ResourceReconciler};
use crate::reporter::StatefulSetReporter;
use crate::tracker::ReconciliationTracker;

pub const REASON_NO_POD_READY: &str = "NoPodReady";
pub const REASON_SOME_PODS_NOT_READY: &str = "SomePodsNotReady";
pub const REASON_NOT_FOUND: &str = "NotFound";

/// Folds shards into the Available condition. `False` is sticky: once a
/// shard has no ready pod, later shards cannot raise it back to `Degraded`.
#[derive(Debug, Clone)]
pub struct Availability {
    status: ConditionStatus,
    reason: &'static str,
    messages: Vec<String>,
}

impl Default for Availability {
    fn default() -> Self {
        Self { status: ConditionStatus::True, reason: "", messages: Vec::new() }
    }
}

impl Availability {
    pub fn observe_shard(&mut self, ready: usize, target: i32) {
        if ready as i64 >= i64::from(target) {
            return;
        }
        if ready == 0 {
            self.status = ConditionStatus::False;
            self.reason = REASON_NO_POD_READY;
        } else if self.status != ConditionStatus::False {
            self.status = ConditionStatus::Degraded;
            self.reason = REASON_SOME_PODS_NOT_READY;
        }
    }

    pub fn push_message(&mut self, shard: i32, pod: &str, message: &str) {
        if !message.is_empty() {
            self.messages.push(format!("shard {}: pod {}: {}", shard, pod, message));
        }
    }

    pub fn status(&self) -> ConditionStatus {
        self.status
    }

    pub fn into_condition(self, generation: Option<i64>, now: DateTime<Utc>) -> Condition {
        Condition::new(
            ConditionType::Available,
            self.status,
            self.reason,
            self.messages.join("\n"),
            generation,
            now,
        )
    }
}

/// Reconciled condition from the tracked outcome.
pub fn reconciled_condition(
    outcome: Option<&ReconciliationOutcome>,
    generation: Option<i64>,
    now: DateTime<Utc>,
) -> Condition {
    match outcome {
        None => Condition::new(
            ConditionType::Reconciled,
            ConditionStatus::Unknown,
            REASON_NOT_FOUND,
            "",
            generation,
            now,
        ),
        Some(o) => Condition::new(
            ConditionType::Reconciled,
            if o.ok { ConditionStatus::True } else { ConditionStatus::False },
            o.reason.clone(),
            o.message.clone(),
            generation,
            now,
        ),
    }
}

pub struct StatusAggregator<W> {
    statefulsets: Arc<MultiNamespaceCache<StatefulSet>>,
    pods: Arc<dyn ResourceClient<Pod>>,
    tracker: Arc<ReconciliationTracker>,
    reconciler: Arc<ResourceReconciler<W>>,
}

impl<W: Workload> StatusAggregator<W> {
    pub fn new(
        statefulsets: Arc<MultiNamespaceCache<StatefulSet>>,
        pods: Arc<dyn ResourceClient<Pod>>,
        tracker: Arc<ReconciliationTracker>,
        reconciler: Arc<ResourceReconciler<W>>,
    ) -> Self {
        Self { statefulsets, pods, tracker, reconciler }
    }

    /// Full status snapshot for `wl`. Fails without a partial result when
    /// any shard's pods cannot be read; comparing against the persisted
    /// status is left to the caller.
    pub async fn get_status(&self, wl: &W, now: DateTime<Utc>) -> Result<WorkloadStatus> {
        let key = object_key(wl);
        let generation = wl.meta().generation;
        let mut status = WorkloadStatus { paused: wl.paused(), ..Default::default() };
        let mut available = Availability::default();

        for shard in 0..wl.shards() {
            let sts_key = key_to_statefulset_key::<W>(&key, shard);
            let sts = match self.statefulsets.get(&sts_key) {
                Ok(sts) => sts,
                Err(StoreError::NotFound(_)) => {
                    debug!(workload = %key, sts = %sts_key, "status: shard not created yet");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if self.reconciler.deletion_in_progress(&sts) {
                continue;
            }
            let reporter = StatefulSetReporter::new(self.pods.as_ref(), &sts).await?;
            let ready = reporter.ready_pods().len();

            let mut shard_status = ShardStatus::new(shard);
            shard_status.replicas = reporter.pods().len() as i32;
            shard_status.updated_replicas = reporter.updated_pods().len() as i32;
            shard_status.available_replicas = reporter.available_pods().len() as i32;
            shard_status.unavailable_replicas = shard_status.replicas - shard_status.available_replicas;

            status.replicas += shard_status.replicas;
            status.updated_replicas += shard_status.updated_replicas;
            status.available_replicas += shard_status.available_replicas;
            status.unavailable_replicas += shard_status.unavailable_replicas;
            status.shard_statuses.push(shard_status);

            available.observe_shard(ready, wl.replicas());
            if (ready as i64) < i64::from(wl.replicas()) {
                for pod in reporter.pods() {
                    available.push_message(shard, &pod.name, pod.message());
                }
            }
        }

        let previous = wl.workload_status().map(|s| s.conditions.as_slice()).unwrap_or(&[]);
        let outcome = self.tracker.get_status(&key);
        status.conditions = vec![
            available.into_condition(generation, now).carry_transition_time(previous),
            reconciled_condition(outcome.as_deref(), generation, now).carry_transition_time(previous),
        ];
        Ok(status)
    }
}
