//! Workload controller: prunes StatefulSets left over from a shard
//! scale-down, records the reconcile outcome and publishes status.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use fleet_core::ObjectKey;
use fleet_kubehub::ResourceClient;
use fleet_store::{MultiNamespaceCache, StoreError};
use k8s_openapi::api::apps::v1::StatefulSet;
use metrics::counter;
use tracing::{debug, info};

use crate::crd::Workload;
use crate::error::Result;
use crate::reconciler::{owner_key, ResourceReconciler};
use crate::status::StatusAggregator;
use crate::tracker::ReconciliationTracker;
use crate::worker::Reconcile;

pub const REASON_RECONCILE_FAILED: &str = "ReconcileFailed";

pub struct WorkloadController<W> {
    workloads: Arc<MultiNamespaceCache<W>>,
    statefulsets: Arc<MultiNamespaceCache<StatefulSet>>,
    sts_client: Arc<dyn ResourceClient<StatefulSet>>,
    status_client: Arc<dyn ResourceClient<W>>,
    tracker: Arc<ReconciliationTracker>,
    reconciler: Arc<ResourceReconciler<W>>,
    aggregator: StatusAggregator<W>,
}

impl<W: Workload> WorkloadController<W> {
    pub fn new(
        workloads: Arc<MultiNamespaceCache<W>>,
        statefulsets: Arc<MultiNamespaceCache<StatefulSet>>,
        sts_client: Arc<dyn ResourceClient<StatefulSet>>,
        status_client: Arc<dyn ResourceClient<W>>,
        tracker: Arc<ReconciliationTracker>,
        reconciler: Arc<ResourceReconciler<W>>,
        aggregator: StatusAggregator<W>,
    ) -> Arc<Self> {
        Arc::new(Self { workloads, statefulsets, sts_client, status_client, tracker, reconciler, aggregator })
    }

    /// Attach the reconciler's handlers to the workload and StatefulSet caches.
    pub fn register(&self) {
        self.workloads.add_event_handler(self.reconciler.workload_handler());
        self.statefulsets.add_event_handler(self.reconciler.statefulset_handler());
    }

    /// Delete owned StatefulSets that no longer correspond to a shard.
    async fn prune_shards(&self, key: &ObjectKey, wl: &W) -> Result<usize> {
        if wl.paused() {
            debug!(workload = %key, "workload: paused, not touching statefulsets");
            return Ok(0);
        }
        let expected: BTreeSet<String> = self.reconciler.expected_shard_names(wl).into_iter().collect();
        let mut pruned = 0;
        for sts in self.statefulsets.list() {
            if owner_key::<W>(&sts).as_ref() != Some(key) || self.reconciler.deletion_in_progress(&sts) {
                continue;
            }
            let name = sts.metadata.name.as_deref().unwrap_or("");
            if expected.contains(name) {
                continue;
            }
            let namespace = sts.metadata.namespace.as_deref().unwrap_or("");
            info!(workload = %key, sts = name, "workload: deleting orphaned shard");
            self.sts_client.delete(namespace, name).await?;
            pruned += 1;
        }
        Ok(pruned)
    }

    pub async fn process(&self, key: &ObjectKey) -> Result<()> {
        let wl = match self.workloads.get(key) {
            Ok(wl) => wl,
            Err(StoreError::NotFound(_)) => {
                if self.tracker.forget(key) {
                    debug!(workload = %key, "workload: deleted, outcome dropped");
                }
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let synced = self.prune_shards(key, &wl).await;
        match &synced {
            Ok(_) => self.tracker.set_status(key, true, "", ""),
            Err(e) => self.tracker.set_status(key, false, REASON_RECONCILE_FAILED, e.to_string()),
        }

        let status = self.aggregator.get_status(&wl, Utc::now()).await?;
        if wl.workload_status() != Some(&status) {
            let mut updated = W::clone(&wl);
            updated.set_workload_status(status);
            self.status_client.update_status(&updated).await?;
            counter!("fleet_status_updates_total", 1, "kind" => W::RESOURCE);
            debug!(workload = %key, "workload: status updated");
        }
        synced.map(|_| ())
    }
}

#[async_trait]
impl<W: Workload> Reconcile for WorkloadController<W> {
    fn name(&self) -> &'static str {
        W::RESOURCE
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<()> {
        self.process(key).await
    }
}
