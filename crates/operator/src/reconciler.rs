//! Shard naming and StatefulSet lifecycle tracking for sharded workloads.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};

use fleet_core::ObjectKey;
use fleet_kubehub::object_key;
use fleet_store::EventHandler;
use k8s_openapi::api::apps::v1::StatefulSet;
use kube::Resource;
use rustc_hash::FxHashSet;
use tracing::debug;

use crate::crd::Workload;
use crate::queue::WorkQueue;

/// StatefulSet name for one shard: `<prefix>-<name>` for shard 0,
/// `<prefix>-<name>-shard-<n>` otherwise.
pub fn shard_name(prefix: &str, name: &str, shard: i32) -> String {
    if shard == 0 {
        format!("{}-{}", prefix, name)
    } else {
        format!("{}-{}-shard-{}", prefix, name, shard)
    }
}

/// Key of the StatefulSet backing `shard` of the workload at `key`.
pub fn key_to_statefulset_key<W: Workload>(key: &ObjectKey, shard: i32) -> ObjectKey {
    ObjectKey::new(key.namespace(), &shard_name(W::NAME_PREFIX, key.name(), shard))
}

/// StatefulSet names for every shard, by ascending shard index.
pub fn expected_shard_names<W: Workload>(wl: &W) -> Vec<String> {
    let key = object_key(wl);
    (0..wl.shards())
        .map(|shard| key_to_statefulset_key::<W>(&key, shard).name().to_string())
        .collect()
}

pub fn deletion_in_progress(sts: &StatefulSet) -> bool {
    sts.metadata.deletion_timestamp.is_some()
}

/// Workload owning a StatefulSet, from its controller owner reference.
pub fn owner_key<W: Workload>(sts: &StatefulSet) -> Option<ObjectKey> {
    let kind = W::kind(&());
    let owner = sts
        .metadata
        .owner_references
        .iter()
        .flatten()
        .find(|r| r.controller == Some(true) && r.kind == kind)?;
    Some(ObjectKey::new(sts.metadata.namespace.as_deref(), &owner.name))
}

/// Maps workload and StatefulSet events onto the workload queue and keeps
/// track of StatefulSets that are being torn down.
pub struct ResourceReconciler<W> {
    queue: Arc<WorkQueue<ObjectKey>>,
    deleting: Mutex<FxHashSet<ObjectKey>>,
    _kind: PhantomData<fn() -> W>,
}

impl<W: Workload> ResourceReconciler<W> {
    pub fn new(queue: Arc<WorkQueue<ObjectKey>>) -> Arc<Self> {
        Arc::new(Self { queue, deleting: Mutex::new(FxHashSet::default()), _kind: PhantomData })
    }

    pub fn expected_shard_names(&self, wl: &W) -> Vec<String> {
        expected_shard_names(wl)
    }

    /// True when the StatefulSet carries a deletion timestamp, or was last
    /// observed with one and its removal has not been seen yet.
    pub fn deletion_in_progress(&self, sts: &StatefulSet) -> bool {
        deletion_in_progress(sts) || self.is_deleting(&object_key(sts))
    }

    pub fn is_deleting(&self, key: &ObjectKey) -> bool {
        self.deleting.lock().unwrap_or_else(PoisonError::into_inner).contains(key)
    }

    pub fn enqueue(&self, key: ObjectKey) {
        self.queue.add(key);
    }

    fn observe_statefulset(&self, sts: &StatefulSet, removed: bool) {
        let key = object_key(sts);
        {
            let mut deleting = self.deleting.lock().unwrap_or_else(PoisonError::into_inner);
            if removed || !deletion_in_progress(sts) {
                deleting.remove(&key);
            } else if deleting.insert(key.clone()) {
                debug!(sts = %key, "reconciler: statefulset deletion in progress");
            }
        }
        if let Some(owner) = owner_key::<W>(sts) {
            self.queue.add(owner);
        }
    }

    /// Handler for the workload cache.
    pub fn workload_handler(self: &Arc<Self>) -> Arc<dyn EventHandler<W>> {
        Arc::new(WorkloadEvents(Arc::clone(self)))
    }

    /// Handler for the StatefulSet cache.
    pub fn statefulset_handler(self: &Arc<Self>) -> Arc<dyn EventHandler<StatefulSet>> {
        Arc::new(StatefulSetEvents(Arc::clone(self)))
    }
}

struct WorkloadEvents<W>(Arc<ResourceReconciler<W>>);

impl<W: Workload> EventHandler<W> for WorkloadEvents<W> {
    fn on_add(&self, obj: &Arc<W>) {
        self.0.enqueue(object_key(obj.as_ref()));
    }

    fn on_delete(&self, obj: &Arc<W>) {
        self.0.enqueue(object_key(obj.as_ref()));
    }
}

struct StatefulSetEvents<W>(Arc<ResourceReconciler<W>>);

impl<W: Workload> EventHandler<StatefulSet> for StatefulSetEvents<W> {
    fn on_add(&self, obj: &Arc<StatefulSet>) {
        self.0.observe_statefulset(obj, false);
    }

    fn on_delete(&self, obj: &Arc<StatefulSet>) {
        self.0.observe_statefulset(obj, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_zero_has_no_suffix() {
        assert_eq!(shard_name("prometheus", "main", 0), "prometheus-main");
        assert_eq!(shard_name("prometheus", "main", 2), "prometheus-main-shard-2");
    }
}
