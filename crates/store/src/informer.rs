//! Watch-fed cache for one namespace (or all namespaces).
//!
//! The sync task is the only writer: it lists, swaps in a fresh map, then
//! follows the watch from the list's resourceVersion. Readers take lock-free
//! snapshots of the map.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use fleet_core::ObjectKey;
use fleet_kubehub::{object_key, ListOptions, ListWatch, WatchEvent};
use futures::StreamExt;
use kube::Resource;
use metrics::counter;
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::handlers::Broadcast;
use crate::StoreError;

type ItemMap<K> = FxHashMap<ObjectKey, Arc<K>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Pending,
    Synced,
    Failed(String),
}

pub struct NamespaceCache<K> {
    namespace: String,
    source: Arc<dyn ListWatch<K>>,
    opts: ListOptions,
    resync: Option<Duration>,
    items: ArcSwap<ItemMap<K>>,
    handlers: Arc<Broadcast<K>>,
    state: watch::Sender<SyncState>,
}

async fn tick(resync: &mut Option<Interval>) {
    match resync {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

impl<K> NamespaceCache<K>
where
    K: Resource + Send + Sync + 'static,
{
    pub fn new(
        namespace: impl Into<String>,
        source: Arc<dyn ListWatch<K>>,
        opts: ListOptions,
        resync: Option<Duration>,
        handlers: Arc<Broadcast<K>>,
    ) -> Self {
        let (state, _) = watch::channel(SyncState::Pending);
        Self {
            namespace: namespace.into(),
            source,
            opts,
            resync,
            items: ArcSwap::from_pointee(ItemMap::default()),
            handlers,
            state,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn has_synced(&self) -> bool {
        matches!(*self.state.borrow(), SyncState::Synced)
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    pub fn list(&self) -> Vec<Arc<K>> {
        self.items.load().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lookup by key. Until the first list completes every lookup fails with
    /// [`StoreError::NotSynced`] rather than a misleading not-found.
    pub fn get(&self, key: &ObjectKey) -> Result<Arc<K>, StoreError> {
        if !self.has_synced() {
            return Err(StoreError::NotSynced(self.namespace.clone()));
        }
        self.items
            .load()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    /// Sync loop. Returns `Ok` on cancellation; any list/watch failure other
    /// than an expired resourceVersion ends this cache for good.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> Result<(), StoreError> {
        let res = self.sync(&cancel).await;
        if let Err(e) = &res {
            self.state.send_replace(SyncState::Failed(e.to_string()));
        }
        res
    }

    async fn sync(&self, cancel: &CancellationToken) -> Result<(), StoreError> {
        let Some(mut rv) = self.relist(cancel).await? else { return Ok(()) };
        let mut resync = self.resync.map(|p| {
            let mut t = interval_at(Instant::now() + p, p);
            t.set_missed_tick_behavior(MissedTickBehavior::Delay);
            t
        });

        'watch: loop {
            let opened = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                opened = self.source.watch(&self.opts, &rv) => opened,
            };
            let mut stream = match opened {
                Ok(s) => s,
                Err(e) if e.is_gone() => {
                    let Some(next) = self.relist(cancel).await? else { return Ok(()) };
                    rv = next;
                    continue 'watch;
                }
                Err(e) => return Err(e.into()),
            };

            loop {
                let ev = tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    _ = tick(&mut resync) => {
                        self.replay();
                        continue;
                    }
                    ev = stream.next() => ev,
                };
                match ev {
                    None => {
                        debug!(ns = %self.namespace, rv = %rv, "cache: watch closed, resuming");
                        continue 'watch;
                    }
                    Some(WatchEvent::Error(e)) if e.is_gone() => {
                        info!(ns = %self.namespace, "cache: resourceVersion expired, relisting");
                        let Some(next) = self.relist(cancel).await? else { return Ok(()) };
                        rv = next;
                        continue 'watch;
                    }
                    Some(WatchEvent::Error(e)) => return Err(e.into()),
                    Some(ev) => {
                        if let Some(next) = self.apply(ev) {
                            rv = next;
                        }
                    }
                }
            }
        }
    }

    /// List and replace the whole map, dispatching the differences.
    /// `None` when cancelled.
    async fn relist(&self, cancel: &CancellationToken) -> Result<Option<String>, StoreError> {
        let page = tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            page = self.source.list(&self.opts) => page?,
        };
        let mut next = ItemMap::default();
        for item in page.items {
            next.insert(object_key(&item), Arc::new(item));
        }
        let prev = self.items.swap(Arc::new(next));
        let current = self.items.load();

        for (key, obj) in current.iter() {
            match prev.get(key) {
                None => self.handlers.notify_add(obj),
                Some(old) if old.meta().resource_version != obj.meta().resource_version => {
                    self.handlers.notify_update(old, obj)
                }
                Some(_) => {}
            }
        }
        for (key, old) in prev.iter() {
            if !current.contains_key(key) {
                self.handlers.notify_delete(old);
            }
        }

        if self.state.send_replace(SyncState::Synced) != SyncState::Synced {
            info!(ns = %self.namespace, items = current.len(), "cache: synced");
        } else {
            debug!(ns = %self.namespace, items = current.len(), "cache: relisted");
        }
        Ok(Some(page.resource_version))
    }

    /// Apply one watch event; returns the object's resourceVersion.
    fn apply(&self, ev: WatchEvent<K>) -> Option<String> {
        let (label, obj, deleted) = match ev {
            WatchEvent::Added(o) => ("added", o, false),
            WatchEvent::Modified(o) => ("modified", o, false),
            WatchEvent::Deleted(o) => ("deleted", o, true),
            WatchEvent::Error(_) => return None,
        };
        counter!("fleet_watch_events_total", 1, "event" => label);
        let key = object_key(&obj);
        let rv = obj.meta().resource_version.clone();
        let obj = Arc::new(obj);

        let mut map = ItemMap::clone(&self.items.load());
        if deleted {
            let old = map.remove(&key);
            self.items.store(Arc::new(map));
            self.handlers.notify_delete(old.as_ref().unwrap_or(&obj));
        } else {
            let old = map.insert(key, Arc::clone(&obj));
            self.items.store(Arc::new(map));
            match old {
                Some(old) => self.handlers.notify_update(&old, &obj),
                None => self.handlers.notify_add(&obj),
            }
        }
        rv
    }

    /// Periodic resync: every cached object is re-delivered as an update.
    fn replay(&self) {
        let snapshot = self.items.load_full();
        debug!(ns = %self.namespace, items = snapshot.len(), "cache: resync");
        for obj in snapshot.values() {
            self.handlers.notify_update(obj, obj);
        }
    }
}
