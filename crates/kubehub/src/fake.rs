//! In-memory API for tests: list, watch with replay from a resourceVersion,
//! status writes with optimistic concurrency, and injectable failures.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use fleet_core::ObjectKey;
use futures::StreamExt;
use kube::Resource;
use tokio::sync::mpsc;

use crate::selector::{self, Labels};
use crate::{
    object_key, ClientError, EventStream, ListOptions, ListWatch, ObjectPage, ResourceClient, WatchEvent,
};

struct Watcher<K> {
    namespace: String,
    opts: ListOptions,
    tx: mpsc::UnboundedSender<WatchEvent<K>>,
}

struct State<K> {
    objects: Vec<(ObjectKey, K)>,
    rv: u64,
    compacted: u64,
    log: Vec<(u64, WatchEvent<K>)>,
    watchers: Vec<Watcher<K>>,
    list_errors: VecDeque<ClientError>,
    status_errors: VecDeque<ClientError>,
}

pub struct FakeCluster<K> {
    state: Mutex<State<K>>,
    status_writes: AtomicUsize,
    deletes: AtomicUsize,
    lists: AtomicUsize,
}

fn labels_of<K: Resource>(obj: &K) -> Labels {
    obj.meta().labels.clone().unwrap_or_default()
}

fn field_matches<K: Resource>(field_selector: &str, obj: &K) -> Result<bool, ClientError> {
    let meta = obj.meta();
    for clause in field_selector.split(',').map(str::trim).filter(|c| !c.is_empty()) {
        let (field, negate, value) = if let Some((f, v)) = clause.split_once("!=") {
            (f, true, v)
        } else if let Some((f, v)) = clause.split_once("==").or_else(|| clause.split_once('=')) {
            (f, false, v)
        } else {
            return Err(ClientError::Api { code: 400, message: format!("invalid field selector {:?}", clause) });
        };
        let actual = match field.trim() {
            "metadata.namespace" => meta.namespace.as_deref().unwrap_or(""),
            "metadata.name" => meta.name.as_deref().unwrap_or(""),
            other => {
                return Err(ClientError::Api { code: 400, message: format!("field {:?} is not supported", other) })
            }
        };
        if (actual == value.trim()) == negate {
            return Ok(false);
        }
    }
    Ok(true)
}

fn selected<K: Resource>(namespace: &str, opts: &ListOptions, obj: &K) -> Result<bool, ClientError> {
    if !namespace.is_empty() && obj.meta().namespace.as_deref() != Some(namespace) {
        return Ok(false);
    }
    if let Some(q) = opts.label_selector.as_deref() {
        let ok = selector::matches_query(q, &labels_of(obj))
            .map_err(|e| ClientError::Api { code: 400, message: e.to_string() })?;
        if !ok {
            return Ok(false);
        }
    }
    if let Some(f) = opts.field_selector.as_deref() {
        return field_matches(f, obj);
    }
    Ok(true)
}

impl<K> FakeCluster<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                objects: Vec::new(),
                rv: 0,
                compacted: 0,
                log: Vec::new(),
                watchers: Vec::new(),
                list_errors: VecDeque::new(),
                status_errors: VecDeque::new(),
            }),
            status_writes: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
            lists: AtomicUsize::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A list/watch view scoped to `namespace` (`""` = all namespaces).
    pub fn list_watch(self: &Arc<Self>, namespace: &str) -> Arc<dyn ListWatch<K>> {
        Arc::new(FakeView { cluster: Arc::clone(self), namespace: namespace.to_string() })
    }

    /// Create or replace an object; assigns a fresh resourceVersion (and a
    /// uid when missing) and notifies watchers.
    pub fn apply(&self, mut obj: K) -> K {
        let key = object_key(&obj);
        let mut st = self.lock();
        st.rv += 1;
        let rv = st.rv;
        let meta = obj.meta_mut();
        meta.resource_version = Some(rv.to_string());
        if meta.uid.is_none() {
            meta.uid = Some(format!("uid-{}", rv));
        }
        let ev = match st.objects.iter().position(|(k, _)| *k == key) {
            Some(idx) => {
                st.objects[idx].1 = obj.clone();
                WatchEvent::Modified(obj.clone())
            }
            None => {
                st.objects.push((key, obj.clone()));
                WatchEvent::Added(obj.clone())
            }
        };
        Self::emit(&mut st, rv, ev);
        obj
    }

    pub fn remove(&self, key: &ObjectKey) -> Option<K> {
        let mut st = self.lock();
        let idx = st.objects.iter().position(|(k, _)| k == key)?;
        let (_, mut obj) = st.objects.remove(idx);
        st.rv += 1;
        let rv = st.rv;
        obj.meta_mut().resource_version = Some(rv.to_string());
        Self::emit(&mut st, rv, WatchEvent::Deleted(obj.clone()));
        Some(obj)
    }

    fn emit(st: &mut State<K>, rv: u64, ev: WatchEvent<K>) {
        if let Some(obj) = ev.object() {
            st.watchers.retain(|w| {
                if w.tx.is_closed() {
                    return false;
                }
                if selected(&w.namespace, &w.opts, obj).unwrap_or(false) {
                    let _ = w.tx.send(ev.clone());
                }
                true
            });
        }
        st.log.push((rv, ev));
    }

    pub fn object(&self, key: &ObjectKey) -> Option<K> {
        self.lock().objects.iter().find(|(k, _)| k == key).map(|(_, o)| o.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn list_calls(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }

    /// Watches whose consumer is still alive.
    pub fn active_watches(&self) -> usize {
        let mut st = self.lock();
        st.watchers.retain(|w| !w.tx.is_closed());
        st.watchers.len()
    }

    pub fn fail_next_list(&self, err: ClientError) {
        self.lock().list_errors.push_back(err);
    }

    pub fn fail_next_status_update(&self, err: ClientError) {
        self.lock().status_errors.push_back(err);
    }

    /// Drop the event history: watches from older versions now fail with `Gone`.
    pub fn compact(&self) {
        let mut st = self.lock();
        st.compacted = st.rv;
        st.log.clear();
    }

    /// Terminate every open watch with a `Gone` error, forcing a relist.
    pub fn expire_watches(&self) {
        let mut st = self.lock();
        st.compacted = st.rv;
        st.log.clear();
        for w in st.watchers.drain(..) {
            let _ = w.tx.send(WatchEvent::Error(ClientError::Gone("too old resource version".into())));
        }
    }

    fn list_scoped(&self, namespace: &str, opts: &ListOptions) -> Result<(u64, Vec<K>), ClientError> {
        self.lists.fetch_add(1, Ordering::SeqCst);
        let mut st = self.lock();
        if let Some(err) = st.list_errors.pop_front() {
            return Err(err);
        }
        let mut items = Vec::new();
        for (_, obj) in st.objects.iter() {
            if selected(namespace, opts, obj)? {
                items.push(obj.clone());
            }
        }
        Ok((st.rv, items))
    }

    fn watch_scoped(&self, namespace: &str, opts: &ListOptions, resource_version: &str) -> Result<EventStream<K>, ClientError> {
        let mut st = self.lock();
        let from = if resource_version.is_empty() {
            st.rv
        } else {
            resource_version
                .parse::<u64>()
                .map_err(|_| ClientError::Api { code: 400, message: format!("bad resourceVersion {:?}", resource_version) })?
        };
        if from < st.compacted {
            return Err(ClientError::Gone(format!("resourceVersion {} is older than {}", from, st.compacted)));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        for (rv, ev) in st.log.iter() {
            if *rv <= from {
                continue;
            }
            if let Some(obj) = ev.object() {
                if selected(namespace, opts, obj)? {
                    let _ = tx.send(ev.clone());
                }
            }
        }
        st.watchers.push(Watcher { namespace: namespace.to_string(), opts: opts.clone(), tx });
        let stream = futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|ev| (ev, rx)) });
        Ok(stream.boxed())
    }
}

struct FakeView<K> {
    cluster: Arc<FakeCluster<K>>,
    namespace: String,
}

#[async_trait]
impl<K> ListWatch<K> for FakeView<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    async fn list(&self, opts: &ListOptions) -> Result<ObjectPage<K>, ClientError> {
        let (rv, items) = self.cluster.list_scoped(&self.namespace, opts)?;
        Ok(ObjectPage { resource_version: rv.to_string(), items })
    }

    async fn watch(&self, opts: &ListOptions, resource_version: &str) -> Result<EventStream<K>, ClientError> {
        self.cluster.watch_scoped(&self.namespace, opts, resource_version)
    }
}

#[async_trait]
impl<K> ResourceClient<K> for FakeCluster<K>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
{
    async fn list(&self, namespace: &str, opts: &ListOptions) -> Result<Vec<K>, ClientError> {
        self.list_scoped(namespace, opts).map(|(_, items)| items)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<K, ClientError> {
        let key = ObjectKey::new(Some(namespace), name);
        self.object(&key).ok_or_else(|| ClientError::NotFound(key.to_string()))
    }

    async fn update_status(&self, obj: &K) -> Result<K, ClientError> {
        let key = object_key(obj);
        {
            let mut st = self.lock();
            if let Some(err) = st.status_errors.pop_front() {
                return Err(err);
            }
            let stored = st
                .objects
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, o)| o.meta().resource_version.clone())
                .ok_or_else(|| ClientError::NotFound(key.to_string()))?;
            if stored != obj.meta().resource_version {
                return Err(ClientError::Conflict(format!(
                    "{}: resourceVersion {:?} is stale (current {:?})",
                    key,
                    obj.meta().resource_version,
                    stored
                )));
            }
        }
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(self.apply(obj.clone()))
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ClientError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.remove(&ObjectKey::new(Some(namespace), name));
        Ok(())
    }
}

/// Labels helper for building fixtures.
pub fn labels(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
    Some(pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect())
}
