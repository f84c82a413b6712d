//! Fleet store: one watch-fed cache per effective namespace, presented as a
//! single logical cache.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fleet_core::ObjectKey;
use fleet_kubehub::denylist::{deny_filtered_with_buffer, DEFAULT_PROXY_BUFFER};
use fleet_kubehub::selector::{self, Labels};
use fleet_kubehub::{ClientError, ListWatch, NamespacePlan, NamespacedEntity, SelectorError};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::Resource;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub mod handlers;
pub mod informer;

pub use handlers::{Broadcast, EventHandler};
pub use informer::{NamespaceCache, SyncState};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("cache for namespace {0:?} has not synced")]
    NotSynced(String),
    #[error("cache for namespace {namespace:?} failed: {message}")]
    SyncFailed { namespace: String, message: String },
    #[error("cancelled while waiting for cache sync")]
    Cancelled,
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Selector(#[from] SelectorError),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_)) || matches!(self, StoreError::Client(e) if e.is_not_found())
    }
}

#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Replay period for handlers; `None` disables resync.
    pub resync: Option<Duration>,
    /// Capacity of each deny-list watch proxy.
    pub watch_buffer: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self { resync: None, watch_buffer: DEFAULT_PROXY_BUFFER }
    }
}

/// Per-namespace caches behind one List/Get/subscribe surface.
pub struct MultiNamespaceCache<K> {
    caches: Vec<Arc<NamespaceCache<K>>>,
    handlers: Arc<Broadcast<K>>,
    started: AtomicBool,
}

impl<K> MultiNamespaceCache<K>
where
    K: Resource + NamespacedEntity + Send + Sync + 'static,
{
    /// Build one cache per planned namespace. `source` yields the raw
    /// list/watch for a namespace; it is wrapped with the plan's deny-set.
    pub fn new<F>(plan: &NamespacePlan, source: F, options: CacheOptions) -> Self
    where
        F: Fn(&str) -> Arc<dyn ListWatch<K>>,
    {
        let handlers = Arc::new(Broadcast::new());
        let opts = plan.list_options();
        let caches = plan
            .namespaces
            .iter()
            .map(|ns| {
                let src = deny_filtered_with_buffer(source(ns), &plan.deny, options.watch_buffer);
                Arc::new(NamespaceCache::new(
                    ns.clone(),
                    src,
                    opts.clone(),
                    options.resync,
                    Arc::clone(&handlers),
                ))
            })
            .collect();
        Self { caches, handlers, started: AtomicBool::new(false) }
    }

    pub fn namespaces(&self) -> Vec<&str> {
        self.caches.iter().map(|c| c.namespace()).collect()
    }

    /// Spawn every cache's sync loop and return immediately. A failing loop
    /// is logged and stays down; restarting is left to the supervisor.
    pub fn start(&self, cancel: &CancellationToken) {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("cache: start called twice; ignoring");
            return;
        }
        for cache in &self.caches {
            let cache = Arc::clone(cache);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let ns = cache.namespace().to_string();
                match cache.run(cancel).await {
                    Ok(()) => info!(ns = %ns, "cache: sync loop stopped"),
                    Err(e) => error!(ns = %ns, error = %e, "cache: sync loop failed"),
                }
            });
        }
    }

    pub fn has_synced(&self) -> bool {
        self.caches.iter().all(|c| c.has_synced())
    }

    /// Block until every cache has listed once. Fails fast when any cache
    /// reports a failed sync loop.
    pub async fn wait_for_sync(&self, cancel: &CancellationToken) -> Result<(), StoreError> {
        for cache in &self.caches {
            let mut rx = cache.subscribe_state();
            loop {
                let state = rx.borrow_and_update().clone();
                match state {
                    SyncState::Synced => break,
                    SyncState::Failed(message) => {
                        return Err(StoreError::SyncFailed { namespace: cache.namespace().to_string(), message })
                    }
                    SyncState::Pending => {}
                }
                tokio::select! {
                    _ = cancel.cancelled() => return Err(StoreError::Cancelled),
                    changed = rx.changed() => if changed.is_err() {
                        return Err(StoreError::SyncFailed {
                            namespace: cache.namespace().to_string(),
                            message: "cache dropped".into(),
                        });
                    },
                }
            }
        }
        Ok(())
    }

    /// Every cached object across namespaces; no cross-namespace order.
    pub fn list(&self) -> Vec<Arc<K>> {
        self.caches.iter().flat_map(|c| c.list()).collect()
    }

    pub fn list_matching(&self, sel: &LabelSelector) -> Result<Vec<Arc<K>>, StoreError> {
        selector::validate(sel)?;
        let mut out = Vec::new();
        for obj in self.list() {
            let labels: Labels = obj.meta().labels.clone().unwrap_or_default();
            if selector::matches(sel, &labels)? {
                out.push(obj);
            }
        }
        Ok(out)
    }

    /// First hit across caches. Not-found only when every cache says so; any
    /// other error stops the lookup.
    pub fn get(&self, key: &ObjectKey) -> Result<Arc<K>, StoreError> {
        for cache in &self.caches {
            match cache.get(key) {
                Ok(obj) => return Ok(obj),
                Err(StoreError::NotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(StoreError::NotFound(key.to_string()))
    }

    /// Register once; every namespace's cache delivers to it.
    pub fn add_event_handler(&self, handler: Arc<dyn EventHandler<K>>) {
        self.handlers.subscribe(handler);
    }
}
