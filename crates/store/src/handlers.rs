//! Event handler registry shared by every per-namespace cache.

use std::sync::Arc;

use arc_swap::ArcSwap;

/// Receives cache notifications. Handlers must tolerate replays: each
/// per-namespace cache resyncs on its own period and relists after a
/// watch expires.
pub trait EventHandler<K>: Send + Sync {
    fn on_add(&self, obj: &Arc<K>);

    fn on_update(&self, _old: &Arc<K>, new: &Arc<K>) {
        self.on_add(new);
    }

    fn on_delete(&self, _obj: &Arc<K>) {}
}

/// Subscription list owned by the aggregator and handed to each cache.
pub struct Broadcast<K> {
    handlers: ArcSwap<Vec<Arc<dyn EventHandler<K>>>>,
}

impl<K> Default for Broadcast<K> {
    fn default() -> Self {
        Self { handlers: ArcSwap::from_pointee(Vec::new()) }
    }
}

impl<K> Broadcast<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, handler: Arc<dyn EventHandler<K>>) {
        self.handlers.rcu(|cur| {
            let mut next = Vec::with_capacity(cur.len() + 1);
            next.extend(cur.iter().cloned());
            next.push(Arc::clone(&handler));
            next
        });
    }

    pub fn len(&self) -> usize {
        self.handlers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn notify_add(&self, obj: &Arc<K>) {
        for h in self.handlers.load().iter() {
            h.on_add(obj);
        }
    }

    pub fn notify_update(&self, old: &Arc<K>, new: &Arc<K>) {
        for h in self.handlers.load().iter() {
            h.on_update(old, new);
        }
    }

    pub fn notify_delete(&self, obj: &Arc<K>) {
        for h in self.handlers.load().iter() {
            h.on_delete(obj);
        }
    }
}
