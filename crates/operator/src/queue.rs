//! Deduplicating, rate-limited work queue.
//!
//! An item is in at most one of three places: waiting in the FIFO, being
//! processed, or both dirty and processing (re-added mid-flight). A dirty item
//! that is being processed is queued again only when `done` is called, so no
//! two workers ever hold the same item.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use metrics::gauge;
use rustc_hash::{FxHashMap, FxHashSet};
use tokio::sync::Notify;

struct Inner<T> {
    queue: VecDeque<T>,
    dirty: FxHashSet<T>,
    processing: FxHashSet<T>,
    failures: FxHashMap<T, u32>,
    shutting_down: bool,
}

pub struct WorkQueue<T> {
    name: &'static str,
    inner: Mutex<Inner<T>>,
    notify: Notify,
    base: Duration,
    max: Duration,
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    pub fn new(name: &'static str, base: Duration, max: Duration) -> Arc<Self> {
        Arc::new(Self {
            name,
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                dirty: FxHashSet::default(),
                processing: FxHashSet::default(),
                failures: FxHashMap::default(),
                shutting_down: false,
            }),
            notify: Notify::new(),
            base,
            max: max.max(base),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn add(&self, item: T) {
        let mut inner = self.lock();
        if inner.shutting_down || inner.dirty.contains(&item) {
            return;
        }
        inner.dirty.insert(item.clone());
        if inner.processing.contains(&item) {
            return;
        }
        inner.queue.push_back(item);
        gauge!("fleet_queue_depth", inner.queue.len() as f64, "queue" => self.name);
        drop(inner);
        self.notify.notify_one();
    }

    /// Wait for the next item; `None` once the queue is shut down.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.lock();
                if let Some(item) = inner.queue.pop_front() {
                    inner.dirty.remove(&item);
                    inner.processing.insert(item.clone());
                    gauge!("fleet_queue_depth", inner.queue.len() as f64, "queue" => self.name);
                    if !inner.queue.is_empty() {
                        self.notify.notify_one();
                    }
                    return Some(item);
                }
                if inner.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Finish processing `item`; requeue it if it was added meanwhile.
    pub fn done(&self, item: &T) {
        let mut inner = self.lock();
        inner.processing.remove(item);
        if inner.dirty.contains(item) {
            inner.queue.push_back(item.clone());
            gauge!("fleet_queue_depth", inner.queue.len() as f64, "queue" => self.name);
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Delay before the next retry of an item that failed `failures` times.
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32.checked_shl(failures.min(31)).unwrap_or(u32::MAX);
        self.base.checked_mul(factor).map_or(self.max, |d| d.min(self.max))
    }

    /// Re-add after an exponential delay (`base * 2^failures`, capped).
    pub fn add_rate_limited(self: &Arc<Self>, item: T) {
        let delay = {
            let mut inner = self.lock();
            let failures = inner.failures.entry(item.clone()).or_insert(0);
            let delay = self.backoff(*failures);
            *failures = failures.saturating_add(1);
            delay
        };
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(item);
        });
    }

    /// Reset the failure count after a success.
    pub fn forget(&self, item: &T) {
        self.lock().failures.remove(item);
    }

    pub fn num_requeues(&self, item: &T) -> u32 {
        self.lock().failures.get(item).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }
}
