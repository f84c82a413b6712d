//! Worker pool shared by the controllers.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use fleet_core::ObjectKey;
use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::queue::WorkQueue;

/// One unit of controller work, keyed by object.
#[async_trait]
pub trait Reconcile: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn reconcile(&self, key: &ObjectKey) -> Result<()>;
}

/// Run `workers` loops over `queue` until `cancel` fires. An item in flight
/// when cancellation arrives is abandoned.
pub async fn run_workers<R: Reconcile>(
    ctrl: Arc<R>,
    queue: Arc<WorkQueue<ObjectKey>>,
    workers: usize,
    cancel: CancellationToken,
) {
    let mut handles = Vec::with_capacity(workers);
    for id in 0..workers.max(1) {
        let ctrl = Arc::clone(&ctrl);
        let queue = Arc::clone(&queue);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move { worker_loop(id, ctrl, queue, cancel).await }));
    }
    cancel.cancelled().await;
    queue.shut_down();
    for h in handles {
        let _ = h.await;
    }
    info!(controller = ctrl.name(), "worker pool stopped");
}

async fn worker_loop<R: Reconcile>(
    id: usize,
    ctrl: Arc<R>,
    queue: Arc<WorkQueue<ObjectKey>>,
    cancel: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = queue.get() => next,
        };
        let Some(key) = next else { break };
        let started = Instant::now();
        let res = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(controller = ctrl.name(), key = %key, "abandoned on shutdown");
                queue.done(&key);
                break;
            }
            res = ctrl.reconcile(&key) => res,
        };
        histogram!("fleet_reconcile_ms", started.elapsed().as_secs_f64() * 1000.0, "controller" => ctrl.name());
        match res {
            Ok(()) => queue.forget(&key),
            Err(e) if e.is_not_found() => {
                debug!(controller = ctrl.name(), key = %key, "object gone; dropping");
                queue.forget(&key);
            }
            Err(e) => {
                counter!("fleet_reconcile_errors_total", 1, "controller" => ctrl.name());
                warn!(
                    controller = ctrl.name(),
                    worker = id,
                    key = %key,
                    error = %e,
                    retryable = e.is_retryable(),
                    retries = queue.num_requeues(&key),
                    "reconcile failed; requeueing with backoff"
                );
                queue.add_rate_limited(key.clone());
            }
        }
        queue.done(&key);
    }
}
