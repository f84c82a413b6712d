//! Deny-list wrapper around a [`ListWatch`] source.
//!
//! List results are filtered in place. Watches are proxied through a spawned
//! forwarding task that drops events for denied namespaces; the proxy's output
//! closes exactly once, when upstream ends or when the consumer drops it, and
//! the upstream watch is released before the task exits.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use fleet_core::NamespaceSet;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::debug;

use crate::{ClientError, EventStream, ListOptions, ListWatch, NamespacedEntity, ObjectPage, WatchEvent};

/// Capacity of the proxy channel. Small on purpose: a slow consumer stalls
/// its own namespace's stream rather than buffering it.
pub const DEFAULT_PROXY_BUFFER: usize = 16;

/// Wrap `upstream` so objects in `deny` are never observed. Returns
/// `upstream` itself when there is nothing to deny.
pub fn deny_filtered<K>(upstream: Arc<dyn ListWatch<K>>, deny: &NamespaceSet) -> Arc<dyn ListWatch<K>>
where
    K: NamespacedEntity + Send + Sync + 'static,
{
    deny_filtered_with_buffer(upstream, deny, DEFAULT_PROXY_BUFFER)
}

pub fn deny_filtered_with_buffer<K>(
    upstream: Arc<dyn ListWatch<K>>,
    deny: &NamespaceSet,
    buffer: usize,
) -> Arc<dyn ListWatch<K>>
where
    K: NamespacedEntity + Send + Sync + 'static,
{
    if deny.is_empty() {
        return upstream;
    }
    Arc::new(DenyListSource { upstream, deny: deny.clone(), buffer: buffer.max(1) })
}

pub struct DenyListSource<K> {
    upstream: Arc<dyn ListWatch<K>>,
    deny: NamespaceSet,
    buffer: usize,
}

#[async_trait]
impl<K> ListWatch<K> for DenyListSource<K>
where
    K: NamespacedEntity + Send + Sync + 'static,
{
    async fn list(&self, opts: &ListOptions) -> Result<ObjectPage<K>, ClientError> {
        let page = self.upstream.list(opts).await?;
        let before = page.items.len();
        let items: Vec<K> = page
            .items
            .into_iter()
            .filter(|o| !self.deny.contains(o.effective_namespace()))
            .collect();
        debug!(kept = items.len(), dropped = before - items.len(), "denylist: list filtered");
        Ok(ObjectPage { resource_version: page.resource_version, items })
    }

    async fn watch(&self, opts: &ListOptions, resource_version: &str) -> Result<EventStream<K>, ClientError> {
        let upstream = self.upstream.watch(opts, resource_version).await?;
        Ok(ProxyWatch::spawn(upstream, self.deny.clone(), self.buffer).boxed())
    }
}

/// Consumer side of a filtered watch. Dropping it cancels the forwarder.
pub struct ProxyWatch<K> {
    rx: mpsc::Receiver<WatchEvent<K>>,
    _cancel: DropGuard,
}

impl<K> ProxyWatch<K>
where
    K: NamespacedEntity + Send + 'static,
{
    pub fn spawn(upstream: EventStream<K>, deny: NamespaceSet, buffer: usize) -> Self {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let cancel = CancellationToken::new();
        tokio::spawn(forward(upstream, deny, tx, cancel.clone()));
        Self { rx, _cancel: cancel.drop_guard() }
    }
}

impl<K> Stream for ProxyWatch<K> {
    type Item = WatchEvent<K>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

async fn forward<K>(
    mut upstream: EventStream<K>,
    deny: NamespaceSet,
    tx: mpsc::Sender<WatchEvent<K>>,
    cancel: CancellationToken,
) where
    K: NamespacedEntity + Send + 'static,
{
    let mut forwarded = 0u64;
    let mut dropped = 0u64;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = upstream.next() => next,
        };
        let Some(ev) = next else { break };
        if let Some(obj) = ev.object() {
            if deny.contains(obj.effective_namespace()) {
                dropped += 1;
                continue;
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => break,
            sent = tx.send(ev) => if sent.is_err() { break },
        }
        forwarded += 1;
    }
    // Release the server-side watch before the output closes.
    drop(upstream);
    drop(tx);
    debug!(forwarded, dropped, "denylist: watch proxy stopped");
}
