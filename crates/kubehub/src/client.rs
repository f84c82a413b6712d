//! kube-rs backed implementations of [`ListWatch`] and [`ResourceClient`].

use std::fmt::Debug;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, ListParams, PostParams, WatchEvent as KubeEvent, WatchParams};
use kube::{Client, Resource};
use metrics::counter;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::{ClientError, EventStream, ListOptions, ListWatch, ObjectPage, ResourceClient, WatchEvent};

/// Server-side watch timeout; must stay below the apiserver's 295s cap.
const WATCH_TIMEOUT_SECS: u32 = 290;

fn list_params(opts: &ListOptions) -> ListParams {
    let mut lp = ListParams::default();
    if let Some(l) = opts.label_selector.as_deref() {
        lp = lp.labels(l);
    }
    if let Some(f) = opts.field_selector.as_deref() {
        lp = lp.fields(f);
    }
    lp
}

fn watch_params(opts: &ListOptions, timeout: u32) -> WatchParams {
    let mut wp = WatchParams::default().timeout(timeout);
    if let Some(l) = opts.label_selector.as_deref() {
        wp = wp.labels(l);
    }
    if let Some(f) = opts.field_selector.as_deref() {
        wp = wp.fields(f);
    }
    wp
}

/// List/watch over a prepared `Api<K>` (namespaced or cluster-wide).
pub struct KubeListWatch<K> {
    api: Api<K>,
    scope: String,
}

impl<K> KubeListWatch<K> {
    pub fn new(api: Api<K>, scope: impl Into<String>) -> Self {
        Self { api, scope: scope.into() }
    }
}

/// Source for a namespaced kind in `namespace` (`""` = all namespaces).
pub fn namespaced_list_watch<K>(client: &Client, namespace: &str) -> Arc<dyn ListWatch<K>>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static,
{
    let api = if namespace.is_empty() {
        Api::all(client.clone())
    } else {
        Api::namespaced(client.clone(), namespace)
    };
    Arc::new(KubeListWatch::new(api, namespace))
}

/// Source for a cluster-scoped kind such as `Namespace`.
pub fn cluster_list_watch<K>(client: &Client) -> Arc<dyn ListWatch<K>>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    Arc::new(KubeListWatch::new(Api::all(client.clone()), ""))
}

#[async_trait]
impl<K> ListWatch<K> for KubeListWatch<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    async fn list(&self, opts: &ListOptions) -> Result<ObjectPage<K>, ClientError> {
        let list = self.api.list(&list_params(opts)).await?;
        counter!("fleet_list_calls_total", 1, "scope" => self.scope.clone());
        debug!(scope = %self.scope, items = list.items.len(), "kube: list ok");
        Ok(ObjectPage {
            resource_version: list.metadata.resource_version.unwrap_or_default(),
            items: list.items,
        })
    }

    async fn watch(&self, opts: &ListOptions, resource_version: &str) -> Result<EventStream<K>, ClientError> {
        let stream = self
            .api
            .watch(&watch_params(opts, WATCH_TIMEOUT_SECS), resource_version)
            .await?;
        debug!(scope = %self.scope, rv = %resource_version, "kube: watch opened");
        let mapped = stream.filter_map(|res| async move {
            match res {
                Ok(KubeEvent::Added(o)) => Some(WatchEvent::Added(o)),
                Ok(KubeEvent::Modified(o)) => Some(WatchEvent::Modified(o)),
                Ok(KubeEvent::Deleted(o)) => Some(WatchEvent::Deleted(o)),
                Ok(KubeEvent::Bookmark(_)) => None,
                Ok(KubeEvent::Error(resp)) => Some(WatchEvent::Error(ClientError::from_status(resp.code, resp.message))),
                Err(e) => Some(WatchEvent::Error(e.into())),
            }
        });
        Ok(mapped.boxed())
    }
}

/// Object access for a namespaced kind across the whole cluster.
pub struct KubeResources<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeResources<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()> + Clone + DeserializeOwned + Debug,
{
    pub fn new(client: Client) -> Self {
        Self { client, _kind: PhantomData }
    }

    fn api(&self, namespace: &str) -> Api<K> {
        if namespace.is_empty() {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }
}

#[async_trait]
impl<K> ResourceClient<K> for KubeResources<K>
where
    K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + DeserializeOwned
        + Serialize
        + Debug
        + Send
        + Sync
        + 'static,
{
    async fn list(&self, namespace: &str, opts: &ListOptions) -> Result<Vec<K>, ClientError> {
        Ok(self.api(namespace).list(&list_params(opts)).await?.items)
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<K, ClientError> {
        Ok(self.api(namespace).get(name).await?)
    }

    async fn update_status(&self, obj: &K) -> Result<K, ClientError> {
        let meta = obj.meta();
        let name = meta
            .name
            .as_deref()
            .ok_or_else(|| ClientError::Decode("object missing metadata.name".into()))?;
        let namespace = meta.namespace.as_deref().unwrap_or("");
        let data = serde_json::to_vec(obj)?;
        let updated = self
            .api(namespace)
            .replace_status(name, &PostParams::default(), data)
            .await?;
        Ok(updated)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ClientError> {
        match self.api(namespace).delete(name, &DeleteParams::background()).await {
            Ok(_) => Ok(()),
            Err(e) => match ClientError::from(e) {
                ClientError::NotFound(_) => Ok(()),
                other => Err(other),
            },
        }
    }
}
