//! Fleet kubehub: the API client boundary (list/watch/get/status writes),
//! namespace planning, deny-list filtering and label selector evaluation.

#![forbid(unsafe_code)]

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

pub mod client;
pub mod denylist;
pub mod entity;
#[cfg(feature = "testing")]
pub mod fake;
pub mod namespaces;
pub mod selector;

pub use client::{cluster_list_watch, namespaced_list_watch, KubeListWatch, KubeResources};
pub use denylist::deny_filtered;
pub use entity::{object_key, NamespacedEntity};
pub use namespaces::{plan_namespaces, NamespaceError, NamespacePlan};
pub use selector::SelectorError;

/// Server-side filters for list and watch calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    pub label_selector: Option<String>,
    pub field_selector: Option<String>,
}

impl ListOptions {
    pub fn labels(mut self, selector: impl Into<String>) -> Self {
        let s = selector.into();
        self.label_selector = if s.is_empty() { None } else { Some(s) };
        self
    }

    /// Append one clause to the field selector, comma-joined.
    pub fn push_field_clause(&mut self, clause: &str) {
        match self.field_selector.as_mut() {
            Some(existing) if !existing.is_empty() => {
                existing.push(',');
                existing.push_str(clause);
            }
            _ => self.field_selector = Some(clause.to_string()),
        }
    }
}

/// Caller-supplied tweak applied to list/watch options.
pub type ListModifier = Arc<dyn Fn(&mut ListOptions) + Send + Sync>;

/// One list response: items plus the collection resourceVersion to watch from.
#[derive(Debug, Clone)]
pub struct ObjectPage<K> {
    pub resource_version: String,
    pub items: Vec<K>,
}

#[derive(Debug, Clone)]
pub enum WatchEvent<K> {
    Added(K),
    Modified(K),
    Deleted(K),
    Error(ClientError),
}

impl<K> WatchEvent<K> {
    pub fn object(&self) -> Option<&K> {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => Some(o),
            WatchEvent::Error(_) => None,
        }
    }
}

pub type EventStream<K> = BoxStream<'static, WatchEvent<K>>;

/// List + watch over one namespace (or all namespaces when scoped to `""`).
#[async_trait]
pub trait ListWatch<K: Send + 'static>: Send + Sync {
    async fn list(&self, opts: &ListOptions) -> Result<ObjectPage<K>, ClientError>;

    /// Events strictly after `resource_version`. A stream ending without an
    /// error means the server closed the watch and it may be resumed.
    async fn watch(&self, opts: &ListOptions, resource_version: &str) -> Result<EventStream<K>, ClientError>;
}

/// Direct object access. Reads of cluster state go through the caches; this
/// is for writes and for the few live reads that must bypass them.
#[async_trait]
pub trait ResourceClient<K: Send + Sync + 'static>: Send + Sync {
    async fn list(&self, namespace: &str, opts: &ListOptions) -> Result<Vec<K>, ClientError>;

    async fn get(&self, namespace: &str, name: &str) -> Result<K, ClientError>;

    /// Replace the status subresource. Fails with [`ClientError::Conflict`]
    /// when `obj` carries a stale resourceVersion.
    async fn update_status(&self, obj: &K) -> Result<K, ClientError>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), ClientError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
pub enum ClientError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("gone: {0}")]
    Gone(String),
    #[error("api ({code}): {message}")]
    Api { code: u16, message: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("decode: {0}")]
    Decode(String),
}

impl ClientError {
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            404 => ClientError::NotFound(message),
            409 => ClientError::Conflict(message),
            410 => ClientError::Gone(message),
            _ => ClientError::Api { code, message },
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ClientError::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, ClientError::Conflict(_))
    }

    /// resourceVersion too old; the caller has to relist.
    pub fn is_gone(&self) -> bool {
        matches!(self, ClientError::Gone(_))
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Conflict(_) | ClientError::Gone(_) | ClientError::Transport(_) => true,
            ClientError::Api { code, .. } => *code >= 500 || *code == 429,
            ClientError::NotFound(_) | ClientError::Decode(_) => false,
        }
    }
}

impl From<kube::Error> for ClientError {
    fn from(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(resp) => ClientError::from_status(resp.code, resp.message),
            kube::Error::SerdeError(e) => ClientError::Decode(e.to_string()),
            other => ClientError::Transport(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Decode(e.to_string())
    }
}
