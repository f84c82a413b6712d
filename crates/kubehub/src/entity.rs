//! Namespace capability used by filtering code.
//!
//! `Namespace` objects are cluster-scoped, so their `metadata.namespace` is
//! empty; for filtering they stand for themselves. Every other kind reports
//! its `metadata.namespace`.

use fleet_core::ObjectKey;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod, Secret};
use kube::core::DynamicObject;
use kube::Resource;

pub trait NamespacedEntity {
    /// Namespace used for allow/deny decisions; `""` when none applies.
    fn effective_namespace(&self) -> &str;
}

impl NamespacedEntity for Namespace {
    fn effective_namespace(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("")
    }
}

impl NamespacedEntity for DynamicObject {
    fn effective_namespace(&self) -> &str {
        let is_namespace = self.types.as_ref().map(|t| t.kind == "Namespace").unwrap_or(false);
        if is_namespace {
            self.metadata.name.as_deref().unwrap_or("")
        } else {
            self.metadata.namespace.as_deref().unwrap_or("")
        }
    }
}

/// Implement [`NamespacedEntity`] from `metadata.namespace` for namespaced kinds.
#[macro_export]
macro_rules! namespaced_entity {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::NamespacedEntity for $ty {
                fn effective_namespace(&self) -> &str {
                    ::kube::Resource::meta(self).namespace.as_deref().unwrap_or("")
                }
            }
        )+
    };
}

namespaced_entity!(Pod, StatefulSet, ConfigMap, Secret);

/// Cache/queue key for any object.
pub fn object_key<K: Resource>(obj: &K) -> ObjectKey {
    let meta = obj.meta();
    ObjectKey::new(meta.namespace.as_deref(), meta.name.as_deref().unwrap_or(""))
}
