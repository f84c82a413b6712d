//! Custom resources watched by the controllers.
//!
//! `Prometheus` and `PrometheusAgent` are sharded workloads; each shard is
//! materialized as one StatefulSet. `ServiceMonitor` is the dependent object
//! whose status lists the workloads that select it.

use std::fmt::Debug;

use fleet_core::{Condition, WorkloadStatus};
use fleet_kubehub::namespaced_entity;
use fleet_kubehub::NamespacedEntity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::NamespaceResourceScope;
use kube::{CustomResource, Resource};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "Prometheus",
    plural = "prometheuses",
    status = "WorkloadStatus",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shards: Option<i32>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_monitor_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_monitor_namespace_selector: Option<LabelSelector>,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1alpha1",
    kind = "PrometheusAgent",
    plural = "prometheusagents",
    status = "WorkloadStatus",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusAgentSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shards: Option<i32>,
    #[serde(default)]
    pub paused: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_monitor_selector: Option<LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_monitor_namespace_selector: Option<LabelSelector>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize)]
#[kube(
    group = "monitoring.coreos.com",
    version = "v1",
    kind = "ServiceMonitor",
    plural = "servicemonitors",
    status = "ServiceMonitorStatus",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_label: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    #[serde(default)]
    pub selector: LabelSelector,
}

/// One workload that selects the ServiceMonitor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadBinding {
    pub group: String,
    pub resource: String,
    pub name: String,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl WorkloadBinding {
    pub fn identity(&self) -> (&str, &str, &str, &str) {
        (&self.group, &self.resource, &self.namespace, &self.name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceMonitorStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<WorkloadBinding>,
}

namespaced_entity!(Prometheus, PrometheusAgent, ServiceMonitor);

/// A sharded workload kind.
pub trait Workload:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + NamespacedEntity
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Plural resource name, as recorded in ServiceMonitor bindings.
    const RESOURCE: &'static str;
    /// StatefulSet name prefix.
    const NAME_PREFIX: &'static str;

    /// Declared shard count, at least one.
    fn shards(&self) -> i32;
    /// Declared replicas per shard.
    fn replicas(&self) -> i32;
    fn paused(&self) -> bool;
    fn service_monitor_selector(&self) -> Option<&LabelSelector>;
    fn service_monitor_namespace_selector(&self) -> Option<&LabelSelector>;
    fn workload_status(&self) -> Option<&WorkloadStatus>;
    fn set_workload_status(&mut self, status: WorkloadStatus);
}

macro_rules! workload {
    ($ty:ty, $resource:literal, $prefix:literal) => {
        impl Workload for $ty {
            const RESOURCE: &'static str = $resource;
            const NAME_PREFIX: &'static str = $prefix;

            fn shards(&self) -> i32 {
                self.spec.shards.unwrap_or(1).max(1)
            }

            fn replicas(&self) -> i32 {
                self.spec.replicas.unwrap_or(1).max(0)
            }

            fn paused(&self) -> bool {
                self.spec.paused
            }

            fn service_monitor_selector(&self) -> Option<&LabelSelector> {
                self.spec.service_monitor_selector.as_ref()
            }

            fn service_monitor_namespace_selector(&self) -> Option<&LabelSelector> {
                self.spec.service_monitor_namespace_selector.as_ref()
            }

            fn workload_status(&self) -> Option<&WorkloadStatus> {
                self.status.as_ref()
            }

            fn set_workload_status(&mut self, status: WorkloadStatus) {
                self.status = Some(status);
            }
        }
    };
}

workload!(Prometheus, "prometheuses", "prometheus");
workload!(PrometheusAgent, "prometheusagents", "prom-agent");
