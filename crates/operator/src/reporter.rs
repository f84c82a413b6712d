//! Pod-level view of one StatefulSet.

use fleet_kubehub::selector;
use fleet_kubehub::{ListOptions, ResourceClient};
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;

use crate::error::{Error, Result};

/// Label carrying the StatefulSet revision a pod was created from.
pub const REVISION_LABEL: &str = "controller-revision-hash";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodReport {
    pub name: String,
    pub ready: bool,
    pub updated: bool,
    message: String,
}

impl PodReport {
    fn from_pod(pod: &Pod, update_revision: Option<&str>) -> Self {
        let ready = is_ready(pod);
        let updated = match update_revision {
            Some(rev) => pod.metadata.labels.as_ref().and_then(|l| l.get(REVISION_LABEL)).map(String::as_str) == Some(rev),
            None => false,
        };
        Self {
            name: pod.metadata.name.clone().unwrap_or_default(),
            ready,
            updated,
            message: if ready { String::new() } else { diagnose(pod) },
        }
    }

    /// Empty when the pod is healthy.
    pub fn message(&self) -> &str {
        &self.message
    }
}

fn is_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .and_then(|cs| cs.iter().find(|c| c.type_ == "Ready"))
        .map_or(false, |c| c.status == "True")
}

fn diagnose(pod: &Pod) -> String {
    let Some(status) = pod.status.as_ref() else {
        return "pod has no status".to_string();
    };
    let containers = status
        .init_container_statuses
        .iter()
        .flatten()
        .chain(status.container_statuses.iter().flatten());
    for cs in containers {
        let Some(state) = cs.state.as_ref() else { continue };
        if let Some(w) = &state.waiting {
            let reason = w.reason.as_deref().unwrap_or("Waiting");
            return match w.message.as_deref() {
                Some(m) if !m.is_empty() => format!("container {}: {}: {}", cs.name, reason, m),
                _ => format!("container {}: {}", cs.name, reason),
            };
        }
        if let Some(t) = state.terminated.as_ref().filter(|t| t.exit_code != 0) {
            let reason = t.reason.as_deref().unwrap_or("Terminated");
            return format!("container {}: {} (exit code {})", cs.name, reason, t.exit_code);
        }
    }
    status
        .conditions
        .iter()
        .flatten()
        .find(|c| c.status != "True" && c.message.as_deref().map_or(false, |m| !m.is_empty()))
        .and_then(|c| c.message.clone())
        .unwrap_or_else(|| "pod is not ready".to_string())
}

fn owned_by(pod: &Pod, sts: &StatefulSet) -> bool {
    let uid = sts.metadata.uid.as_deref();
    let name = sts.metadata.name.as_deref();
    pod.metadata.owner_references.iter().flatten().any(|r| {
        r.kind == "StatefulSet" && (uid.map_or(false, |u| r.uid == u) || (r.uid.is_empty() && Some(r.name.as_str()) == name))
    })
}

pub struct StatefulSetReporter {
    pods: Vec<PodReport>,
}

impl StatefulSetReporter {
    /// Fetch the StatefulSet's pods live. Fails as a whole when the pods
    /// cannot be listed.
    pub async fn new(client: &dyn ResourceClient<Pod>, sts: &StatefulSet) -> Result<Self> {
        let namespace = sts.metadata.namespace.as_deref().unwrap_or("");
        let sel = sts.spec.as_ref().map(|s| &s.selector).ok_or_else(|| Error::Invalid {
            kind: "StatefulSet",
            key: sts.metadata.name.clone().unwrap_or_default(),
            message: "missing spec".into(),
        })?;
        let opts = ListOptions::default().labels(selector::to_query(sel)?);
        let pods = client.list(namespace, &opts).await?;
        Ok(Self::from_pods(sts, &pods))
    }

    pub fn from_pods(sts: &StatefulSet, pods: &[Pod]) -> Self {
        let revision = sts.status.as_ref().and_then(|s| s.update_revision.as_deref());
        let pods = pods
            .iter()
            .filter(|p| owned_by(p, sts))
            .map(|p| PodReport::from_pod(p, revision))
            .collect();
        Self { pods }
    }

    pub fn pods(&self) -> &[PodReport] {
        &self.pods
    }

    pub fn ready_pods(&self) -> Vec<&PodReport> {
        self.pods.iter().filter(|p| p.ready).collect()
    }

    /// Pods count as available as soon as they are ready.
    pub fn available_pods(&self) -> Vec<&PodReport> {
        self.ready_pods()
    }

    pub fn updated_pods(&self) -> Vec<&PodReport> {
        self.pods.iter().filter(|p| p.updated).collect()
    }
}
