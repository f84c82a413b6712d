//! Fleet core types: object keys, namespace sets, reconciliation outcomes and
//! the status shapes published onto workloads.

#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod conditions;

pub use conditions::{Condition, ConditionStatus, ConditionType};

pub mod prelude {
    pub use super::{
        Condition, ConditionStatus, ConditionType, NamespaceSet, ObjectKey, ReconciliationOutcome,
        ShardStatus, WorkloadStatus, ALL_NAMESPACES,
    };
}

/// Sentinel namespace meaning "every namespace".
pub const ALL_NAMESPACES: &str = "";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KeyError {
    #[error("empty object key")]
    Empty,
    #[error("malformed object key: {0}")]
    Malformed(String),
}

/// `namespace/name` for namespaced objects, bare `name` for cluster-scoped ones.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        match namespace {
            Some(ns) if !ns.is_empty() => Self(format!("{}/{}", ns, name)),
            _ => Self(name.to_string()),
        }
    }

    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self::new(Some(namespace), name)
    }

    pub fn cluster(name: &str) -> Self {
        Self(name.to_string())
    }

    pub fn namespace(&self) -> Option<&str> {
        self.0.split_once('/').map(|(ns, _)| ns)
    }

    pub fn name(&self) -> &str {
        match self.0.split_once('/') {
            Some((_, name)) => name,
            None => &self.0,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ObjectKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(KeyError::Empty);
        }
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [name] if !name.is_empty() => Ok(Self::cluster(name)),
            [ns, name] if !ns.is_empty() && !name.is_empty() => Ok(Self::namespaced(ns, name)),
            _ => Err(KeyError::Malformed(s.to_string())),
        }
    }
}

/// A set of namespace names. `""` stands for all namespaces and is only
/// meaningful on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSet(BTreeSet<String>);

impl NamespaceSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self(BTreeSet::from([ALL_NAMESPACES.to_string()]))
    }

    /// Parse a comma separated list (`"a, b,c"`); blank entries are skipped.
    pub fn parse_list(s: &str) -> Self {
        s.split(',').map(str::trim).filter(|t| !t.is_empty()).collect()
    }

    pub fn insert(&mut self, ns: impl Into<String>) -> bool {
        self.0.insert(ns.into())
    }

    pub fn contains(&self, ns: &str) -> bool {
        self.0.contains(ns)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Exactly `{""}`.
    pub fn is_all_namespaces(&self) -> bool {
        self.0.len() == 1 && self.0.contains(ALL_NAMESPACES)
    }

    /// `""` combined with explicit names, which is never valid.
    pub fn mixes_all_namespaces(&self) -> bool {
        self.0.len() > 1 && self.0.contains(ALL_NAMESPACES)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for NamespaceSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for NamespaceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = self
            .iter()
            .map(|ns| if ns.is_empty() { "(all)" } else { ns })
            .collect();
        f.write_str(&parts.join(","))
    }
}

/// Last reconciliation result recorded for one object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciliationOutcome {
    pub ok: bool,
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShardStatus {
    pub shard_id: String,
    pub replicas: i32,
    pub updated_replicas: i32,
    pub available_replicas: i32,
    pub unavailable_replicas: i32,
}

impl ShardStatus {
    pub fn new(shard: i32) -> Self {
        Self { shard_id: shard.to_string(), ..Default::default() }
    }
}

/// Status subresource of a sharded workload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadStatus {
    #[serde(default)]
    pub paused: bool,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub updated_replicas: i32,
    #[serde(default)]
    pub available_replicas: i32,
    #[serde(default)]
    pub unavailable_replicas: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub shard_statuses: Vec<ShardStatus>,
}

impl WorkloadStatus {
    pub fn condition(&self, type_: ConditionType) -> Option<&Condition> {
        conditions::find(&self.conditions, type_)
    }
}
