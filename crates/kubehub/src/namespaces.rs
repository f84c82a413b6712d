//! Allow/deny namespace planning.
//!
//! The allow-set and deny-set are mutually exclusive. When the allow-set is
//! the all-namespaces sentinel the deny-set is enforced, both server-side (a
//! `metadata.namespace!=X` field selector per denied namespace) and by the
//! deny-list source wrapper. When the allow-set names namespaces explicitly
//! the deny-set is ignored.

use std::sync::Arc;

use fleet_core::{NamespaceSet, ALL_NAMESPACES};
use tracing::warn;

use crate::{ListModifier, ListOptions};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamespaceError {
    #[error("the all-namespaces sentinel cannot be combined with other namespaces in the {0}-set")]
    MixedAllNamespaces(&'static str),
}

/// Outcome of [`plan_namespaces`]: one cache per entry of `namespaces`.
#[derive(Clone)]
pub struct NamespacePlan {
    pub namespaces: Vec<String>,
    /// Deny-set that actually applies (empty when ignored).
    pub deny: NamespaceSet,
    pub modifier: Option<ListModifier>,
}

impl NamespacePlan {
    /// Options for list/watch calls with the plan's modifier applied.
    pub fn list_options(&self) -> ListOptions {
        let mut opts = ListOptions::default();
        if let Some(m) = &self.modifier {
            m(&mut opts);
        }
        opts
    }

    pub fn is_all_namespaces(&self) -> bool {
        self.namespaces.len() == 1 && self.namespaces[0] == ALL_NAMESPACES
    }
}

impl std::fmt::Debug for NamespacePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespacePlan")
            .field("namespaces", &self.namespaces)
            .field("deny", &self.deny)
            .field("options", &self.list_options())
            .finish()
    }
}

/// `metadata.namespace!=a,metadata.namespace!=b` for a deny-set.
pub fn deny_field_selector(deny: &NamespaceSet) -> String {
    deny.iter()
        .filter(|ns| !ns.is_empty())
        .map(|ns| format!("metadata.namespace!={}", ns))
        .collect::<Vec<_>>()
        .join(",")
}

/// Decide which namespaces to watch and how to filter them.
///
/// An empty allow-set is treated as all namespaces.
pub fn plan_namespaces(
    allow: &NamespaceSet,
    deny: &NamespaceSet,
    base: Option<ListModifier>,
) -> Result<NamespacePlan, NamespaceError> {
    if allow.mixes_all_namespaces() {
        return Err(NamespaceError::MixedAllNamespaces("allow"));
    }
    if deny.mixes_all_namespaces() {
        return Err(NamespaceError::MixedAllNamespaces("deny"));
    }

    if !(allow.is_empty() || allow.is_all_namespaces()) {
        if !deny.is_empty() {
            warn!(allow = %allow, deny = %deny, "namespaces: deny-set ignored because allow-set names namespaces explicitly");
        }
        return Ok(NamespacePlan {
            namespaces: allow.iter().map(str::to_string).collect(),
            deny: NamespaceSet::new(),
            modifier: base,
        });
    }

    let deny: NamespaceSet = deny.iter().filter(|ns| !ns.is_empty()).collect();
    let clauses = deny_field_selector(&deny);
    let modifier: Option<ListModifier> = if clauses.is_empty() {
        base
    } else {
        Some(Arc::new(move |opts: &mut ListOptions| {
            if let Some(b) = &base {
                b(opts);
            }
            opts.push_field_clause(&clauses);
        }))
    };
    Ok(NamespacePlan {
        namespaces: vec![ALL_NAMESPACES.to_string()],
        deny,
        modifier,
    })
}
