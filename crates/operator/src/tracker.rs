//! Last reconciliation outcome per object.
//!
//! Written by the workload reconcile path, read concurrently by status
//! computation. Records are immutable and swapped whole, so a reader never
//! sees a half-written outcome.

use std::sync::{Arc, PoisonError, RwLock};

use fleet_core::{ObjectKey, ReconciliationOutcome};
use rustc_hash::FxHashMap;

#[derive(Default)]
pub struct ReconciliationTracker {
    outcomes: RwLock<FxHashMap<ObjectKey, Arc<ReconciliationOutcome>>>,
}

impl ReconciliationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the record for `key`; last write wins.
    pub fn set_status(&self, key: &ObjectKey, ok: bool, reason: impl Into<String>, message: impl Into<String>) {
        let outcome = Arc::new(ReconciliationOutcome { ok, reason: reason.into(), message: message.into() });
        self.outcomes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), outcome);
    }

    pub fn get_status(&self, key: &ObjectKey) -> Option<Arc<ReconciliationOutcome>> {
        self.outcomes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    /// Drop the record once the object is confirmed deleted.
    pub fn forget(&self, key: &ObjectKey) -> bool {
        self.outcomes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.outcomes.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
