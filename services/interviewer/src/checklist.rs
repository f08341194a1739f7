//! Shared state for the interview assessment checklist.
//!
//! Tool handlers run on their own tasks, so the store is a cloneable handle
//! over a mutex. Lock poisoning is recovered from rather than propagated;
//! the data is plain bookkeeping and stays usable.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
pub struct CriterionState {
    pub description: String,
    pub satisfied: bool,
    pub confidence: Option<f64>,
    pub notes: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Clone, Default)]
pub struct ChecklistStore {
    inner: Arc<Mutex<HashMap<String, CriterionState>>>,
}

impl ChecklistStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CriterionState>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replaces the checklist with the given criteria, all unsatisfied.
    pub fn seed(&self, criteria: impl IntoIterator<Item = (String, String)>) {
        let mut map = self.lock();
        map.clear();
        for (id, description) in criteria {
            map.insert(
                id,
                CriterionState {
                    description,
                    ..Default::default()
                },
            );
        }
    }

    /// Marks a criterion satisfied with the reported evidence. Returns false
    /// when the id was never seeded; the entry is created anyway so the
    /// evidence is not lost.
    pub fn mark_satisfied(
        &self,
        id: &str,
        confidence: Option<f64>,
        notes: Option<String>,
        timestamp: Option<String>,
    ) -> bool {
        let mut map = self.lock();
        let known = map.contains_key(id);
        let entry = map.entry(id.to_string()).or_default();
        entry.satisfied = true;
        entry.confidence = confidence;
        entry.notes = notes;
        entry.timestamp = timestamp;
        known
    }

    /// Sets or clears a checklist item by key, creating it when absent.
    pub fn set_checked(&self, key: &str, checked: bool) {
        self.lock().entry(key.to_string()).or_default().satisfied = checked;
    }

    pub fn get(&self, id: &str) -> Option<CriterionState> {
        self.lock().get(id).cloned()
    }

    pub fn satisfied_count(&self) -> usize {
        self.lock().values().filter(|c| c.satisfied).count()
    }

    /// Sorted snapshot for logging and end-of-session summaries.
    pub fn snapshot(&self) -> Vec<(String, CriterionState)> {
        let mut items: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, state)| (id.clone(), state.clone()))
            .collect();
        items.sort_by(|a, b| a.0.cmp(&b.0));
        items
    }
}
