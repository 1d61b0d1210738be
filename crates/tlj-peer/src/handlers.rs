use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

/// Callbacks keyed by tag, then by type code, kept in insertion order.
pub(crate) struct HandlerTable<F> {
    entries: RwLock<HashMap<String, HashMap<u16, Vec<F>>>>,
}

impl<F: Clone> HandlerTable<F> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) fn insert(&self, tag: &str, code: u16, handler: F) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .entry(tag.to_string())
            .or_default()
            .entry(code)
            .or_default()
            .push(handler);
    }

    /// Snapshot of the handlers for `(tag, code)`; the lock is released on return.
    pub(crate) fn get(&self, tag: &str, code: u16) -> Vec<F> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(tag)
            .and_then(|by_code| by_code.get(&code))
            .cloned()
            .unwrap_or_default()
    }

    pub(crate) fn count(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.values().flat_map(|m| m.values()).map(Vec::len).sum()
    }
}
