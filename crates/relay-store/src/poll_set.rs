//! Ids currently eligible for status polling.

use std::collections::BTreeSet;

/// Set of transfer ids the tracker still polls.
///
/// Ordered so that poll cycles fan out in a stable order.
#[derive(Debug, Clone, Default)]
pub struct PollSet {
    ids: BTreeSet<String>,
}

impl PollSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the id was already tracked.
    pub fn admit(&mut self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    pub fn remove(&mut self, id: &str) -> bool {
        self.ids.remove(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.ids.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Drop every id for which `is_done` holds; returns the removed ids.
    pub fn prune(&mut self, mut is_done: impl FnMut(&str) -> bool) -> Vec<String> {
        let removed: Vec<String> = self.ids.iter().filter(|id| is_done(id.as_str())).cloned().collect();
        for id in &removed {
            self.ids.remove(id);
        }
        removed
    }
}
