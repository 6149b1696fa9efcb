use colony_common::{lineage_parent, AgentId};
use std::collections::HashMap;

/// Where a lineage lookup found its value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Resolved<V> {
    Own(V),
    /// Taken from the mother cell (`id >> 1`).
    Inherited(V),
    Missing,
}

impl<V> Resolved<V> {
    pub fn value(self) -> Option<V> {
        match self {
            Resolved::Own(v) | Resolved::Inherited(v) => Some(v),
            Resolved::Missing => None,
        }
    }
}

/// Per-agent values keyed by lineage identity.
///
/// Lookups for an unseen id fall back to its mother, one generation only.
/// Entries live until `clear`.
#[derive(Debug, Clone)]
pub struct LineageStore<V> {
    entries: HashMap<AgentId, V>,
}

impl<V> Default for LineageStore<V> {
    fn default() -> Self {
        LineageStore { entries: HashMap::new() }
    }
}

impl<V: Clone> LineageStore<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: AgentId) -> Option<&V> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: AgentId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn resolve(&self, id: AgentId) -> Resolved<V> {
        if let Some(v) = self.entries.get(&id) {
            return Resolved::Own(v.clone());
        }
        match self.entries.get(&lineage_parent(id)) {
            Some(v) => Resolved::Inherited(v.clone()),
            None => Resolved::Missing,
        }
    }

    pub fn set(&mut self, id: AgentId, value: V) {
        self.entries.insert(id, value);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daughters_read_mother_value() {
        let mut store = LineageStore::new();
        store.set(21, 0.4);
        assert_eq!(store.resolve(21), Resolved::Own(0.4));
        assert_eq!(store.resolve(42), Resolved::Inherited(0.4));
        assert_eq!(store.resolve(43), Resolved::Inherited(0.4));
        assert_eq!(store.resolve(44), Resolved::Missing);
    }

    #[test]
    fn fallback_is_one_generation_deep() {
        let mut store = LineageStore::new();
        store.set(5, 1.0);
        assert_eq!(store.resolve(20), Resolved::Missing);
        assert_eq!(store.resolve(20).value(), None);
    }

    #[test]
    fn daughter_writes_do_not_touch_mother() {
        let mut store = LineageStore::new();
        store.set(7, 2.0);
        let inherited = store.resolve(14).value().unwrap();
        store.set(14, inherited + 1.0);
        assert_eq!(store.get(7), Some(&2.0));
        assert_eq!(store.resolve(14), Resolved::Own(3.0));
        assert_eq!(store.len(), 2);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.resolve(14), Resolved::Missing);
    }
}
