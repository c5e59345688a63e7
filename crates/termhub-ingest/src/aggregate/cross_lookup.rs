//! Run-scoped cross-lookup bookkeeping

use std::collections::HashMap;
use std::sync::Arc;

use crate::records::PairSet;

/// `(id, term)` pairs emitted by each reference resource in one run
#[derive(Debug, Default)]
pub struct CrossLookupSet {
    emitted: HashMap<String, Arc<PairSet>>,
}

impl CrossLookupSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reference: impl Into<String>, pairs: PairSet) {
        self.emitted.insert(reference.into(), Arc::new(pairs));
    }

    /// Exclusion set for a dependent of `reference`
    pub fn get(&self, reference: &str) -> Option<Arc<PairSet>> {
        self.emitted.get(reference).cloned()
    }

    #[cfg(test)]
    fn contains(&self, reference: &str, id: &str, term: &str) -> bool {
        self.emitted
            .get(reference)
            .is_some_and(|pairs| pairs.contains(&(id.to_string(), term.to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_reference() {
        let mut set = CrossLookupSet::new();
        set.insert("mesh", PairSet::from([("D001".to_string(), "Term".to_string())]));

        assert!(set.contains("mesh", "D001", "Term"));
        assert!(!set.contains("mesh", "D001", "Other"));
        assert!(!set.contains("chebi", "D001", "Term"));
        assert!(set.get("chebi").is_none());
    }
}
