//! Synonymy and ambiguity statistics
//!
//! Counts ids, emitted rows and distinct terms, and keeps two histograms:
//! how many terms each id carries (synonymy) and how many ids share each
//! term (ambiguity).

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use termhub_common::types::Concept;

/// Running statistics of one resource, or of a whole aggregation run
#[derive(Debug, Clone, Default)]
pub struct TermStats {
    ids: usize,
    rows: usize,
    terms_per_id: BTreeMap<usize, usize>,
    ids_per_term: HashMap<String, usize>,
}

impl TermStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one emitted concept
    pub fn record(&mut self, concept: &Concept) {
        self.ids += 1;
        self.rows += concept.terms.len();
        *self.terms_per_id.entry(concept.terms.len()).or_default() += 1;
        for term in &concept.terms {
            *self.ids_per_term.entry(term.clone()).or_default() += 1;
        }
    }

    /// Fold another resource's statistics into this one
    pub fn merge(&mut self, other: &TermStats) {
        self.ids += other.ids;
        self.rows += other.rows;
        for (bucket, count) in &other.terms_per_id {
            *self.terms_per_id.entry(*bucket).or_default() += count;
        }
        for (term, count) in &other.ids_per_term {
            *self.ids_per_term.entry(term.clone()).or_default() += count;
        }
    }

    pub fn ids(&self) -> usize {
        self.ids
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn report(&self) -> StatsReport {
        let mut ids_per_term = BTreeMap::new();
        for count in self.ids_per_term.values() {
            *ids_per_term.entry(*count).or_default() += 1;
        }
        let distinct_terms = self.ids_per_term.len();

        StatsReport {
            ids: self.ids,
            rows: self.rows,
            distinct_terms,
            terms_per_id_ratio: ratio(self.rows, self.ids),
            ids_per_term_ratio: ratio(self.rows, distinct_terms),
            terms_per_id: self.terms_per_id.clone(),
            ids_per_term,
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Serializable snapshot of [`TermStats`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsReport {
    pub ids: usize,
    pub rows: usize,
    pub distinct_terms: usize,
    pub terms_per_id_ratio: f64,
    pub ids_per_term_ratio: f64,
    /// terms per id → number of ids
    pub terms_per_id: BTreeMap<usize, usize>,
    /// ids per term → number of terms
    pub ids_per_term: BTreeMap<usize, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stats_have_zero_ratios() {
        let report = TermStats::new().report();
        assert_eq!(report.ids, 0);
        assert_eq!(report.terms_per_id_ratio, 0.0);
        assert_eq!(report.ids_per_term_ratio, 0.0);
    }

    #[test]
    fn test_histograms() {
        let mut stats = TermStats::new();
        stats.record(&Concept::new("1", "alpha", "gene", "R").with_terms(["a1", "shared"]));
        stats.record(&Concept::new("2", "beta", "gene", "R").with_terms(["shared"]));

        let report = stats.report();
        assert_eq!(report.ids, 2);
        assert_eq!(report.rows, 5);
        assert_eq!(report.distinct_terms, 4);
        assert_eq!(report.terms_per_id.get(&3), Some(&1));
        assert_eq!(report.terms_per_id.get(&2), Some(&1));
        assert_eq!(report.ids_per_term.get(&2), Some(&1));
        assert_eq!(report.ids_per_term.get(&1), Some(&3));
        assert_eq!(report.terms_per_id_ratio, 2.5);
    }

    #[test]
    fn test_merge_accumulates_shared_terms() {
        let mut a = TermStats::new();
        a.record(&Concept::new("1", "x", "e", "A"));
        let mut b = TermStats::new();
        b.record(&Concept::new("9", "x", "e", "B"));

        let mut total = TermStats::new();
        total.merge(&a);
        total.merge(&b);
        let report = total.report();
        assert_eq!(report.ids, 2);
        assert_eq!(report.distinct_terms, 1);
        assert_eq!(report.ids_per_term.get(&2), Some(&1));
    }
}
