//! Record readers
//!
//! Every resource reads its local dump files through a [`RecordReader`]
//! that yields [`Concept`]s. The format readers only extract fields; the
//! shared [`RecordIterator`] wrapper then applies, in order:
//!
//! 1. malformed-record skipping (logged, never fatal)
//! 2. the cross-lookup exclusion set of `(id, term)` pairs
//! 3. term postfilters
//! 4. label renaming
//! 5. id prefixing
//! 6. CUI attachment
//! 7. the statistics hook
//!
//! Concepts left without terms after steps 2 and 3 are dropped.

pub mod canonical;
pub mod columns;
pub mod cui;
pub mod dmp;
pub mod obo;
pub mod renaming;
pub mod stats;
pub mod xml;

pub use canonical::CanonicalReader;
pub use columns::{ColumnLayout, ColumnsReader};
pub use cui::CuiTable;
pub use dmp::DmpReader;
pub use obo::OboReader;
pub use renaming::{Renaming, RenamingRules};
pub use stats::{StatsReport, TermStats};
pub use xml::{EntityRule, XmlLayout, XmlReader};

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use termhub_common::types::Concept;
use tracing::{debug, warn};

use crate::aggregate::Postfilter;
use crate::error::{IngestError, Result};

/// Concepts from one dump, each possibly a recoverable or fatal error
pub type ConceptIter = Box<dyn Iterator<Item = Result<Concept>> + Send>;

/// `(native id, term)` pairs
pub type PairSet = HashSet<(String, String)>;

/// Labels a reader stamps on the concepts it produces
#[derive(Debug, Clone)]
pub struct ReaderContext {
    /// Registry name, used in log and error messages
    pub source_name: String,
    pub resource_label: String,
    /// Default entity type when the format does not supply one
    pub entity_type: String,
}

impl ReaderContext {
    pub fn new(
        source_name: impl Into<String>,
        resource_label: impl Into<String>,
        entity_type: impl Into<String>,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            resource_label: resource_label.into(),
            entity_type: entity_type.into(),
        }
    }

    pub(crate) fn concept(&self, id: impl Into<String>, preferred: impl Into<String>) -> Concept {
        Concept::new(id, preferred, self.entity_type.clone(), self.resource_label.clone())
    }
}

/// Format-specific extraction of concepts from local dump files
pub trait RecordReader: Send + Sync + fmt::Debug {
    /// Short format name for logs
    fn format(&self) -> &'static str;

    /// Iterate one dump file
    fn read_file(&self, path: &Path, ctx: &ReaderContext) -> Result<ConceptIter>;

    /// Iterate all dump files of a resource, in order
    fn read(&self, files: &[PathBuf], ctx: &ReaderContext) -> Result<ConceptIter> {
        let mut iters = Vec::with_capacity(files.len());
        for file in files {
            debug!(file = %file.display(), format = self.format(), "Opening dump");
            iters.push(self.read_file(file, ctx)?);
        }
        Ok(Box::new(iters.into_iter().flatten()))
    }
}

/// Prefix turning native ids into globally unique URIs
#[derive(Clone)]
pub enum IdPrefix {
    Fixed(String),
    /// Per-namespace mapping, e.g. `GO:0008150` → `.../obo/GO_0008150`
    Mapped(fn(&str) -> String),
}

impl IdPrefix {
    pub fn apply(&self, id: &str) -> String {
        match self {
            IdPrefix::Fixed(prefix) => format!("{}{}", prefix, id),
            IdPrefix::Mapped(map) => map(id),
        }
    }
}

impl fmt::Debug for IdPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdPrefix::Fixed(prefix) => f.debug_tuple("Fixed").field(prefix).finish(),
            IdPrefix::Mapped(_) => f.write_str("Mapped(..)"),
        }
    }
}

/// Per-run adjustments applied on top of a reader's raw output
#[derive(Debug, Clone, Default)]
pub struct IterOptions {
    pub exclude: Option<Arc<PairSet>>,
    pub postfilters: Vec<Postfilter>,
    pub renaming: Renaming,
    pub id_prefix: Option<IdPrefix>,
    pub cui: Option<Arc<CuiTable>>,
    /// Remember every emitted `(native id, term)` pair
    pub record_pairs: bool,
}

/// Wraps a reader's output with the shared per-record processing
pub struct RecordIterator {
    inner: ConceptIter,
    source_name: String,
    options: IterOptions,
    stats: TermStats,
    recorded: PairSet,
    skipped: usize,
    failed: Option<IngestError>,
}

impl RecordIterator {
    pub fn new(inner: ConceptIter, source_name: impl Into<String>, options: IterOptions) -> Self {
        Self {
            inner,
            source_name: source_name.into(),
            options,
            stats: TermStats::new(),
            recorded: PairSet::new(),
            skipped: 0,
            failed: None,
        }
    }

    pub fn stats(&self) -> &TermStats {
        &self.stats
    }

    /// Number of malformed records skipped so far
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// The fatal error that ended iteration early, if any
    pub fn take_failure(&mut self) -> Option<IngestError> {
        self.failed.take()
    }

    /// Pairs remembered while `record_pairs` was set
    pub fn take_recorded(&mut self) -> PairSet {
        std::mem::take(&mut self.recorded)
    }

    fn process(&mut self, mut concept: Concept) -> Option<Concept> {
        if let Some(exclude) = &self.options.exclude {
            let id = concept.id.clone();
            concept
                .terms
                .retain(|term| !exclude.contains(&(id.clone(), term.clone())));
        }
        if !self.options.postfilters.is_empty() {
            let filters = &self.options.postfilters;
            concept.terms.retain(|term| filters.iter().all(|f| f.keeps(term)));
        }
        if concept.terms.is_empty() {
            return None;
        }

        if self.options.record_pairs {
            for term in &concept.terms {
                self.recorded.insert((concept.id.clone(), term.clone()));
            }
        }

        concept.resource = self.options.renaming.resource.apply(&concept.resource);
        concept.entity_type = self.options.renaming.entity_type.apply(&concept.entity_type);

        if let Some(cui) = &self.options.cui {
            if concept.cui.is_none() {
                concept.cui = cui.get(&concept.id).map(str::to_string);
            }
        }
        if let Some(prefix) = &self.options.id_prefix {
            concept.id = prefix.apply(&concept.id);
        }

        self.stats.record(&concept);
        Some(concept)
    }
}

impl Iterator for RecordIterator {
    type Item = Concept;

    fn next(&mut self) -> Option<Concept> {
        if self.failed.is_some() {
            return None;
        }
        loop {
            match self.inner.next()? {
                Ok(concept) => {
                    if let Some(concept) = self.process(concept) {
                        return Some(concept);
                    }
                },
                Err(e) if e.is_recoverable() => {
                    self.skipped += 1;
                    warn!(source = %self.source_name, error = %e, "Skipping malformed record");
                },
                Err(e) => {
                    warn!(source = %self.source_name, error = %e, "Stopping iteration");
                    self.failed = Some(e);
                    return None;
                },
            }
        }
    }
}
