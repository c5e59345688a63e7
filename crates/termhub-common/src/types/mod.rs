//! Term list data model
//!
//! A [`Concept`] is what a resource reader produces while walking one dump:
//! a native id, a preferred label and its synonyms. Concepts are exploded
//! into [`OutputRow`]s, one per `(concept, term)` pair, which is the unit of
//! the aggregated table.

use serde::{Deserialize, Serialize};
use std::io::{self, Write};

use crate::error::TermhubError;

/// Placeholder written in the `cui` column for concepts without a concordance id
pub const CUI_LESS: &str = "CUI-less";

/// Line terminator of the aggregated table
pub const LINE_END: &str = "\r\n";

/// One source entity with its synonym set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concept {
    pub id: String,
    pub preferred_term: String,
    /// Synonyms including the preferred term, deduplicated, first-seen order
    pub terms: Vec<String>,
    pub entity_type: String,
    pub resource: String,
    pub cui: Option<String>,
}

impl Concept {
    /// Create a concept whose term set holds the preferred term only
    pub fn new(
        id: impl Into<String>,
        preferred_term: impl Into<String>,
        entity_type: impl Into<String>,
        resource: impl Into<String>,
    ) -> Self {
        let preferred_term = preferred_term.into().trim().to_string();
        let terms = if preferred_term.is_empty() {
            Vec::new()
        } else {
            vec![preferred_term.clone()]
        };
        Self {
            id: id.into(),
            preferred_term,
            terms,
            entity_type: entity_type.into(),
            resource: resource.into(),
            cui: None,
        }
    }

    /// Add a synonym; blank and duplicate terms are ignored
    pub fn add_term(&mut self, term: impl AsRef<str>) {
        let term = term.as_ref().trim();
        if term.is_empty() || self.terms.iter().any(|t| t == term) {
            return;
        }
        self.terms.push(term.to_string());
    }

    pub fn with_terms<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for term in terms {
            self.add_term(term);
        }
        self
    }

    /// Concordance id, or [`CUI_LESS`]
    pub fn cui_or_default(&self) -> &str {
        self.cui.as_deref().unwrap_or(CUI_LESS)
    }

    /// Explode into one row per term, keyed by the concept's CUI
    pub fn rows(&self) -> impl Iterator<Item = OutputRow> + '_ {
        self.rows_keyed(self.cui_or_default())
    }

    /// Explode into one row per term under an explicit key (CUI or OID)
    pub fn rows_keyed<'a>(&'a self, key: &'a str) -> impl Iterator<Item = OutputRow> + 'a {
        self.terms.iter().map(move |term| OutputRow {
            key: key.to_string(),
            resource: self.resource.clone(),
            original_id: self.id.clone(),
            term: term.clone(),
            preferred_term: self.preferred_term.clone(),
            entity_type: self.entity_type.clone(),
        })
    }
}

/// One flattened `(concept, term)` pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRow {
    /// CUI or OID, depending on the schema
    pub key: String,
    pub resource: String,
    pub original_id: String,
    pub term: String,
    pub preferred_term: String,
    pub entity_type: String,
}

impl OutputRow {
    /// Write the row as a tab-separated, CRLF-terminated line
    pub fn write_tsv<W: Write + ?Sized>(&self, out: &mut W) -> io::Result<()> {
        let fields = [
            &self.key,
            &self.resource,
            &self.original_id,
            &self.term,
            &self.preferred_term,
            &self.entity_type,
        ];
        for (i, field) in fields.iter().enumerate() {
            if i > 0 {
                out.write_all(b"\t")?;
            }
            write_field(out, field)?;
        }
        out.write_all(LINE_END.as_bytes())
    }
}

/// Fields must not break the column layout: tabs and line breaks become spaces
fn write_field<W: Write + ?Sized>(out: &mut W, field: &str) -> io::Result<()> {
    if !field.contains(&['\t', '\r', '\n'][..]) {
        return out.write_all(field.as_bytes());
    }
    let cleaned: String = field
        .chars()
        .map(|c| if matches!(c, '\t' | '\r' | '\n') { ' ' } else { c })
        .collect();
    out.write_all(cleaned.as_bytes())
}

/// Column layout of the aggregated table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputSchema {
    /// `cui, resource, original_id, term, preferred_term, entity_type`
    #[default]
    Cui,
    /// `oid, ...`: a generated Base36 id per concept replaces the CUI
    Oid,
}

impl OutputSchema {
    pub fn columns(self) -> [&'static str; 6] {
        let key = match self {
            OutputSchema::Cui => "cui",
            OutputSchema::Oid => "oid",
        };
        [key, "resource", "original_id", "term", "preferred_term", "entity_type"]
    }

    pub fn write_header<W: Write + ?Sized>(self, out: &mut W) -> io::Result<()> {
        out.write_all(self.columns().join("\t").as_bytes())?;
        out.write_all(LINE_END.as_bytes())
    }
}

impl std::str::FromStr for OutputSchema {
    type Err = TermhubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "cui" => Ok(OutputSchema::Cui),
            "oid" => Ok(OutputSchema::Oid),
            other => Err(TermhubError::UnknownSchema(other.to_string())),
        }
    }
}

impl std::fmt::Display for OutputSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.columns()[0])
    }
}
