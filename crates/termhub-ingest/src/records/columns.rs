//! Delimited column reader (TSV dumps, RRF tables)

use csv::StringRecord;
use std::fmt;
use std::fs::File;
use std::path::Path;

use super::{ConceptIter, ReaderContext, RecordReader};
use crate::error::{IngestError, Result};
use termhub_common::types::Concept;

/// Where the fields of a concept live in a delimited file
#[derive(Clone)]
pub struct ColumnLayout {
    pub delimiter: u8,
    pub has_header: bool,
    /// Lines starting with this byte are skipped
    pub comment: Option<u8>,
    pub id: usize,
    pub preferred: usize,
    pub synonyms: Vec<usize>,
    /// Splits multi-valued synonym cells, e.g. `|`
    pub sub_delimiter: Option<char>,
    /// Cell value meaning "empty", e.g. `-`
    pub null_token: Option<&'static str>,
    /// Removed from the start of ids, e.g. `MESH:`
    pub strip_id_prefix: Option<&'static str>,
    /// Merge consecutive rows sharing an id into one concept
    pub group_by_id: bool,
    /// Rows for which this returns `false` are ignored
    pub row_filter: Option<fn(&StringRecord) -> bool>,
}

impl ColumnLayout {
    pub fn tsv(id: usize, preferred: usize, synonyms: &[usize]) -> Self {
        Self {
            delimiter: b'\t',
            has_header: false,
            comment: Some(b'#'),
            id,
            preferred,
            synonyms: synonyms.to_vec(),
            sub_delimiter: Some('|'),
            null_token: None,
            strip_id_prefix: None,
            group_by_id: false,
            row_filter: None,
        }
    }
}

impl fmt::Debug for ColumnLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnLayout")
            .field("delimiter", &(self.delimiter as char))
            .field("id", &self.id)
            .field("preferred", &self.preferred)
            .field("synonyms", &self.synonyms)
            .field("group_by_id", &self.group_by_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct ColumnsReader {
    layout: ColumnLayout,
}

impl ColumnsReader {
    pub fn new(layout: ColumnLayout) -> Self {
        Self { layout }
    }
}

impl RecordReader for ColumnsReader {
    fn format(&self) -> &'static str {
        "columns"
    }

    fn read_file(&self, path: &Path, ctx: &ReaderContext) -> Result<ConceptIter> {
        let layout = &self.layout;
        let reader = csv::ReaderBuilder::new()
            .delimiter(layout.delimiter)
            .has_headers(layout.has_header)
            .comment(layout.comment)
            .quoting(false)
            .flexible(true)
            .from_reader(File::open(path)?);

        Ok(Box::new(ColumnsIter {
            records: reader.into_records(),
            layout: layout.clone(),
            ctx: ctx.clone(),
            pending: None,
        }))
    }
}

struct ColumnsIter {
    records: csv::StringRecordsIntoIter<File>,
    layout: ColumnLayout,
    ctx: ReaderContext,
    /// Concept being grouped, when `group_by_id` is set
    pending: Option<Concept>,
}

impl Iterator for ColumnsIter {
    type Item = Result<Concept>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.records.next() {
                Some(Ok(record)) => record,
                Some(Err(e)) if e.is_io_error() => {
                    return Some(Err(super::cui::csv_io(e).into()));
                },
                Some(Err(e)) => {
                    let line = e.position().map(|p| p.line()).unwrap_or_default();
                    return Some(Err(IngestError::malformed(
                        &self.ctx.source_name,
                        format!("line {}", line),
                        e.to_string(),
                    )));
                },
                None => return self.pending.take().map(Ok),
            };

            if let Some(filter) = self.layout.row_filter {
                if !filter(&record) {
                    continue;
                }
            }

            let concept = match self.parse(&record) {
                Ok(concept) => concept,
                Err(e) => return Some(Err(e)),
            };

            if !self.layout.group_by_id {
                return Some(Ok(concept));
            }
            if let Some(current) = self.pending.as_mut().filter(|c| c.id == concept.id) {
                for term in concept.terms {
                    current.add_term(term);
                }
                continue;
            }
            if let Some(done) = self.pending.replace(concept) {
                return Some(Ok(done));
            }
        }
    }
}

impl ColumnsIter {
    fn cell<'r>(&self, record: &'r StringRecord, index: usize) -> Option<&'r str> {
        let value = record.get(index)?.trim();
        if value.is_empty() || self.layout.null_token == Some(value) {
            None
        } else {
            Some(value)
        }
    }

    fn parse(&self, record: &StringRecord) -> Result<Concept> {
        let line = record.position().map(|p| p.line()).unwrap_or_default();
        let malformed =
            |message: &str| IngestError::malformed(&self.ctx.source_name, format!("line {}", line), message);

        let mut id = self.cell(record, self.layout.id).ok_or_else(|| malformed("missing id"))?;
        if let Some(prefix) = self.layout.strip_id_prefix {
            id = id.strip_prefix(prefix).unwrap_or(id);
        }
        let preferred = self
            .cell(record, self.layout.preferred)
            .ok_or_else(|| malformed("missing preferred term"))?;

        let mut concept = self.ctx.concept(id, preferred);
        for &column in &self.layout.synonyms {
            let Some(value) = self.cell(record, column) else {
                continue;
            };
            match self.layout.sub_delimiter {
                Some(sep) => value
                    .split(sep)
                    .filter(|v| self.layout.null_token != Some(v.trim()))
                    .for_each(|v| concept.add_term(v)),
                None => concept.add_term(value),
            }
        }
        Ok(concept)
    }
}
