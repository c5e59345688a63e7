//! Canonical line format: `id<TAB>preferred<TAB>term<TAB>term...`
//!
//! Formats without a dedicated reader are converted to this layout by a
//! pipeline transform at download time.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::{ConceptIter, ReaderContext, RecordReader};
use crate::error::{IngestError, Result};
use termhub_common::types::Concept;

#[derive(Debug, Clone, Default)]
pub struct CanonicalReader;

impl RecordReader for CanonicalReader {
    fn format(&self) -> &'static str {
        "canonical"
    }

    fn read_file(&self, path: &Path, ctx: &ReaderContext) -> Result<ConceptIter> {
        let file = File::open(path)?;
        Ok(Box::new(CanonicalIter {
            lines: Lines::new(BufReader::new(file)),
            ctx: ctx.clone(),
        }))
    }
}

struct CanonicalIter<R> {
    lines: Lines<R>,
    ctx: ReaderContext,
}

impl<R: BufRead> Iterator for CanonicalIter<R> {
    type Item = Result<Concept>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(e.into())),
            };
            if line.trim().is_empty() {
                continue;
            }
            return Some(parse_line(&line, self.lines.line_no(), &self.ctx));
        }
    }
}

fn parse_line(line: &str, line_no: usize, ctx: &ReaderContext) -> Result<Concept> {
    let mut fields = line.split('\t');
    let id = fields.next().unwrap_or_default().trim();
    let preferred = fields.next().unwrap_or_default().trim();
    if id.is_empty() || preferred.is_empty() {
        return Err(IngestError::malformed(
            &ctx.source_name,
            format!("line {}", line_no),
            "expected id and preferred term",
        ));
    }
    Ok(ctx.concept(id, preferred).with_terms(fields))
}

/// Line reader with a running line number; invalid UTF-8 is replaced
pub(crate) struct Lines<R> {
    reader: R,
    buf: Vec<u8>,
    line_no: usize,
}

impl<R: BufRead> Lines<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line_no: 0,
        }
    }

    /// 1-based number of the last line returned
    pub(crate) fn line_no(&self) -> usize {
        self.line_no
    }
}

impl<R: BufRead> Iterator for Lines<R> {
    type Item = std::io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                self.line_no += 1;
                while matches!(self.buf.last(), Some(b'\n' | b'\r')) {
                    self.buf.pop();
                }
                Some(Ok(String::from_utf8_lossy(&self.buf).into_owned()))
            },
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn ctx() -> ReaderContext {
        ReaderContext::new("cellosaurus", "Cellosaurus", "cell line")
    }

    #[test]
    fn test_reads_canonical_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cellosaurus.tsv");
        std::fs::write(&path, "CVCL_0030\tHeLa\tHela\tHeLa-CCL2\r\n\nCVCL_X\n").unwrap();

        let items: Vec<Result<Concept>> = CanonicalReader.read_file(&path, &ctx()).unwrap().collect();
        assert_eq!(items.len(), 2);

        let hela = items[0].as_ref().unwrap();
        assert_eq!(hela.id, "CVCL_0030");
        assert_eq!(hela.terms, vec!["HeLa", "Hela", "HeLa-CCL2"]);
        assert_eq!(hela.entity_type, "cell line");
        assert!(matches!(items[1], Err(IngestError::MalformedRecord { .. })));
    }
}
