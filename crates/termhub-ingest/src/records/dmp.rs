// Joined NCBI taxonomy reader
//
// Input lines are `tax_id<TAB>name_class<TAB>name`, grouped by tax_id, as
// written by the taxonomy merge step.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::canonical::Lines;
use super::{ConceptIter, ReaderContext, RecordReader};
use crate::error::{IngestError, Result};
use termhub_common::types::Concept;

/// Name classes kept as synonyms; the scientific name is the preferred term
pub const SYNONYM_CLASSES: &[&str] = &[
    "synonym",
    "equivalent name",
    "common name",
    "genbank common name",
    "blast name",
    "acronym",
    "genbank acronym",
];

#[derive(Debug, Clone, Default)]
pub struct DmpReader;

impl RecordReader for DmpReader {
    fn format(&self) -> &'static str {
        "dmp"
    }

    fn read_file(&self, path: &Path, ctx: &ReaderContext) -> Result<ConceptIter> {
        let file = File::open(path)?;
        Ok(Box::new(DmpIter {
            lines: Lines::new(BufReader::new(file)),
            ctx: ctx.clone(),
            group: None,
            exhausted: false,
        }))
    }
}

#[derive(Debug)]
struct TaxonGroup {
    tax_id: String,
    first_line: usize,
    scientific: Option<String>,
    synonyms: Vec<String>,
}

struct DmpIter<R> {
    lines: Lines<R>,
    ctx: ReaderContext,
    group: Option<TaxonGroup>,
    exhausted: bool,
}

impl<R: BufRead> Iterator for DmpIter<R> {
    type Item = Result<Concept>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.exhausted {
                return self.group.take().map(|g| self.finish(g));
            }
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => return Some(Err(e.into())),
                None => {
                    self.exhausted = true;
                    continue;
                },
            };
            if line.is_empty() {
                continue;
            }

            let mut fields = line.splitn(3, '\t');
            let (Some(tax_id), Some(class), Some(name)) = (fields.next(), fields.next(), fields.next())
            else {
                return Some(Err(IngestError::malformed(
                    &self.ctx.source_name,
                    format!("line {}", self.lines.line_no()),
                    "expected tax_id, name class and name",
                )));
            };

            let same_taxon = matches!(&self.group, Some(group) if group.tax_id == tax_id);
            let finished = if same_taxon {
                None
            } else {
                self.group.replace(TaxonGroup {
                    tax_id: tax_id.to_string(),
                    first_line: self.lines.line_no(),
                    scientific: None,
                    synonyms: Vec::new(),
                })
            };

            if let Some(group) = self.group.as_mut() {
                if class == "scientific name" {
                    group.scientific.get_or_insert_with(|| name.to_string());
                } else if SYNONYM_CLASSES.contains(&class) {
                    group.synonyms.push(name.to_string());
                }
            }

            if let Some(done) = finished {
                return Some(self.finish(done));
            }
        }
    }
}

impl<R> DmpIter<R> {
    fn finish(&self, group: TaxonGroup) -> Result<Concept> {
        let Some(scientific) = group.scientific else {
            return Err(IngestError::malformed(
                &self.ctx.source_name,
                format!("line {}", group.first_line),
                format!("taxon {} has no scientific name", group.tax_id),
            ));
        };
        Ok(self.ctx.concept(group.tax_id, scientific).with_terms(group.synonyms))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_groups_names_by_taxon() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taxonomy.dmp");
        std::fs::write(
            &path,
            "9606\tgenbank common name\thuman\n\
             9606\tscientific name\tHomo sapiens\n\
             9606\tauthority\tHomo sapiens Linnaeus, 1758\n\
             9606\tcommon name\thuman\n\
             10090\tcommon name\tmouse\n\
             562\tscientific name\tEscherichia coli\n\
             bad line\n",
        )
        .unwrap();

        let ctx = ReaderContext::new("taxonomy", "NCBI Taxonomy", "organism");
        let items: Vec<Result<Concept>> = DmpReader.read_file(&path, &ctx).unwrap().collect();
        assert_eq!(items.len(), 4);

        let human = items[0].as_ref().unwrap();
        assert_eq!(human.id, "9606");
        assert_eq!(human.preferred_term, "Homo sapiens");
        assert_eq!(human.terms, vec!["Homo sapiens", "human"]);
        assert_eq!(human.entity_type, "organism");

        assert!(matches!(items[1], Err(IngestError::MalformedRecord { .. })));
        assert!(matches!(items[2], Err(IngestError::MalformedRecord { .. })));
        assert_eq!(items[3].as_ref().unwrap().id, "562");
    }
}
