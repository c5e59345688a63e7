// OBO ontology reader (streaming stanza walk)

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::canonical::Lines;
use super::{ConceptIter, ReaderContext, RecordReader};
use crate::error::{IngestError, Result};
use termhub_common::types::Concept;

/// Reads `[Term]` stanzas: `id`, `name` and quoted `synonym` values
#[derive(Debug, Clone)]
pub struct OboReader {
    /// Accepted id namespaces (`GO` for `GO:0008150`); empty accepts all
    pub namespaces: Vec<&'static str>,
    /// Accepted synonym scopes
    pub scopes: Vec<&'static str>,
    /// Use the stanza's `namespace:` value as entity type
    pub entity_from_namespace: bool,
}

impl OboReader {
    pub fn new(namespaces: &[&'static str]) -> Self {
        Self {
            namespaces: namespaces.to_vec(),
            scopes: vec!["EXACT", "RELATED", "NARROW"],
            entity_from_namespace: false,
        }
    }

    pub fn with_entity_from_namespace(mut self) -> Self {
        self.entity_from_namespace = true;
        self
    }
}

impl RecordReader for OboReader {
    fn format(&self) -> &'static str {
        "obo"
    }

    fn read_file(&self, path: &Path, ctx: &ReaderContext) -> Result<ConceptIter> {
        let file = File::open(path)?;
        Ok(Box::new(OboIter {
            lines: Lines::new(BufReader::new(file)),
            reader: self.clone(),
            ctx: ctx.clone(),
            current: None,
        }))
    }
}

#[derive(Debug, Default)]
struct Stanza {
    is_term: bool,
    start_line: usize,
    id: Option<String>,
    name: Option<String>,
    namespace: Option<String>,
    synonyms: Vec<String>,
    obsolete: bool,
    bad_synonym: Option<String>,
}

struct OboIter<R> {
    lines: Lines<R>,
    reader: OboReader,
    ctx: ReaderContext,
    current: Option<Stanza>,
}

impl<R: BufRead> Iterator for OboIter<R> {
    type Item = Result<Concept>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(e)) => return Some(Err(e.into())),
                None => {
                    let stanza = self.current.take()?;
                    return self.finish(stanza);
                },
            };
            let line = line.trim();

            if line.starts_with('[') {
                let next = Stanza {
                    is_term: line == "[Term]",
                    start_line: self.lines.line_no(),
                    ..Stanza::default()
                };
                if let Some(done) = self.current.replace(next) {
                    if let Some(item) = self.finish(done) {
                        return Some(item);
                    }
                }
                continue;
            }

            let Some(stanza) = self.current.as_mut().filter(|s| s.is_term) else {
                continue;
            };
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "id" => stanza.id = Some(value.to_string()),
                "name" => stanza.name = Some(value.to_string()),
                "namespace" => stanza.namespace = Some(value.to_string()),
                "is_obsolete" => stanza.obsolete = value == "true",
                "synonym" => match parse_synonym(value) {
                    Some((text, scope)) => {
                        if self.reader.scopes.contains(&scope) {
                            stanza.synonyms.push(text);
                        }
                    },
                    None => stanza.bad_synonym = Some(value.to_string()),
                },
                _ => {},
            }
        }
    }
}

impl<R> OboIter<R> {
    fn finish(&self, stanza: Stanza) -> Option<Result<Concept>> {
        if !stanza.is_term || stanza.obsolete {
            return None;
        }
        let location = format!("stanza at line {}", stanza.start_line);
        let Some(id) = stanza.id else {
            return Some(Err(IngestError::malformed(&self.ctx.source_name, location, "missing id")));
        };
        if !self.reader.namespaces.is_empty() {
            let namespace = id.split_once(':').map(|(ns, _)| ns).unwrap_or_default();
            if !self.reader.namespaces.contains(&namespace) {
                return None;
            }
        }
        let Some(name) = stanza.name.filter(|n| !n.is_empty()) else {
            return Some(Err(IngestError::malformed(
                &self.ctx.source_name,
                location,
                format!("{} has no name", id),
            )));
        };
        if let Some(raw) = stanza.bad_synonym {
            return Some(Err(IngestError::malformed(
                &self.ctx.source_name,
                location,
                format!("unquoted synonym: {}", raw),
            )));
        }

        let mut concept = self.ctx.concept(id, name).with_terms(stanza.synonyms);
        if self.reader.entity_from_namespace {
            if let Some(namespace) = stanza.namespace {
                concept.entity_type = namespace;
            }
        }
        Some(Ok(concept))
    }
}

/// Split `"text" SCOPE [xrefs]` into unescaped text and scope
fn parse_synonym(value: &str) -> Option<(String, &str)> {
    let rest = value.strip_prefix('"')?;
    let mut text = String::new();
    let mut chars = rest.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                if let Some((_, escaped)) = chars.next() {
                    text.push(escaped);
                }
            },
            '"' => {
                let scope = rest[i + 1..].split_whitespace().next().unwrap_or("RELATED");
                return Some((text, scope));
            },
            _ => text.push(c),
        }
    }
    None
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const GO_SAMPLE: &str = "format-version: 1.2\n\
ontology: go\n\
\n\
[Term]\n\
id: GO:0008150\n\
name: biological_process\n\
namespace: biological_process\n\
synonym: \"physiological process\" EXACT []\n\
synonym: \"single organism process\" BROAD []\n\
\n\
[Term]\n\
id: GO:0000001\n\
name: obsolete thing\n\
is_obsolete: true\n\
\n\
[Term]\n\
id: CHEBI:15377\n\
name: water\n\
\n\
[Term]\n\
id: GO:0005575\n\
namespace: cellular_component\n\
\n\
[Typedef]\n\
id: part_of\n\
name: part of\n\
\n\
[Term]\n\
id: GO:0003674\n\
name: molecular_function\n\
namespace: molecular_function\n\
synonym: \"say \\\"hi\\\"\" RELATED []\n";

    fn read(reader: OboReader) -> Vec<Result<Concept>> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("go.obo");
        std::fs::write(&path, GO_SAMPLE).unwrap();
        let ctx = ReaderContext::new("gene_ontology", "Gene Ontology", "go term");
        reader.read_file(&path, &ctx).unwrap().collect()
    }

    #[test]
    fn test_reads_terms_with_scoped_synonyms() {
        let items = read(OboReader::new(&["GO"]).with_entity_from_namespace());
        assert_eq!(items.len(), 3);

        let bp = items[0].as_ref().unwrap();
        assert_eq!(bp.id, "GO:0008150");
        assert_eq!(bp.terms, vec!["biological_process", "physiological process"]);
        assert_eq!(bp.entity_type, "biological_process");

        assert!(matches!(items[1], Err(IngestError::MalformedRecord { .. })));

        let mf = items[2].as_ref().unwrap();
        assert_eq!(mf.terms, vec!["molecular_function", "say \"hi\""]);
    }

    #[test]
    fn test_without_namespace_filter() {
        let items = read(OboReader::new(&[]));
        let ids: Vec<&str> = items
            .iter()
            .filter_map(|i| i.as_ref().ok())
            .map(|c| c.id.as_str())
            .collect();
        assert_eq!(ids, ["GO:0008150", "CHEBI:15377", "GO:0003674"]);
    }

    #[test]
    fn test_parse_synonym() {
        assert_eq!(
            parse_synonym("\"A23187\" EXACT [ChEBI:x]"),
            Some(("A23187".to_string(), "EXACT"))
        );
        assert_eq!(parse_synonym("no quotes EXACT"), None);
        assert_eq!(parse_synonym("\"unterminated"), None);
    }
}
