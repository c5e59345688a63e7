//! Streaming XML reader
//!
//! Walks the document with `quick-xml` events and never builds a tree. A
//! [`XmlLayout`] names the record element and the element paths, relative
//! to the record, that hold the id, the preferred term, the synonyms and
//! optionally the entity type. One reader may carry several layouts when a
//! resource ships differently shaped files (MeSH descriptors and
//! supplementary records).

use quick_xml::events::Event;
use quick_xml::Reader;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::{ConceptIter, ReaderContext, RecordReader};
use crate::error::{IngestError, Result};
use termhub_common::types::Concept;

/// How the entity type of a record is determined
#[derive(Clone)]
pub enum EntityRule {
    /// The resource's default entity type
    Default,
    /// Mapped from the first value found at `path`; `None` falls back to the default
    Path {
        path: &'static str,
        map: fn(&str) -> Option<String>,
    },
}

impl fmt::Debug for EntityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRule::Default => f.write_str("Default"),
            EntityRule::Path { path, .. } => f.debug_struct("Path").field("path", path).finish(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct XmlLayout {
    pub record: &'static str,
    /// First occurrence wins
    pub id: &'static str,
    /// First occurrence wins
    pub preferred: &'static str,
    /// Every occurrence is a synonym
    pub synonyms: Vec<&'static str>,
    pub entity: EntityRule,
}

#[derive(Debug, Clone)]
pub struct XmlReader {
    layouts: Vec<XmlLayout>,
}

impl XmlReader {
    pub fn new(layouts: Vec<XmlLayout>) -> Self {
        Self { layouts }
    }
}

impl RecordReader for XmlReader {
    fn format(&self) -> &'static str {
        "xml"
    }

    fn read_file(&self, path: &Path, ctx: &ReaderContext) -> Result<ConceptIter> {
        let file = File::open(path)?;
        let mut reader = Reader::from_reader(BufReader::new(file));
        reader.config_mut().trim_text(true);

        Ok(Box::new(XmlIter {
            reader,
            layouts: self.layouts.clone(),
            ctx: ctx.clone(),
            buf: Vec::new(),
            active: None,
            stack: Vec::new(),
            text: String::new(),
            record: RecordFields::default(),
            done: false,
        }))
    }
}

#[derive(Debug, Default)]
struct RecordFields {
    start: u64,
    id: Option<String>,
    preferred: Option<String>,
    synonyms: Vec<String>,
    entity: Option<String>,
}

struct XmlIter<R> {
    reader: Reader<R>,
    layouts: Vec<XmlLayout>,
    ctx: ReaderContext,
    buf: Vec<u8>,
    /// Index of the layout whose record is open
    active: Option<usize>,
    /// Element names below the open record element
    stack: Vec<String>,
    text: String,
    record: RecordFields,
    done: bool,
}

impl<R: BufRead> Iterator for XmlIter<R> {
    type Item = Result<Concept>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            self.buf.clear();
            let event = match self.reader.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e.into()));
                },
            };

            match event {
                Event::Start(start) => {
                    let name = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
                    self.text.clear();
                    if self.active.is_some() {
                        self.stack.push(name);
                    } else if let Some(i) = self.layouts.iter().position(|l| l.record == name) {
                        self.active = Some(i);
                        self.stack.clear();
                        self.record = RecordFields {
                            start: self.reader.buffer_position() as u64,
                            ..RecordFields::default()
                        };
                    }
                },
                Event::Text(text) if self.active.is_some() => match text.unescape() {
                    Ok(text) => self.text.push_str(&text),
                    Err(e) => {
                        self.done = true;
                        return Some(Err(e.into()));
                    },
                },
                Event::CData(data) if self.active.is_some() => {
                    self.text.push_str(&String::from_utf8_lossy(&data));
                },
                Event::End(_) => {
                    let Some(i) = self.active else { continue };
                    if self.stack.is_empty() {
                        self.active = None;
                        return Some(self.build(i));
                    }
                    self.close_element(i);
                },
                Event::Eof => {
                    self.done = true;
                    if self.active.take().is_some() {
                        return Some(Err(IngestError::malformed(
                            &self.ctx.source_name,
                            format!("byte {}", self.record.start),
                            "document ends inside a record",
                        )));
                    }
                    return None;
                },
                _ => {},
            }
        }
    }
}

impl<R> XmlIter<R> {
    fn close_element(&mut self, layout: usize) {
        let layout = &self.layouts[layout];
        let path = self.stack.join("/");
        let value = self.text.trim();

        if !value.is_empty() {
            if path == layout.id && self.record.id.is_none() {
                self.record.id = Some(value.to_string());
            }
            if path == layout.preferred && self.record.preferred.is_none() {
                self.record.preferred = Some(value.to_string());
            }
            if layout.synonyms.iter().any(|s| *s == path) {
                self.record.synonyms.push(value.to_string());
            }
            if let EntityRule::Path { path: entity_path, map } = &layout.entity {
                if *entity_path == path && self.record.entity.is_none() {
                    self.record.entity = map(value);
                }
            }
        }

        self.stack.pop();
        self.text.clear();
    }

    fn build(&mut self, layout: usize) -> Result<Concept> {
        let record = std::mem::take(&mut self.record);
        let location = format!("{} at byte {}", self.layouts[layout].record, record.start);

        let Some(id) = record.id else {
            return Err(IngestError::malformed(&self.ctx.source_name, location, "missing id"));
        };
        let Some(preferred) = record.preferred.or_else(|| record.synonyms.first().cloned()) else {
            return Err(IngestError::malformed(
                &self.ctx.source_name,
                location,
                format!("{} has no terms", id),
            ));
        };

        let mut concept = self.ctx.concept(id, preferred).with_terms(record.synonyms);
        if let Some(entity) = record.entity {
            concept.entity_type = entity;
        }
        Ok(concept)
    }
}
