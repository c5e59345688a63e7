//! Download-time preprocessors for formats without a dedicated reader

use std::collections::HashSet;
use std::io::{self, BufRead, BufReader, Write};

use crate::pipeline::{line_transform, Stream};

/// NCBI division of environmental samples; their names are not organisms
const ENVIRONMENTAL_SAMPLES_DIVISION: &str = "11";

#[derive(Debug, Default)]
struct CellLineEntry {
    accession: Option<String>,
    name: Option<String>,
    synonyms: Vec<String>,
}

impl CellLineEntry {
    fn flush(&mut self, out: &mut Vec<u8>) -> io::Result<()> {
        let entry = std::mem::take(self);
        let (Some(accession), Some(name)) = (entry.accession, entry.name) else {
            return Ok(());
        };
        write!(out, "{}\t{}", clean(&accession), clean(&name))?;
        for synonym in &entry.synonyms {
            write!(out, "\t{}", clean(synonym))?;
        }
        out.push(b'\n');
        Ok(())
    }
}

fn clean(field: &str) -> String {
    field.trim().replace('\t', " ")
}

/// Cellosaurus flat file → canonical lines
///
/// Entries are `ID`/`AC`/`SY` tagged lines closed by `//`. The first
/// accession is the id, the cell line name is the preferred term, and `SY`
/// holds `; `-separated synonyms.
pub fn cellosaurus_to_canonical<'a>(stream: Stream<'a>) -> io::Result<Stream<'a>> {
    let mut entry = CellLineEntry::default();
    Ok(line_transform(stream, move |line, out| {
        let Some(line) = line else {
            return entry.flush(out);
        };
        if line.starts_with("//") {
            return entry.flush(out);
        }
        let (Some(tag), Some(value)) = (line.get(..2), line.get(5..)) else {
            return Ok(());
        };
        match tag {
            "ID" => entry.name = Some(value.to_string()),
            "AC" if entry.accession.is_none() => entry.accession = Some(value.to_string()),
            "SY" => entry.synonyms.extend(
                value
                    .split("; ")
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from),
            ),
            _ => {},
        }
        Ok(())
    }))
}

/// Fields of a `.dmp` line: `a\t|\tb\t|\tc\t|`
fn dmp_fields(line: &str) -> Vec<&str> {
    line.strip_suffix("\t|")
        .unwrap_or(line)
        .split("\t|\t")
        .collect()
}

/// Join `names.dmp` with `nodes.dmp` into `tax_id<TAB>name_class<TAB>name`
///
/// Expects the two streams in that order. Names of taxa missing from
/// `nodes.dmp` or filed under environmental samples are dropped.
pub fn join_taxonomy<'a>(streams: Vec<Stream<'a>>) -> io::Result<Stream<'a>> {
    let [names, nodes]: [Stream<'a>; 2] = streams.try_into().map_err(|streams: Vec<_>| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("taxonomy join expects 2 streams, got {}", streams.len()),
        )
    })?;

    let mut taxa = HashSet::new();
    for line in BufReader::new(nodes).lines() {
        let line = line?;
        let fields = dmp_fields(&line);
        match (fields.first(), fields.get(4)) {
            (Some(_), Some(&ENVIRONMENTAL_SAMPLES_DIVISION)) => {},
            (Some(tax_id), Some(_)) => {
                taxa.insert(tax_id.trim().to_string());
            },
            _ => {},
        }
    }

    Ok(line_transform(names, move |line, out| {
        let Some(line) = line else {
            return Ok(());
        };
        let fields = dmp_fields(line);
        if let (Some(tax_id), Some(name), Some(class)) = (fields.first(), fields.get(1), fields.get(3)) {
            if taxa.contains(tax_id.trim()) {
                writeln!(out, "{}\t{}\t{}", tax_id.trim(), class.trim(), clean(name))?;
            }
        }
        Ok(())
    }))
}
