//! Concordance tables mapping native ids to CUIs
//!
//! One `<resource>.cui.tsv` per resource, two tab-separated columns:
//! `native_id` and `cui`. Later rows win over earlier ones.

use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone, Default)]
pub struct CuiTable {
    map: HashMap<String, String>,
}

impl CuiTable {
    /// Table file name for a resource
    pub fn file_name(resource: &str) -> String {
        format!("{}.cui.tsv", resource)
    }

    /// Load the resource's table from `dir`; `None` if the file is absent
    pub fn load(dir: &Path, resource: &str) -> Result<Option<Self>> {
        let path = dir.join(Self::file_name(resource));
        if !path.exists() {
            return Ok(None);
        }

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .quoting(false)
            .flexible(true)
            .comment(Some(b'#'))
            .from_path(&path)
            .map_err(csv_io)?;

        let mut map = HashMap::new();
        for (line, record) in reader.records().enumerate() {
            let record = match record {
                Ok(record) => record,
                Err(e) if e.is_io_error() => return Err(csv_io(e)),
                Err(e) => {
                    warn!(path = %path.display(), line = line + 1, error = %e, "Skipping unreadable CUI row");
                    continue;
                },
            };
            match (record.get(0), record.get(1)) {
                (Some(id), Some(cui)) if !id.is_empty() && !cui.is_empty() => {
                    map.insert(id.to_string(), cui.to_string());
                },
                _ => {
                    warn!(path = %path.display(), line = line + 1, "Skipping incomplete CUI row");
                },
            }
        }

        debug!(resource, entries = map.len(), "Loaded CUI table");
        Ok(Some(Self { map }))
    }

    pub fn get(&self, id: &str) -> Option<&str> {
        self.map.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl FromIterator<(String, String)> for CuiTable {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

pub(crate) fn csv_io(err: csv::Error) -> std::io::Error {
    match err.into_kind() {
        csv::ErrorKind::Io(e) => e,
        other => std::io::Error::new(std::io::ErrorKind::InvalidData, format!("{:?}", other)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_load_table() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("mesh.cui.tsv"),
            "# comment\nD001\tC0006731\nD002\nD003\tC0000005\n",
        )
        .unwrap();

        let table = CuiTable::load(dir.path(), "mesh").unwrap().unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.get("D001"), Some("C0006731"));
        assert_eq!(table.get("D002"), None);
    }

    #[test]
    fn test_missing_table_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CuiTable::load(dir.path(), "chebi").unwrap().is_none());
    }
}
