//! Resource descriptors and the registry
//!
//! A [`ResourceDescriptor`] ties one source database to the recipes that
//! fetch its dumps and the reader that walks them. The [`Registry`] maps
//! resource names to descriptors; [`Registry::builtin`] carries the
//! resources shipped with termhub.

pub mod builtin;
pub mod transforms;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::pipeline::Recipe;
use crate::records::{IdPrefix, ReaderContext, RecordReader};

#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    pub name: &'static str,
    pub resource_label: &'static str,
    pub entity_type: &'static str,
    pub recipes: Vec<Recipe>,
    pub reader: Arc<dyn RecordReader>,
    /// Prefix used when ids are written as URIs
    pub uri_prefix: Option<IdPrefix>,
    /// Reference resource whose `(id, term)` pairs this one duplicates
    pub reference: Option<&'static str>,
    /// Environment variable whose absence prevents downloads
    pub missing_credential: Option<&'static str>,
}

impl ResourceDescriptor {
    /// Dump file names, in recipe order
    pub fn dump_names(&self) -> Vec<String> {
        self.recipes
            .iter()
            .flat_map(|recipe| recipe.destinations())
            .map(String::from)
            .collect()
    }

    pub fn dump_paths(&self, dump_dir: &Path) -> Vec<PathBuf> {
        self.dump_names()
            .into_iter()
            .map(|name| dump_dir.join(name))
            .collect()
    }

    pub fn urls(&self) -> Vec<String> {
        self.recipes.iter().map(|r| r.url().to_string()).collect()
    }

    pub fn context(&self) -> ReaderContext {
        ReaderContext::new(self.name, self.resource_label, self.entity_type)
    }

    /// Every dump file is present
    pub fn is_available(&self, dump_dir: &Path) -> bool {
        self.dump_paths(dump_dir).iter().all(|p| p.is_file())
    }
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    resources: BTreeMap<String, Arc<ResourceDescriptor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The resources shipped with termhub, configured for `config`
    pub fn builtin(config: &IngestConfig) -> Result<Self> {
        let mut registry = Self::new();
        for descriptor in builtin::descriptors(config)? {
            registry.register(descriptor);
        }
        Ok(registry)
    }

    /// Add or replace a resource
    pub fn register(&mut self, descriptor: ResourceDescriptor) {
        self.resources
            .insert(descriptor.name.to_string(), Arc::new(descriptor));
    }

    pub fn get(&self, name: &str) -> Result<&Arc<ResourceDescriptor>> {
        self.resources
            .get(name)
            .ok_or_else(|| IngestError::UnknownResource(name.to_string()))
    }

    /// Sorted resource names
    pub fn names(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resources declaring `reference` as the one they duplicate
    pub fn dependents(&self, reference: &str) -> Vec<&str> {
        self.resources
            .values()
            .filter(|r| r.reference == Some(reference))
            .map(|r| r.name)
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn registry() -> Registry {
        Registry::builtin(&IngestConfig::default()).unwrap()
    }

    #[test]
    fn test_builtin_resource_set() {
        let registry = registry();
        assert_eq!(
            registry.names(),
            [
                "cell_ontology",
                "cellosaurus",
                "chebi",
                "ctd_chem",
                "ctd_disease",
                "entrezgene",
                "gene_ontology",
                "mesh",
                "rxnorm",
                "sequence_ontology",
                "swissprot",
                "taxonomy",
            ]
        );
        assert_eq!(registry.dependents("mesh"), ["ctd_chem", "ctd_disease"]);
        assert!(registry.dependents("chebi").is_empty());
    }

    #[test]
    fn test_dump_names_follow_recipes() {
        let registry = registry();
        assert_eq!(registry.get("mesh").unwrap().dump_names(), ["desc.xml", "supp.xml"]);
        assert_eq!(registry.get("taxonomy").unwrap().dump_names(), ["taxonomy.dmp"]);
        assert_eq!(registry.get("rxnorm").unwrap().dump_names(), ["RXNCONSO.RRF"]);
        assert!(matches!(
            registry.get("umls"),
            Err(IngestError::UnknownResource(_))
        ));
    }

    #[test]
    fn test_rxnorm_needs_key() {
        let mut config = IngestConfig::default();
        config.umls_api_key = None;
        let registry = Registry::builtin(&config).unwrap();
        assert_eq!(
            registry.get("rxnorm").unwrap().missing_credential,
            Some("UMLS_API_KEY")
        );

        config.umls_api_key = Some("k".to_string());
        let registry = Registry::builtin(&config).unwrap();
        let rxnorm = registry.get("rxnorm").unwrap();
        assert_eq!(rxnorm.missing_credential, None);
        assert!(rxnorm.urls()[0].ends_with("apiKey=k"));
    }

    #[test]
    fn test_availability() {
        let dir = tempfile::tempdir().unwrap();
        let registry = registry();
        let mesh = registry.get("mesh").unwrap();
        std::fs::write(dir.path().join("desc.xml"), "").unwrap();
        assert!(!mesh.is_available(dir.path()));
        std::fs::write(dir.path().join("supp.xml"), "").unwrap();
        assert!(mesh.is_available(dir.path()));
    }
}
