//! Label renaming for the `resource` and `entity_type` columns
//!
//! A rule maps a default label to a replacement. Lookup tries every rule as
//! an exact match first, then every rule as a regular expression anchored at
//! the start of the default label. Unmatched labels pass through unchanged.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{IngestError, Result};

/// Caller-supplied rules, one ordered list per renamable field
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenamingRules {
    #[serde(default)]
    pub resource: Vec<(String, String)>,
    #[serde(default)]
    pub entity_type: Vec<(String, String)>,
}

impl RenamingRules {
    pub fn is_empty(&self) -> bool {
        self.resource.is_empty() && self.entity_type.is_empty()
    }

    /// Rules in a canonical order, for hashing
    pub fn sorted(&self) -> RenamingRules {
        let mut sorted = self.clone();
        sorted.resource.sort();
        sorted.entity_type.sort();
        sorted
    }
}

/// Compiled rules for one field
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    exact: HashMap<String, String>,
    patterns: Vec<(Regex, String)>,
    resolved: HashMap<String, String>,
}

impl RuleSet {
    pub fn compile(rules: &[(String, String)]) -> Result<Self> {
        let mut exact = HashMap::with_capacity(rules.len());
        let mut patterns = Vec::with_capacity(rules.len());

        for (pattern, replacement) in rules {
            exact
                .entry(pattern.clone())
                .or_insert_with(|| replacement.clone());
            let regex = Regex::new(&format!("^(?:{})", pattern)).map_err(|e| {
                IngestError::InvalidRenaming {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                }
            })?;
            patterns.push((regex, replacement.clone()));
        }

        Ok(Self {
            exact,
            patterns,
            resolved: HashMap::new(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    /// Replacement for `label`, or `label` itself
    pub fn apply(&mut self, label: &str) -> String {
        if self.is_empty() {
            return label.to_string();
        }
        if let Some(hit) = self.resolved.get(label) {
            return hit.clone();
        }

        let renamed = self
            .exact
            .get(label)
            .or_else(|| {
                self.patterns
                    .iter()
                    .find(|(regex, _)| regex.is_match(label))
                    .map(|(_, replacement)| replacement)
            })
            .cloned()
            .unwrap_or_else(|| label.to_string());

        self.resolved.insert(label.to_string(), renamed.clone());
        renamed
    }
}

/// Compiled rules for both fields
#[derive(Debug, Clone, Default)]
pub struct Renaming {
    pub resource: RuleSet,
    pub entity_type: RuleSet,
}

impl Renaming {
    pub fn compile(rules: &RenamingRules) -> Result<Self> {
        Ok(Self {
            resource: RuleSet::compile(&rules.resource)?,
            entity_type: RuleSet::compile(&rules.entity_type)?,
        })
    }
}
