//! Aggregation of resource records into one term table
//!
//! Resources are read one after another, references before the resources
//! that duplicate them, and every surviving `(concept, term)` pair becomes
//! one row of a single tab-separated table. With `skip_cross_lookup` set, a
//! dependent resource drops the pairs its reference already wrote in this
//! run.

pub mod cross_lookup;
pub mod postfilter;

pub use cross_lookup::CrossLookupSet;
pub use postfilter::Postfilter;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io::Write;
use std::sync::Arc;
use termhub_common::types::OutputSchema;
use tracing::{error, info, warn};

use crate::base36::Base36Gen;
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::records::{CuiTable, IterOptions, RecordIterator, Renaming, RenamingRules, StatsReport, TermStats};
use crate::resources::{Registry, ResourceDescriptor};

/// Parameters of one aggregation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateOptions {
    pub resources: Vec<String>,
    /// Drop `(id, term)` pairs a dependent shares with its reference
    pub skip_cross_lookup: bool,
    /// Write ids as URIs where the resource defines a prefix
    pub uri_ids: bool,
    /// Key rows by generated OIDs instead of CUIs
    pub oid_schema: bool,
    pub postfilters: Vec<Postfilter>,
    pub renaming: RenamingRules,
}

impl AggregateOptions {
    pub fn schema(&self) -> OutputSchema {
        if self.oid_schema {
            OutputSchema::Oid
        } else {
            OutputSchema::Cui
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedResource {
    pub resource: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregateReport {
    pub per_resource: BTreeMap<String, StatsReport>,
    pub total: StatsReport,
    pub failed: Vec<FailedResource>,
    /// Malformed records skipped, per resource
    pub skipped: BTreeMap<String, usize>,
    pub rows_written: u64,
}

pub struct Aggregator {
    config: Arc<IngestConfig>,
    registry: Arc<Registry>,
}

impl Aggregator {
    pub fn new(config: Arc<IngestConfig>, registry: Arc<Registry>) -> Self {
        Self { config, registry }
    }

    /// Selected resources with every reference ahead of its dependents;
    /// otherwise sorted by name
    pub fn order(&self, names: &[String]) -> Result<Vec<Arc<ResourceDescriptor>>> {
        let mut sorted: Vec<&str> = names.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        sorted.dedup();

        let selected: HashSet<&str> = sorted.iter().copied().collect();
        let mut placed = HashSet::new();
        let mut order = Vec::with_capacity(sorted.len());
        for name in sorted {
            let resource = self.registry.get(name)?;
            if let Some(reference) = resource.reference {
                if selected.contains(reference) && placed.insert(reference) {
                    order.push(Arc::clone(self.registry.get(reference)?));
                }
            }
            if placed.insert(resource.name) {
                order.push(Arc::clone(resource));
            }
        }
        Ok(order)
    }

    /// First selected resource without a complete local dump
    pub fn check_available(&self, names: &[String]) -> Result<()> {
        for name in names {
            let resource = self.registry.get(name)?;
            if let Some(path) = resource
                .dump_paths(&self.config.dump_dir)
                .into_iter()
                .find(|p| !p.is_file())
            {
                return Err(IngestError::MissingDump {
                    resource: name.clone(),
                    path: path.display().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Write the aggregated table to `out`
    ///
    /// A resource that cannot be read is reported in
    /// [`AggregateReport::failed`]; only write errors abort the run.
    pub fn run<W: Write>(&self, options: &AggregateOptions, out: &mut W) -> Result<AggregateReport> {
        let order = self.order(&options.resources)?;
        let renaming = Renaming::compile(&options.renaming)?;
        let schema = options.schema();
        schema.write_header(out)?;

        let selected: HashSet<&str> = order.iter().map(|r| r.name).collect();
        let mut lookup = CrossLookupSet::new();
        let mut oids = Base36Gen::new(self.config.oid_start);
        let mut total = TermStats::new();
        let mut report = AggregateReport {
            per_resource: BTreeMap::new(),
            total: total.report(),
            failed: Vec::new(),
            skipped: BTreeMap::new(),
            rows_written: 0,
        };

        for resource in &order {
            let name = resource.name;
            let is_reference = options.skip_cross_lookup
                && self
                    .registry
                    .dependents(name)
                    .iter()
                    .any(|d| selected.contains(d));
            let exclude = if options.skip_cross_lookup {
                resource.reference.and_then(|r| lookup.get(r))
            } else {
                None
            };

            let iter_options = IterOptions {
                exclude,
                postfilters: options.postfilters.clone(),
                renaming: renaming.clone(),
                id_prefix: if options.uri_ids { resource.uri_prefix.clone() } else { None },
                cui: None,
                record_pairs: is_reference,
            };
            let mut records = match self.open(resource, iter_options) {
                Ok(records) => records,
                Err(e) => {
                    error!(resource = %name, error = %e, "Cannot read resource");
                    report.failed.push(FailedResource {
                        resource: name.to_string(),
                        message: e.to_string(),
                    });
                    continue;
                },
            };

            info!(resource = %name, format = resource.reader.format(), "Aggregating");
            let mut rows = 0u64;
            for concept in records.by_ref() {
                let key = match schema {
                    OutputSchema::Oid => oids.next(),
                    OutputSchema::Cui => concept.cui_or_default().to_string(),
                };
                for row in concept.rows_keyed(&key) {
                    row.write_tsv(out)?;
                    rows += 1;
                }
            }
            report.rows_written += rows;

            if let Some(e) = records.take_failure() {
                error!(resource = %name, error = %e, rows, "Resource iteration aborted");
                report.failed.push(FailedResource {
                    resource: name.to_string(),
                    message: e.to_string(),
                });
            }
            if records.skipped() > 0 {
                warn!(resource = %name, skipped = records.skipped(), "Skipped malformed records");
                report.skipped.insert(name.to_string(), records.skipped());
            }
            if is_reference {
                lookup.insert(name, records.take_recorded());
            }
            total.merge(records.stats());
            report
                .per_resource
                .insert(name.to_string(), records.stats().report());
            info!(resource = %name, rows, "Resource aggregated");
        }

        out.flush()?;
        report.total = total.report();
        Ok(report)
    }

    fn open(&self, resource: &ResourceDescriptor, mut options: IterOptions) -> Result<RecordIterator> {
        self.check_available(&[resource.name.to_string()])?;
        if let Some(dir) = &self.config.cui_dir {
            options.cui = CuiTable::load(dir, resource.name)?.map(Arc::new);
        }
        let dumps = resource.dump_paths(&self.config.dump_dir);
        let inner = resource.reader.read(&dumps, &resource.context())?;
        Ok(RecordIterator::new(inner, resource.name, options))
    }
}
