//! Content-addressed job keys
//!
//! A key covers the sorted resource names, the mtime of every dump file those
//! resources read, the row flags, the postfilters and the renaming rules. Any
//! dump that changes on disk therefore yields a new key and a fresh build.

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use std::time::UNIX_EPOCH;
use termhub_common::checksum::ContentHasher;
use termhub_ingest::aggregate::AggregateOptions;
use termhub_ingest::resources::Registry;
use termhub_ingest::IngestError;

use crate::error::JobError;

/// Hex digits in a job id
pub const JOB_ID_LEN: usize = 64;

/// One aggregation request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    #[serde(flatten)]
    pub options: AggregateOptions,
    /// Deliver the artifact as a zip archive
    #[serde(default)]
    pub zipped: bool,
}

/// True for strings shaped like a job id; keeps path segments out of the store
pub fn is_job_id(candidate: &str) -> bool {
    candidate.len() == JOB_ID_LEN && candidate.bytes().all(|b| b.is_ascii_hexdigit())
}

fn mtime_nanos(resource: &str, path: &Path) -> Result<u128, JobError> {
    let metadata = fs::metadata(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => JobError::Ingest(IngestError::MissingDump {
            resource: resource.to_string(),
            path: path.display().to_string(),
        }),
        _ => JobError::Io(e),
    })?;
    let modified = metadata.modified()?;
    Ok(modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default())
}

/// Compute the job id for `options` against the dumps in `dump_dir`
///
/// Fails with `MissingDump` when a selected resource has not been fetched.
pub fn job_key(
    options: &AggregateOptions,
    registry: &Registry,
    dump_dir: &Path,
) -> Result<String, JobError> {
    if options.resources.is_empty() {
        return Err(JobError::InvalidRequest("No resources selected".to_string()));
    }

    let mut names: Vec<&str> = options.resources.iter().map(String::as_str).collect();
    names.sort_unstable();
    names.dedup();

    let mut hasher = ContentHasher::new();
    hasher.section("resources");
    for name in names {
        let descriptor = registry.get(name)?;
        hasher.field(name);
        for (dump, path) in descriptor
            .dump_names()
            .into_iter()
            .zip(descriptor.dump_paths(dump_dir))
        {
            let mtime = mtime_nanos(name, &path)?;
            hasher.field(dump).field(mtime.to_string());
        }
    }

    hasher
        .section("flags")
        .field([
            options.skip_cross_lookup as u8,
            options.uri_ids as u8,
            options.oid_schema as u8,
        ]);

    let mut postfilters: Vec<&str> = options.postfilters.iter().map(|p| p.name()).collect();
    postfilters.sort_unstable();
    postfilters.dedup();
    hasher.section("postfilters");
    for postfilter in postfilters {
        hasher.field(postfilter);
    }

    for (tag, rules) in [
        ("rename_resource", &options.renaming.resource),
        ("rename_entity", &options.renaming.entity_type),
    ] {
        let mut rules: Vec<&(String, String)> = rules.iter().collect();
        rules.sort();
        hasher.section(tag);
        for (from, to) in rules {
            hasher.field(from).field(to);
        }
    }

    Ok(hasher.finish())
}
