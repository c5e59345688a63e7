//! On-disk job artifacts
//!
//! Every job id owns a handful of files in the artifact directory:
//!
//! - `<id>.tsv.tmp` while the build runs
//! - `<id>.tsv` once it succeeded (renamed from the temp file)
//! - `<id>.err` when it failed, JSON `{"message": ...}`
//! - `<id>.stats.json` with the aggregation report
//! - `<id>.zip`, created on first zipped download
//!
//! Renames are the only publication mechanism, so readers never see a
//! partial table.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

const TABLE_EXT: &str = "tsv";
const BUILDING_EXT: &str = "tsv.tmp";
const ERROR_EXT: &str = "err";
const ZIP_EXT: &str = "zip";
const STATS_EXT: &str = "stats.json";

/// What the artifact directory says about one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactState {
    Missing,
    Building { age: Duration },
    Ready { path: PathBuf, size: u64 },
    Failed { message: String },
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorSidecar {
    message: String,
}

fn age_of(metadata: &fs::Metadata) -> Duration {
    metadata
        .modified()
        .ok()
        .and_then(|t| SystemTime::now().duration_since(t).ok())
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Open (creating if needed) the artifact directory
    pub fn open(dir: impl Into<PathBuf>) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path(&self, id: &str, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", id, ext))
    }

    pub fn table_path(&self, id: &str) -> PathBuf {
        self.path(id, TABLE_EXT)
    }

    pub fn building_path(&self, id: &str) -> PathBuf {
        self.path(id, BUILDING_EXT)
    }

    pub fn stats_path(&self, id: &str) -> PathBuf {
        self.path(id, STATS_EXT)
    }

    pub fn state(&self, id: &str) -> io::Result<ArtifactState> {
        if let Some(metadata) = metadata_if_exists(&self.table_path(id))? {
            return Ok(ArtifactState::Ready {
                path: self.table_path(id),
                size: metadata.len(),
            });
        }
        if let Some(metadata) = metadata_if_exists(&self.building_path(id))? {
            return Ok(ArtifactState::Building {
                age: age_of(&metadata),
            });
        }
        match File::open(self.path(id, ERROR_EXT)) {
            Ok(file) => {
                let message = serde_json::from_reader::<_, ErrorSidecar>(BufReader::new(file))
                    .map(|sidecar| sidecar.message)
                    .unwrap_or_else(|e| format!("unreadable error sidecar: {}", e));
                Ok(ArtifactState::Failed { message })
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ArtifactState::Missing),
            Err(e) => Err(e),
        }
    }

    /// Create (or truncate a stale) building marker and clear an old failure
    pub fn begin(&self, id: &str) -> io::Result<PathBuf> {
        remove_if_exists(&self.path(id, ERROR_EXT))?;
        let path = self.building_path(id);
        File::create(&path)?;
        Ok(path)
    }

    /// Publish the finished table and its statistics
    pub fn commit<S: Serialize>(&self, id: &str, stats: &S) -> io::Result<PathBuf> {
        let stats_tmp = self.path(id, "stats.json.tmp");
        {
            let mut writer = BufWriter::new(File::create(&stats_tmp)?);
            serde_json::to_writer_pretty(&mut writer, stats)?;
            writer.flush()?;
        }
        fs::rename(&stats_tmp, self.stats_path(id))?;

        let table = self.table_path(id);
        fs::rename(self.building_path(id), &table)?;
        Ok(table)
    }

    /// Record a failed build; `message` is shown to clients
    pub fn fail(&self, id: &str, message: &str) -> io::Result<()> {
        let err_tmp = self.path(id, "err.tmp");
        fs::write(
            &err_tmp,
            serde_json::to_vec(&ErrorSidecar {
                message: message.to_string(),
            })?,
        )?;
        fs::rename(&err_tmp, self.path(id, ERROR_EXT))?;
        remove_if_exists(&self.building_path(id))
    }

    /// Reset the table's mtime so the reaper leaves it alone
    pub fn touch(&self, id: &str) -> io::Result<()> {
        let now = SystemTime::now();
        for ext in [TABLE_EXT, ZIP_EXT, STATS_EXT] {
            match File::options().append(true).open(self.path(id, ext)) {
                Ok(file) => file.set_modified(now)?,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {},
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Zipped copy of a ready table, built on first request
    pub fn zipped(&self, id: &str) -> io::Result<PathBuf> {
        let zip_path = self.path(id, ZIP_EXT);
        if zip_path.exists() {
            return Ok(zip_path);
        }

        let table = self.table_path(id);
        let staged = tempfile::Builder::new()
            .prefix(id)
            .suffix(".zip.tmp")
            .tempfile_in(&self.dir)?;
        {
            let mut archive = ZipWriter::new(BufWriter::new(staged.as_file()));
            let options = SimpleFileOptions::default()
                .compression_method(CompressionMethod::Deflated)
                .large_file(true);
            archive
                .start_file(format!("{}.{}", id, TABLE_EXT), options)
                .map_err(io::Error::other)?;
            io::copy(&mut BufReader::new(File::open(&table)?), &mut archive)?;
            archive.finish().map_err(io::Error::other)?.flush()?;
        }
        staged.persist(&zip_path).map_err(|e| e.error)?;
        debug!(job_id = %id, "Zipped artifact");
        Ok(zip_path)
    }

    /// Delete finished artifacts untouched for `max_age`; returns removed names
    ///
    /// Building markers are left to the stale-build check.
    pub fn reap(&self, max_age: Duration) -> io::Result<Vec<String>> {
        self.sweep(|name, metadata| !name.ends_with(".tmp") && age_of(metadata) > max_age)
    }

    /// Delete every finished artifact regardless of age
    pub fn flush(&self) -> io::Result<Vec<String>> {
        self.sweep(|name, _| !name.ends_with(".tmp"))
    }

    fn sweep(&self, doomed: impl Fn(&str, &fs::Metadata) -> bool) -> io::Result<Vec<String>> {
        let mut removed = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let metadata = match entry.metadata() {
                Ok(metadata) if metadata.is_file() => metadata,
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            if !doomed(&name, &metadata) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed.push(name),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {},
                Err(e) => warn!(file = %name, error = %e, "Failed to remove artifact"),
            }
        }
        removed.sort();
        Ok(removed)
    }
}

fn metadata_if_exists(path: &Path) -> io::Result<Option<fs::Metadata>> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(Some(metadata)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
