//! Staged dump files and update sentinels
//!
//! While a resource updates, each destination `<dump>` is written to
//! `<dump>.tmp` next to it. That temp file doubles as the advisory
//! "update in progress" sentinel other processes look for: it is claimed
//! with exclusive creation, a [`Heartbeat`] refreshes its mtime while the
//! update runs, and one older than the dead-update threshold belongs to a
//! crashed update.
//! Destinations are renamed into place together on [`Staging::commit`];
//! dropping an uncommitted staging removes every temp file.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

use crate::error::{IngestError, Result};

pub const SENTINEL_SUFFIX: &str = ".tmp";

const COPY_CHUNK: usize = 64 * 1024;

/// `<dump>.tmp`
pub fn sentinel_path(dump: &Path) -> PathBuf {
    let mut name = dump.file_name().unwrap_or_default().to_os_string();
    name.push(SENTINEL_SUFFIX);
    dump.with_file_name(name)
}

/// Time since the file was last modified; `None` if it does not exist
pub fn file_age(path: &Path) -> io::Result<Option<Duration>> {
    match fs::metadata(path) {
        Ok(meta) => {
            let modified = meta.modified()?;
            Ok(Some(SystemTime::now().duration_since(modified).unwrap_or_default()))
        },
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// First live sentinel next to any of `dumps`
pub fn live_sentinel(dumps: &[PathBuf], dead_after: Duration) -> io::Result<Option<PathBuf>> {
    for dump in dumps {
        let sentinel = sentinel_path(dump);
        if let Some(age) = file_age(&sentinel)? {
            if age < dead_after {
                return Ok(Some(sentinel));
            }
        }
    }
    Ok(None)
}

/// Refreshes the mtime of claimed sentinels
///
/// Pulses at most once per quarter of the dead-update threshold, so a long
/// spool or merge buffer never lets an idle sentinel look abandoned.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    sentinels: Vec<PathBuf>,
    every: Duration,
    last: Instant,
}

impl Heartbeat {
    pub(crate) fn new(sentinels: Vec<PathBuf>, dead_after: Duration) -> Self {
        Self {
            sentinels,
            every: dead_after / 4,
            last: Instant::now(),
        }
    }

    /// Touch every sentinel if the last refresh is due
    pub fn pulse(&mut self) -> io::Result<()> {
        if self.last.elapsed() < self.every {
            return Ok(());
        }
        let now = SystemTime::now();
        for sentinel in &self.sentinels {
            match OpenOptions::new().append(true).open(sentinel) {
                Ok(file) => file.set_modified(now)?,
                // committed or dropped already
                Err(e) if e.kind() == io::ErrorKind::NotFound => {},
                Err(e) => return Err(e),
            }
        }
        self.last = Instant::now();
        Ok(())
    }

    /// `io::copy` that pulses between chunks
    pub fn copy<R, W>(&mut self, reader: &mut R, writer: &mut W) -> io::Result<u64>
    where
        R: Read + ?Sized,
        W: Write + ?Sized,
    {
        let mut buf = vec![0u8; COPY_CHUNK];
        let mut total = 0u64;
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => return Ok(total),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            writer.write_all(&buf[..n])?;
            total += n as u64;
            self.pulse()?;
        }
    }
}

#[derive(Debug)]
struct Staged {
    name: String,
    dest: PathBuf,
    temp: PathBuf,
    written: bool,
}

/// Claimed temp files of one update
#[derive(Debug)]
pub struct Staging {
    dir: PathBuf,
    files: Vec<Staged>,
    heartbeat: Heartbeat,
    committed: bool,
}

impl Staging {
    /// Claim the sentinel of every destination in `dir`
    ///
    /// Fails with `ConcurrentUpdateInProgress` if a sentinel younger than
    /// `dead_after` exists; older ones are taken over.
    pub fn claim(dir: &Path, names: &[String], dead_after: Duration) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let mut staging = Self {
            dir: dir.to_path_buf(),
            files: Vec::with_capacity(names.len()),
            heartbeat: Heartbeat::new(Vec::with_capacity(names.len()), dead_after),
            committed: false,
        };

        for name in names {
            let dest = dir.join(name);
            let temp = sentinel_path(&dest);
            if let Err(e) = create_exclusive(&temp) {
                if e.kind() != io::ErrorKind::AlreadyExists {
                    return Err(e.into());
                }
                let stale = file_age(&temp)?.map_or(true, |age| age >= dead_after);
                if !stale {
                    return Err(IngestError::ConcurrentUpdateInProgress {
                        resource: name.clone(),
                        sentinel: temp.display().to_string(),
                    });
                }
                warn!(sentinel = %temp.display(), "Replacing sentinel of a dead update");
                match fs::remove_file(&temp) {
                    Ok(()) => {},
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {},
                    Err(e) => return Err(e.into()),
                }
                create_exclusive(&temp).map_err(|e| match e.kind() {
                    io::ErrorKind::AlreadyExists => IngestError::ConcurrentUpdateInProgress {
                        resource: name.clone(),
                        sentinel: temp.display().to_string(),
                    },
                    _ => e.into(),
                })?;
            }
            debug!(sentinel = %temp.display(), "Claimed update sentinel");
            staging.heartbeat.sentinels.push(temp.clone());
            staging.files.push(Staged {
                name: name.clone(),
                dest,
                temp,
                written: false,
            });
        }
        Ok(staging)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Heartbeat over every sentinel of this update
    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat.clone()
    }

    /// Copy `stream` into the staged file of `name`; returns bytes written
    pub fn write<R: Read + ?Sized>(&mut self, name: &str, stream: &mut R) -> Result<u64> {
        let index = self
            .files
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| IngestError::Pipeline(format!("destination {} was not claimed", name)))?;
        if self.files[index].written {
            return Err(IngestError::Pipeline(format!("destination {} written twice", name)));
        }

        let mut out = BufWriter::new(File::create(&self.files[index].temp)?);
        let bytes = self.heartbeat.copy(stream, &mut out)?;
        out.flush()?;
        out.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        self.files[index].written = true;
        Ok(bytes)
    }

    /// Rename every staged file into place
    pub fn commit(mut self) -> Result<Vec<PathBuf>> {
        if let Some(missing) = self.files.iter().find(|f| !f.written) {
            return Err(IngestError::Pipeline(format!(
                "destination {} was never written",
                missing.name
            )));
        }
        let mut committed = Vec::with_capacity(self.files.len());
        for staged in &self.files {
            fs::rename(&staged.temp, &staged.dest)?;
            committed.push(staged.dest.clone());
        }
        self.committed = true;
        Ok(committed)
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for staged in &self.files {
            if let Err(e) = fs::remove_file(&staged.temp) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(file = %staged.temp.display(), error = %e, "Failed to remove staged file");
                }
            }
        }
    }
}

fn create_exclusive(path: &Path) -> io::Result<File> {
    OpenOptions::new().write(true).create_new(true).open(path)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const DEAD: Duration = Duration::from_secs(3600);

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_sentinel_path() {
        assert_eq!(sentinel_path(Path::new("/d/go.obo")), PathBuf::from("/d/go.obo.tmp"));
    }

    #[test]
    fn test_commit_replaces_destinations() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), "old").unwrap();

        let mut staging = Staging::claim(dir.path(), &names(&["a", "b"]), DEAD).unwrap();
        assert!(dir.path().join("a.tmp").exists());
        staging.write("a", &mut &b"new a"[..]).unwrap();
        staging.write("b", &mut &b"new b"[..]).unwrap();
        staging.commit().unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("a")).unwrap(), "new a");
        assert_eq!(fs::read_to_string(dir.path().join("b")).unwrap(), "new b");
        assert!(!dir.path().join("a.tmp").exists());
    }

    #[test]
    fn test_drop_discards_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a"), "old").unwrap();
        {
            let mut staging = Staging::claim(dir.path(), &names(&["a"]), DEAD).unwrap();
            staging.write("a", &mut &b"half"[..]).unwrap();
        }
        assert_eq!(fs::read_to_string(dir.path().join("a")).unwrap(), "old");
        assert!(!dir.path().join("a.tmp").exists());
    }

    #[test]
    fn test_live_sentinel_blocks_second_claim() {
        let dir = tempfile::tempdir().unwrap();
        let _first = Staging::claim(dir.path(), &names(&["a"]), DEAD).unwrap();

        let err = Staging::claim(dir.path(), &names(&["a"]), DEAD).unwrap_err();
        assert!(matches!(err, IngestError::ConcurrentUpdateInProgress { .. }));
        assert!(live_sentinel(&[dir.path().join("a")], DEAD).unwrap().is_some());
        assert!(dir.path().join("a.tmp").exists());
    }

    #[test]
    fn test_dead_sentinel_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.tmp"), "leftover").unwrap();

        assert!(live_sentinel(&[dir.path().join("a")], Duration::ZERO).unwrap().is_none());
        let staging = Staging::claim(dir.path(), &names(&["a"]), Duration::ZERO).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("a.tmp")).unwrap(), "");
        drop(staging);
    }

    fn backdate(path: &Path, by: Duration) {
        OpenOptions::new()
            .append(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() - by)
            .unwrap();
    }

    #[test]
    fn test_heartbeat_refreshes_unwritten_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let mut staging = Staging::claim(dir.path(), &names(&["a", "b"]), Duration::ZERO).unwrap();
        let sentinel = dir.path().join("b.tmp");
        backdate(&sentinel, DEAD);

        staging.write("a", &mut &b"data"[..]).unwrap();
        assert!(file_age(&sentinel).unwrap().unwrap() < DEAD / 2);

        // a separate copy pulses too, without touching data
        backdate(&sentinel, DEAD);
        let mut sink = Vec::new();
        let copied = staging.heartbeat().copy(&mut &b"xyz"[..], &mut sink).unwrap();
        assert_eq!((copied, sink.as_slice()), (3, &b"xyz"[..]));
        assert!(file_age(&sentinel).unwrap().unwrap() < DEAD / 2);
        assert_eq!(fs::read_to_string(&sentinel).unwrap(), "");
    }

    #[test]
    fn test_heartbeat_is_throttled() {
        let dir = tempfile::tempdir().unwrap();
        let staging = Staging::claim(dir.path(), &names(&["a"]), DEAD).unwrap();
        let sentinel = dir.path().join("a.tmp");
        backdate(&sentinel, Duration::from_secs(60));

        staging.heartbeat().pulse().unwrap();
        assert!(file_age(&sentinel).unwrap().unwrap() >= Duration::from_secs(60));
    }

    #[test]
    fn test_unwritten_destination_blocks_commit() {
        let dir = tempfile::tempdir().unwrap();
        let staging = Staging::claim(dir.path(), &names(&["a"]), DEAD).unwrap();
        assert!(staging.commit().is_err());
        assert!(!dir.path().join("a").exists());
    }
}
