//! Per-resource sync state
//!
//! One small text file per resource in the dump directory:
//!
//! ```text
//! <modified> <checked> <changed>
//! <address> <size>
//! ...
//! ```
//!
//! `modified` and `checked` are epoch seconds (0 = never), `changed` is `0`
//! or `1`. Addresses are URLs without their query string.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::error::{IngestError, Result};
use crate::remote::{address_key, SizeProbe};

pub const STATLOG_SUFFIX: &str = ".statlog";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatLog {
    path: PathBuf,
    /// Last successful fetch
    pub modified: Option<i64>,
    /// Last remote probe
    pub checked: i64,
    /// Sticky until the next fetch: remotes never roll back
    pub changed: bool,
    pub sizes: BTreeMap<String, u64>,
}

impl StatLog {
    pub fn path_for(dir: &Path, resource: &str) -> PathBuf {
        dir.join(format!("{}{}", resource, STATLOG_SUFFIX))
    }

    /// Read the StatLog of `resource`, or infer a fresh one from the dump files
    pub fn load(dir: &Path, resource: &str, dumps: &[PathBuf]) -> Result<Self> {
        let path = Self::path_for(dir, resource);
        match fs::read_to_string(&path) {
            Ok(content) => match Self::parse(path.clone(), &content) {
                Some(log) => return Ok(log),
                None => warn!(file = %path.display(), "Unreadable StatLog, rebuilding"),
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => {},
            Err(e) => return Err(e.into()),
        }
        Self::infer(path, dumps)
    }

    /// Oldest dump mtime counts as the last fetch; absent if any dump is missing
    fn infer(path: PathBuf, dumps: &[PathBuf]) -> Result<Self> {
        let mut modified: Option<i64> = None;
        for dump in dumps {
            let mtime = match fs::metadata(dump) {
                Ok(meta) => epoch_secs(meta.modified()?),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    modified = None;
                    break;
                },
                Err(e) => return Err(e.into()),
            };
            modified = Some(modified.map_or(mtime, |m| m.min(mtime)));
        }
        debug!(file = %path.display(), ?modified, "Created StatLog from dump files");
        Ok(Self {
            path,
            modified,
            checked: modified.unwrap_or(0),
            changed: false,
            sizes: BTreeMap::new(),
        })
    }

    fn parse(path: PathBuf, content: &str) -> Option<Self> {
        let mut lines = content.lines();
        let mut head = lines.next()?.split_whitespace();
        let modified: i64 = head.next()?.parse().ok()?;
        let checked: i64 = head.next()?.parse().ok()?;
        let changed = match head.next()? {
            "0" => false,
            "1" => true,
            _ => return None,
        };

        let mut sizes = BTreeMap::new();
        for line in lines.filter(|l| !l.trim().is_empty()) {
            let (address, size) = line.rsplit_once(' ')?;
            sizes.insert(address.to_string(), size.parse().ok()?);
        }
        Some(Self {
            path,
            modified: (modified > 0).then_some(modified),
            checked,
            changed,
            sizes,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn render(&self) -> String {
        let mut out = format!(
            "{} {} {}\n",
            self.modified.unwrap_or(0),
            self.checked,
            u8::from(self.changed)
        );
        for (address, size) in &self.sizes {
            out.push_str(&format!("{} {}\n", address, size));
        }
        out
    }

    /// Write-temp-then-rename
    pub fn save(&self) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir)?;
        let mut temp = tempfile::NamedTempFile::new_in(dir)?;
        temp.write_all(self.render().as_bytes())?;
        temp.as_file().sync_all()?;
        temp.persist(&self.path).map_err(|e| IngestError::Io(e.error))?;
        Ok(())
    }

    /// Forget the sync state; the next run starts from scratch
    ///
    /// Rewritten as never fetched, not deleted: a missing log is inferred
    /// from the dumps left in place.
    pub fn reset(&mut self) -> Result<()> {
        self.modified = None;
        self.checked = 0;
        self.changed = true;
        self.sizes.clear();
        self.save()
    }

    /// Fetched within `min_update_freq`
    pub fn sufficiently_recent(&self, min_update_freq: Duration) -> bool {
        self.sufficiently_recent_at(now(), min_update_freq)
    }

    pub fn sufficiently_recent_at(&self, now: i64, min_update_freq: Duration) -> bool {
        self.modified
            .is_some_and(|modified| now - modified < secs(min_update_freq))
    }

    /// Whether the remote changed since the last fetch
    pub async fn has_changed(
        &mut self,
        probe: &dyn SizeProbe,
        urls: &[String],
        min_check_freq: Duration,
    ) -> Result<bool> {
        self.has_changed_at(now(), probe, urls, min_check_freq).await
    }

    /// Probes at most once per `min_check_freq`. A size recorded for the
    /// first time is a baseline, not a change; a remote without sizes never
    /// reports one.
    pub async fn has_changed_at(
        &mut self,
        now: i64,
        probe: &dyn SizeProbe,
        urls: &[String],
        min_check_freq: Duration,
    ) -> Result<bool> {
        if self.changed {
            return Ok(true);
        }
        if self.modified.is_none() {
            return Ok(true);
        }
        if now - self.checked < secs(min_check_freq) {
            return Ok(false);
        }

        let mut changed = false;
        for url in urls {
            let address = address_key(url);
            let Some(size) = probe.probe_size(url).await? else {
                continue;
            };
            match self.sizes.insert(address.to_string(), size) {
                Some(previous) if previous != size => {
                    info!(address = %address, previous, size, "Remote size changed");
                    changed = true;
                },
                _ => {},
            }
        }
        self.checked = now;
        self.changed = changed;
        self.save()?;
        Ok(changed)
    }

    /// Record a successful fetch and the sizes seen while downloading
    pub fn mark_fetched(&mut self, sizes: impl IntoIterator<Item = (String, Option<u64>)>) -> Result<()> {
        self.mark_fetched_at(now(), sizes)
    }

    pub fn mark_fetched_at(
        &mut self,
        now: i64,
        sizes: impl IntoIterator<Item = (String, Option<u64>)>,
    ) -> Result<()> {
        self.modified = Some(now);
        self.checked = now;
        self.changed = false;
        for (url, size) in sizes {
            let address = address_key(&url).to_string();
            match size {
                Some(size) => {
                    self.sizes.insert(address, size);
                },
                None => {
                    self.sizes.remove(&address);
                },
            }
        }
        self.save()
    }
}

fn epoch_secs(time: std::time::SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn secs(d: Duration) -> i64 {
    i64::try_from(d.as_secs()).unwrap_or(i64::MAX)
}

pub(crate) fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const HOUR: i64 = 3600;

    struct FixedProbe {
        size: Option<u64>,
        calls: AtomicUsize,
    }

    impl FixedProbe {
        fn new(size: Option<u64>) -> Self {
            Self {
                size,
                calls: AtomicUsize::new(0),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SizeProbe for FixedProbe {
        async fn probe_size(&self, _url: &str) -> Result<Option<u64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.size)
        }
    }

    fn fetched_log(dir: &Path, at: i64, size: u64) -> StatLog {
        let mut log = StatLog::load(dir, "go", &[]).unwrap();
        log.mark_fetched_at(at, [("http://r/go.obo".to_string(), Some(size))])
            .unwrap();
        log
    }

    #[test]
    fn test_file_format_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let log = fetched_log(dir.path(), 1_700_000_000, 42);

        let text = fs::read_to_string(log.path()).unwrap();
        assert_eq!(text, "1700000000 1700000000 0\nhttp://r/go.obo 42\n");
        assert_eq!(StatLog::load(dir.path(), "go", &[]).unwrap(), log);
    }

    #[test]
    fn test_inferred_from_dump_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("go.obo");
        fs::write(&dump, "x").unwrap();

        let log = StatLog::load(dir.path(), "go", &[dump]).unwrap();
        assert!(log.modified.is_some());
        assert!(log.sufficiently_recent(Duration::from_secs(3600)));
        assert!(!log.path().exists());

        let missing = StatLog::load(dir.path(), "so", &[dir.path().join("so.obo")]).unwrap();
        assert_eq!(missing.modified, None);
    }

    #[test]
    fn test_garbage_statlog_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(StatLog::path_for(dir.path(), "go"), "not a statlog").unwrap();
        let log = StatLog::load(dir.path(), "go", &[]).unwrap();
        assert_eq!(log.modified, None);
    }

    #[tokio::test]
    async fn test_recent_check_skips_probe() {
        let dir = tempfile::tempdir().unwrap();
        let now = 1_700_000_000;
        let mut log = fetched_log(dir.path(), now - 10 * HOUR, 42);
        log.checked = now - HOUR;

        let probe = FixedProbe::new(Some(99));
        let urls = vec!["http://r/go.obo".to_string()];
        let four_hours = Duration::from_secs(4 * 3600);

        assert!(!log.has_changed_at(now, &probe, &urls, four_hours).await.unwrap());
        assert_eq!(probe.calls(), 0);

        log.changed = true;
        assert!(log.has_changed_at(now, &probe, &urls, four_hours).await.unwrap());
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_size_mismatch_is_sticky() {
        let dir = tempfile::tempdir().unwrap();
        let now = 1_700_000_000;
        let mut log = fetched_log(dir.path(), now - 10 * HOUR, 42);
        let urls = vec!["http://r/go.obo?key=1".to_string()];
        let freq = Duration::from_secs(4 * 3600);

        let probe = FixedProbe::new(Some(43));
        assert!(log.has_changed_at(now, &probe, &urls, freq).await.unwrap());
        assert_eq!(log.sizes["http://r/go.obo"], 43);

        // persisted, and reported again without probing
        let mut reloaded = StatLog::load(dir.path(), "go", &[]).unwrap();
        assert!(reloaded.changed);
        let probe = FixedProbe::new(Some(43));
        assert!(reloaded.has_changed_at(now + 1, &probe, &urls, freq).await.unwrap());
        assert_eq!(probe.calls(), 0);

        reloaded.mark_fetched_at(now + 2, [(urls[0].clone(), Some(43))]).unwrap();
        assert!(!reloaded.changed);
    }

    #[tokio::test]
    async fn test_unchanged_and_unknown_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let now = 1_700_000_000;
        let mut log = fetched_log(dir.path(), now - 10 * HOUR, 42);
        let urls = vec!["http://r/go.obo".to_string(), "http://r/new.obo".to_string()];
        let freq = Duration::from_secs(3600);

        let probe = FixedProbe::new(Some(42));
        assert!(!log.has_changed_at(now, &probe, &urls, freq).await.unwrap());
        assert_eq!(probe.calls(), 2);
        assert_eq!(log.checked, now);
        assert_eq!(log.sizes["http://r/new.obo"], 42);

        let probe = FixedProbe::new(None);
        assert!(!log.has_changed_at(now + 2 * HOUR, &probe, &urls, freq).await.unwrap());
    }

    #[tokio::test]
    async fn test_reset_forces_next_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let dump = dir.path().join("go.obo");
        fs::write(&dump, "x").unwrap();
        let now = 1_700_000_000;
        let mut log = fetched_log(dir.path(), now - 10 * HOUR, 42);
        log.reset().unwrap();

        // the old dump is still there, yet the log is not inferred from it
        let mut reloaded = StatLog::load(dir.path(), "go", &[dump]).unwrap();
        assert_eq!(reloaded.modified, None);
        assert!(!reloaded.sufficiently_recent(Duration::from_secs(3600)));
        assert!(reloaded.sizes.is_empty());

        let probe = FixedProbe::new(Some(42));
        let urls = vec!["http://r/go.obo".to_string()];
        assert!(reloaded
            .has_changed_at(now, &probe, &urls, Duration::from_secs(3600))
            .await
            .unwrap());
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test]
    async fn test_never_fetched_counts_as_changed() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = StatLog::load(dir.path(), "go", &[dir.path().join("go.obo")]).unwrap();
        let probe = FixedProbe::new(Some(1));
        assert!(log
            .has_changed(&probe, &["http://r/go.obo".to_string()], Duration::ZERO)
            .await
            .unwrap());
        assert!(!log.sufficiently_recent(Duration::from_secs(3600)));
    }
}
