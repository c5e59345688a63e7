//! Pull-based recipe execution
//!
//! Runs on a blocking thread: every step wraps the stream it receives, and
//! reading happens only when a `WriteFile` step copies into its staged file.

use std::io::{Seek, SeekFrom};
use tempfile::SpooledTempFile;
use tracing::{debug, info};

use super::decompression::{gunzip, is_regular_tar_entry, spool_to_file, tar_entry_path};
use super::staging::Heartbeat;
use super::{Branch, Codec, Recipe, Staging, Step, Stream};
use crate::error::{IngestError, Result};

pub struct Executor<'s> {
    staging: &'s mut Staging,
    /// Keeps the sentinels alive while nothing is staged yet
    heartbeat: Heartbeat,
    spill_threshold: usize,
}

impl<'s> Executor<'s> {
    /// `spill_threshold` bounds the in-memory size of each merge buffer
    pub fn new(staging: &'s mut Staging, spill_threshold: usize) -> Self {
        Self {
            heartbeat: staging.heartbeat(),
            staging,
            spill_threshold,
        }
    }

    pub fn run(&mut self, input: Stream<'_>, recipe: &Recipe) -> Result<()> {
        info!(url = %recipe.url(), "Running update recipe");
        self.run_steps(input, recipe.steps())
    }

    fn run_steps(&mut self, mut stream: Stream<'_>, steps: &[Step]) -> Result<()> {
        for (i, step) in steps.iter().enumerate() {
            match step {
                Step::Decompress(Codec::Gz) => stream = gunzip(stream),
                Step::Transform(transform) => stream = transform(stream)?,
                Step::Decompress(Codec::Tar) => return self.tar(stream, &steps[i + 1..]),
                Step::Decompress(Codec::Zip) => return self.zip(stream, &steps[i + 1..]),
                Step::WriteFile(name) => {
                    let bytes = self.staging.write(name, &mut stream)?;
                    debug!(file = %name, bytes, "Staged dump file");
                    return Ok(());
                },
                Step::Fork(_) | Step::Merge(_) => {
                    return Err(IngestError::Pipeline(format!("{:?} out of place", step)));
                },
            }
        }
        Err(IngestError::Pipeline("chain ended without WriteFile".to_string()))
    }

    fn tar(&mut self, stream: Stream<'_>, rest: &[Step]) -> Result<()> {
        let mut archive = tar::Archive::new(stream);
        let entries = archive.entries()?;

        if let Some((Step::Fork(branches), after)) = rest.split_first() {
            let mut fork = Fork::new(branches, after);
            for entry in entries {
                let entry = entry?;
                if !is_regular_tar_entry(&entry) {
                    continue;
                }
                let path = tar_entry_path(&entry)?;
                if fork.visit(self, &path, Box::new(entry))? {
                    break;
                }
            }
            return fork.finish();
        }

        for entry in entries {
            let entry = entry?;
            if is_regular_tar_entry(&entry) {
                debug!(member = %tar_entry_path(&entry)?, "Streaming first tar member");
                return self.run_steps(Box::new(entry), rest);
            }
        }
        Err(IngestError::Pipeline("tar archive has no regular member".to_string()))
    }

    fn zip(&mut self, mut stream: Stream<'_>, rest: &[Step]) -> Result<()> {
        let spooled = spool_to_file(&mut stream, self.staging.dir(), &mut self.heartbeat)?;
        let mut archive = zip::ZipArchive::new(spooled)?;

        if let Some((Step::Fork(branches), after)) = rest.split_first() {
            let mut fork = Fork::new(branches, after);
            for index in 0..archive.len() {
                let member = archive.by_index(index)?;
                if !member.is_file() {
                    continue;
                }
                let name = member.name().to_string();
                if fork.visit(self, &name, Box::new(member))? {
                    break;
                }
            }
            return fork.finish();
        }

        for index in 0..archive.len() {
            let member = archive.by_index(index)?;
            if member.is_file() {
                debug!(member = %member.name(), "Streaming first zip member");
                return self.run_steps(Box::new(member), rest);
            }
        }
        Err(IngestError::Pipeline("zip archive has no regular member".to_string()))
    }
}

/// Branch steps of a merged fork: stream wrappers only
fn wrap_branch<'a>(mut stream: Stream<'a>, steps: &[Step]) -> Result<Stream<'a>> {
    for step in steps {
        stream = match step {
            Step::Decompress(Codec::Gz) => gunzip(stream),
            Step::Transform(transform) => transform(stream)?,
            other => {
                return Err(IngestError::Pipeline(format!(
                    "{:?} not allowed in a merged branch",
                    other
                )))
            },
        };
    }
    Ok(stream)
}

/// Bookkeeping for one pass over a forked archive
struct Fork<'b> {
    branches: &'b [Branch],
    /// `[Merge, downstream...]`, or empty
    after: &'b [Step],
    found: Vec<bool>,
    buffers: Vec<Option<SpooledTempFile>>,
    remaining: usize,
}

impl<'b> Fork<'b> {
    fn new(branches: &'b [Branch], after: &'b [Step]) -> Self {
        Self {
            branches,
            after,
            found: vec![false; branches.len()],
            buffers: branches.iter().map(|_| None).collect(),
            remaining: branches.len(),
        }
    }

    /// Route one archive member; returns `true` once every branch was served
    fn visit(&mut self, exec: &mut Executor<'_>, path: &str, stream: Stream<'_>) -> Result<bool> {
        let Some(index) = (0..self.branches.len())
            .find(|&i| !self.found[i] && self.branches[i].matches(path))
        else {
            return Ok(false);
        };
        self.found[index] = true;
        self.remaining -= 1;
        let branches = self.branches;
        let branch = &branches[index];
        debug!(member = %path, branch = %branch.member, "Archive member matched");

        let Some((Step::Merge(merge), downstream)) = self.after.split_first() else {
            exec.run_steps(stream, &branch.steps)?;
            return Ok(self.remaining == 0);
        };

        let mut live = wrap_branch(stream, &branch.steps)?;
        if self.remaining > 0 {
            let mut buffer = SpooledTempFile::new(exec.spill_threshold);
            exec.heartbeat.copy(&mut live, &mut buffer)?;
            buffer.seek(SeekFrom::Start(0))?;
            self.buffers[index] = Some(buffer);
            return Ok(false);
        }

        let mut streams: Vec<Stream<'_>> = Vec::with_capacity(self.branches.len());
        for (i, buffer) in self.buffers.iter_mut().enumerate() {
            if i == index {
                continue;
            }
            let buffer = buffer.take().ok_or_else(|| {
                IngestError::Pipeline(format!("branch {} was not buffered", branches[i].member))
            })?;
            streams.push(Box::new(buffer));
        }
        streams.insert(index, live);

        let merged = merge(streams)?;
        exec.run_steps(merged, downstream)?;
        Ok(true)
    }

    fn finish(self) -> Result<()> {
        if self.remaining == 0 {
            return Ok(());
        }
        let missing = self
            .branches
            .iter()
            .zip(&self.found)
            .filter(|(_, found)| !**found)
            .map(|(branch, _)| branch.member.clone())
            .collect();
        Err(IngestError::MissingMembers(missing))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::super::decompression::test_support;
    use super::super::transform::line_transform;
    use super::*;
    use std::io::{self, Read};
    use std::time::{Duration, SystemTime};

    fn upper<'a>(stream: Stream<'a>) -> io::Result<Stream<'a>> {
        Ok(line_transform(stream, |line, out| {
            if let Some(line) = line {
                out.extend_from_slice(line.to_uppercase().as_bytes());
                out.push(b'\n');
            }
            Ok(())
        }))
    }

    fn labelled<'a>(streams: Vec<Stream<'a>>) -> io::Result<Stream<'a>> {
        let mut out = String::new();
        for (i, mut stream) in streams.into_iter().enumerate() {
            let mut content = String::new();
            stream.read_to_string(&mut content)?;
            out.push_str(&format!("[{}]{}", i, content));
        }
        Ok(Box::new(io::Cursor::new(out.into_bytes())))
    }

    fn run(dir: &std::path::Path, recipe: &Recipe, input: Vec<u8>, threshold: usize) -> Result<()> {
        let files: Vec<String> = recipe.destinations().iter().map(|s| s.to_string()).collect();
        let mut staging = Staging::claim(dir, &files, Duration::from_secs(60))?;
        Executor::new(&mut staging, threshold).run(Box::new(io::Cursor::new(input)), recipe)?;
        staging.commit()?;
        Ok(())
    }

    #[test]
    fn test_gz_transform_write() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = Recipe::new(
            "http://x/a.gz",
            vec![Step::Decompress(Codec::Gz), Step::Transform(upper), Step::write("a.txt")],
        )
        .unwrap();
        run(dir.path(), &recipe, test_support::gzip(b"one\ntwo\n"), 1024).unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("a.txt")).unwrap(), "ONE\nTWO\n");
    }

    #[test]
    fn test_tar_without_fork_streams_first_member() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = Recipe::new(
            "http://x/a.tar",
            vec![Step::Decompress(Codec::Tar), Step::write("first.txt")],
        )
        .unwrap();
        let archive = test_support::tar(&[("dir/first.txt", b"1"), ("second.txt", b"2")]);
        run(dir.path(), &recipe, archive, 1024).unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("first.txt")).unwrap(), "1");
    }

    #[test]
    fn test_merge_hands_streams_in_declaration_order() {
        for threshold in [0, 1 << 20] {
            let dir = tempfile::tempdir().unwrap();
            let recipe = Recipe::new(
                "http://x/taxdump.tar.gz",
                vec![
                    Step::Decompress(Codec::Gz),
                    Step::Decompress(Codec::Tar),
                    Step::Fork(vec![
                        Branch::new("names.dmp", vec![Step::Transform(upper)]),
                        Branch::new("nodes.dmp", vec![]),
                    ]),
                    Step::Merge(labelled),
                    Step::write("joined.txt"),
                ],
            )
            .unwrap();
            // nodes.dmp comes first in the archive
            let archive = test_support::tar(&[
                ("nodes.dmp", b"node\n"),
                ("readme.txt", b"ignored"),
                ("names.dmp", b"name\n"),
            ]);
            run(dir.path(), &recipe, test_support::gzip(&archive), threshold).unwrap();
            assert_eq!(
                std::fs::read_to_string(dir.path().join("joined.txt")).unwrap(),
                "[0]NAME\n[1]node\n"
            );
        }
    }

    #[test]
    fn test_zip_fork_writes_each_member() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = Recipe::new(
            "http://x/rxnorm.zip",
            vec![
                Step::Decompress(Codec::Zip),
                Step::Fork(vec![
                    Branch::new("RXNCONSO.RRF", vec![Step::write("RXNCONSO.RRF")]),
                    Branch::new("rrf/RXNSAT.RRF", vec![Step::write("RXNSAT.RRF")]),
                ]),
            ],
        )
        .unwrap();
        let archive = test_support::zip(&[
            ("rrf/RXNSAT.RRF", b"sat"),
            ("rrf/RXNCONSO.RRF", b"conso"),
        ]);
        run(dir.path(), &recipe, archive, 1024).unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("RXNCONSO.RRF")).unwrap(), "conso");
        assert_eq!(std::fs::read_to_string(dir.path().join("RXNSAT.RRF")).unwrap(), "sat");
    }

    /// Hands out a few bytes per read, sleeping before each
    struct Trickle {
        data: io::Cursor<Vec<u8>>,
        chunk: usize,
        pause: Duration,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            std::thread::sleep(self.pause);
            let len = buf.len().min(self.chunk);
            self.data.read(&mut buf[..len])
        }
    }

    #[test]
    fn test_slow_spool_keeps_pending_sentinels_alive() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = Recipe::new(
            "http://x/rxnorm.zip",
            vec![
                Step::Decompress(Codec::Zip),
                Step::Fork(vec![Branch::new("RXNCONSO.RRF", vec![Step::write("RXNCONSO.RRF")])]),
            ],
        )
        .unwrap();
        let archive = test_support::zip(&[("RXNCONSO.RRF", b"conso")]);
        let chunk = archive.len() / 4 + 1;

        // the second destination belongs to a later recipe of the same update
        let files = vec!["RXNCONSO.RRF".to_string(), "RXNSAT.RRF".to_string()];
        let dead_after = Duration::from_millis(200);
        let mut staging = Staging::claim(dir.path(), &files, dead_after).unwrap();
        let pending = dir.path().join("RXNSAT.RRF.tmp");
        std::fs::File::options()
            .append(true)
            .open(&pending)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(3600))
            .unwrap();

        let input = Trickle {
            data: io::Cursor::new(archive),
            chunk,
            pause: Duration::from_millis(80),
        };
        Executor::new(&mut staging, 1024)
            .run(Box::new(input), &recipe)
            .unwrap();

        let age = SystemTime::now()
            .duration_since(std::fs::metadata(&pending).unwrap().modified().unwrap())
            .unwrap_or_default();
        assert!(age < Duration::from_secs(60), "sentinel left {:?} old", age);
    }

    #[test]
    fn test_missing_member_fails_and_leaves_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let recipe = Recipe::new(
            "http://x/a.tar",
            vec![
                Step::Decompress(Codec::Tar),
                Step::Fork(vec![
                    Branch::new("a.txt", vec![Step::write("a.txt")]),
                    Branch::new("b.txt", vec![Step::write("b.txt")]),
                ]),
            ],
        )
        .unwrap();
        let archive = test_support::tar(&[("a.txt", b"a")]);

        let err = run(dir.path(), &recipe, archive, 1024).unwrap_err();
        assert!(matches!(err, IngestError::MissingMembers(ref m) if m == &["b.txt"]));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_corrupt_gzip_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let recipe =
            Recipe::new("http://x/a.gz", vec![Step::Decompress(Codec::Gz), Step::write("a")]).unwrap();
        assert!(run(dir.path(), &recipe, b"not gzip at all".to_vec(), 1024).is_err());
        assert!(!dir.path().join("a").exists());
    }
}
