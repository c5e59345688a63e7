//! Decompression and archive helpers for pipeline streams
//!
//! # Supported Formats
//!
//! - **Gzip** (.gz): `flate2`, multi-member aware, fully streaming
//! - **Tar** (.tar): `tar`, one forward pass over the entries
//! - **Zip** (.zip): `zip`; the central directory sits at the end of the
//!   file, so the stream is spooled to disk before members are read

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

use super::staging::Heartbeat;
use super::Stream;

/// Wrap a stream in a gzip decoder
pub fn gunzip<'a>(stream: Stream<'a>) -> Stream<'a> {
    Box::new(MultiGzDecoder::new(stream))
}

/// Copy a stream into an anonymous temp file in `dir` and rewind it
pub fn spool_to_file(
    stream: &mut Stream<'_>,
    dir: &Path,
    heartbeat: &mut Heartbeat,
) -> io::Result<File> {
    let mut file = tempfile::tempfile_in(dir)?;
    let bytes = heartbeat.copy(stream, &mut file)?;
    file.seek(SeekFrom::Start(0))?;
    debug!(bytes, "Spooled archive to disk");
    Ok(file)
}

/// Whether a tar entry carries file data
pub fn is_regular_tar_entry<R: io::Read>(entry: &tar::Entry<'_, R>) -> bool {
    let kind = entry.header().entry_type();
    kind.is_file() || kind == tar::EntryType::Continuous
}

/// Entry path as a `/`-separated string
pub fn tar_entry_path<R: io::Read>(entry: &tar::Entry<'_, R>) -> io::Result<String> {
    Ok(entry.path()?.to_string_lossy().replace('\\', "/"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod test_support {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Cursor, Write};

    /// Gzip-compressed bytes
    pub fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    /// Tar archive with the given members, in order
    pub fn tar(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (name, data) in members {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, name, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    /// Zip archive with the given members, in order
    pub fn zip(members: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in members {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }
}
