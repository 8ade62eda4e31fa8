//! Streaming extraction into a server filesystem.
//!
//! Every destination is handed to [`Filesystem::write`], which owns root
//! confinement and per-write quota accounting. Extraction is fail-fast: an
//! error on one entry leaves the earlier entries in place and stops.

use std::fs::File;
use std::io::{self, Read, Seek, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{Local, NaiveDate, TimeZone};
use hangar_fs::Filesystem;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, Result};
use crate::format::{Compression, Container, Format};
use crate::options::ExtractOptions;

/// Output name for a single compressed stream that arrived without a name.
const UNNAMED_STREAM_OUTPUT: &str = "archive";

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// One decompression call.
pub struct ExtractRequest<'a, R> {
    pub directory: &'a Path,
    /// Name of the stored archive, used for suffix stripping and error context.
    pub file_name: Option<&'a str>,
    pub format:    Format,
    pub reader:    R,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum EntryKind {
    File,
    Directory,
    /// Links, devices and anything else that is never materialised.
    Other,
}

#[derive(Debug)]
struct EntryMeta {
    name:     String,
    size:     u64,
    mode:     u32,
    modified: Option<SystemTime>,
    kind:     EntryKind,
}

/// Extract `request` into the filesystem.
///
/// An unrecognized format is a no-op; callers that require an archive check
/// the format before getting here.
pub fn extract_stream<R: Read>(
    fs: &Filesystem,
    token: &CancellationToken,
    options: &ExtractOptions,
    request: ExtractRequest<'_, R>,
) -> Result<()> {
    let ExtractRequest {
        directory,
        file_name,
        format,
        reader,
    } = request;

    match format {
        Format::Unrecognized => Ok(()),
        Format::SingleStream(codec) => {
            decompress_single(fs, token, options, directory, file_name, codec, reader)
        }
        Format::MultiEntry(Container::Tar(None)) => {
            extract_tar(fs, token, directory, file_name, reader)
        }
        Format::MultiEntry(Container::Tar(Some(codec))) => {
            let decoder = codec
                .decoder(reader)
                .map_err(|e| Error::from(e).within(file_name))?;
            extract_tar(fs, token, directory, file_name, decoder)
        }
        Format::MultiEntry(Container::Zip) => {
            let spooled = spool(reader).map_err(|e| e.within(file_name))?;
            extract_zip(fs, token, directory, file_name, spooled)
        }
    }
}

/// Indexed path: entries are read straight from a seekable source.
pub(crate) fn extract_zip<R: Read + Seek>(
    fs: &Filesystem,
    token: &CancellationToken,
    directory: &Path,
    archive_name: Option<&str>,
    reader: R,
) -> Result<()> {
    let mut archive = zip::ZipArchive::new(reader).map_err(|e| Error::from(e).within(archive_name))?;

    for index in 0..archive.len() {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut file = archive
            .by_index(index)
            .map_err(|e| Error::from(e).within(archive_name))?;

        let mode = file.unix_mode();
        let kind = if file.is_dir() {
            EntryKind::Directory
        } else if mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
            EntryKind::Other
        } else {
            EntryKind::File
        };
        let meta = EntryMeta {
            name: file.name().to_owned(),
            size: file.size(),
            mode: mode.unwrap_or(0o644),
            modified: file.last_modified().and_then(zip_time),
            kind,
        };

        unpack(fs, directory, &meta, &mut file).map_err(|e| e.within(archive_name))?;
    }

    Ok(())
}

fn extract_tar<R: Read>(
    fs: &Filesystem,
    token: &CancellationToken,
    directory: &Path,
    archive_name: Option<&str>,
    reader: R,
) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| Error::from(e).within(archive_name))?;

    for entry in entries {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let mut entry = entry.map_err(|e| Error::from(e).within(archive_name))?;
        let meta = tar_meta(&entry).map_err(|e| Error::from(e).within(archive_name))?;
        unpack(fs, directory, &meta, &mut entry).map_err(|e| e.within(archive_name))?;
    }

    Ok(())
}

fn tar_meta<R: Read>(entry: &tar::Entry<'_, R>) -> io::Result<EntryMeta> {
    let header = entry.header();
    let entry_type = header.entry_type();
    let kind = if entry_type.is_dir() {
        EntryKind::Directory
    } else if entry_type.is_file() || entry_type == tar::EntryType::Continuous {
        EntryKind::File
    } else {
        EntryKind::Other
    };

    Ok(EntryMeta {
        name: entry.path()?.to_string_lossy().into_owned(),
        size: entry.size(),
        mode: header.mode().unwrap_or(0o644),
        modified: header
            .mtime()
            .ok()
            .filter(|secs| *secs > 0)
            .map(|secs| UNIX_EPOCH + Duration::from_secs(secs)),
        kind,
    })
}

fn unpack(fs: &Filesystem, directory: &Path, meta: &EntryMeta, reader: &mut dyn Read) -> Result<()> {
    match meta.kind {
        // Created implicitly when files are written into them.
        EntryKind::Directory => return Ok(()),
        EntryKind::Other => {
            debug!(entry = %meta.name, "skipping non-regular archive entry");
            return Ok(());
        }
        EntryKind::File => {}
    }

    let target = destination(directory, &meta.name);
    match fs.is_ignored(&target) {
        Ok(()) => {}
        Err(hangar_fs::Error::Ignored(_)) => {
            debug!(entry = %meta.name, "skipping ignored archive entry");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    fs.write(&target, reader, meta.size, meta.mode)?;
    if let Some(modified) = meta.modified {
        fs.set_mod_time(&target, modified)?;
    }
    Ok(())
}

/// Join an untrusted entry name onto the target directory. Leading
/// separators are dropped; everything else is left to the filesystem.
pub(crate) fn destination(directory: &Path, name: &str) -> PathBuf {
    directory.join(name.trim_start_matches(['/', '\\']))
}

fn decompress_single<R: Read>(
    fs: &Filesystem,
    token: &CancellationToken,
    options: &ExtractOptions,
    directory: &Path,
    file_name: Option<&str>,
    codec: Compression,
    reader: R,
) -> Result<()> {
    let target = directory.join(single_stream_name(file_name, codec));
    match fs.is_ignored(&target) {
        Ok(()) => {}
        Err(hangar_fs::Error::Ignored(_)) => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    let mut decoder = codec.decoder(reader)?;
    let mut file = fs.open_for_write(&target)?;
    let mut buf = vec![0u8; options.chunk_size];
    let mut written = 0u64;

    loop {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let n = match decoder.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };

        fs.has_space_for(n as i64)?;
        file.write_all(&buf[..n])?;
        fs.commit(n as i64);
        written += n as u64;
    }

    file.flush()?;
    debug!(target = %target.display(), written, "decompressed single stream");
    Ok(())
}

/// Strip the codec suffix; a name without it gets `.out` so the source is
/// never truncated while it is being read.
fn single_stream_name(file_name: Option<&str>, codec: Compression) -> String {
    let Some(name) = file_name else {
        return UNNAMED_STREAM_OUTPUT.to_owned();
    };
    let suffix = codec.extension();
    if name.len() > suffix.len() && name.to_ascii_lowercase().ends_with(suffix) {
        name[..name.len() - suffix.len()].to_owned()
    } else {
        format!("{name}.out")
    }
}

/// Copy a one-shot stream into an anonymous temporary file so the indexed
/// reader can seek.
fn spool<R: Read>(mut reader: R) -> Result<File> {
    let mut file = tempfile::tempfile()?;
    io::copy(&mut reader, &mut file)?;
    file.rewind()?;
    Ok(file)
}

/// Zip timestamps are MS-DOS local time.
fn zip_time(time: zip::DateTime) -> Option<SystemTime> {
    let date = NaiveDate::from_ymd_opt(time.year().into(), time.month().into(), time.day().into())?;
    let naive = date.and_hms_opt(time.hour().into(), time.minute().into(), time.second().into())?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(SystemTime::from)
}
