//! Pre-flight space estimation.
//!
//! An archive is opened as a read-only view, walked entry by entry and the
//! declared uncompressed sizes are summed. The walk stops at the first step
//! that would no longer fit the quota.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};

use hangar_fs::Quota;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::format::{Compression, Container, Format};

/// Smallest gzip member: 10 byte header, empty deflate block, 8 byte trailer.
const GZIP_MIN_LEN: u64 = 18;

#[cfg(feature = "zstd")]
const ZSTD_FRAME_HEADER_MAX: usize = 18;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ViewEntry {
    path: Vec<String>,
    size: u64,
}

/// Read-only view over an archive on disk.
pub(crate) enum ArchiveView {
    /// Central directory entries in depth-first order.
    Indexed(Vec<ViewEntry>),
    /// Headers are visited lazily as the stream is read.
    Streamed(tar::Archive<Box<dyn Read>>),
    /// The decompressed size of a single stream.
    Single(u64),
}

impl ArchiveView {
    pub(crate) fn open(mut file: File, format: Format) -> Result<Self> {
        match format {
            Format::Unrecognized => Err(Error::UnknownFormat),
            Format::MultiEntry(Container::Zip) => {
                let mut archive = zip::ZipArchive::new(file)?;
                let mut entries = Vec::with_capacity(archive.len());
                for index in 0..archive.len() {
                    let entry = archive.by_index_raw(index)?;
                    entries.push(ViewEntry::new(entry.name(), entry.size()));
                }
                Ok(Self::indexed(entries))
            }
            Format::MultiEntry(Container::Tar(codec)) => {
                let reader: Box<dyn Read> = match codec {
                    Some(codec) => codec.decoder(BufReader::new(file))?,
                    None => Box::new(BufReader::new(file)),
                };
                Ok(Self::Streamed(tar::Archive::new(reader)))
            }
            Format::SingleStream(codec) => Ok(Self::Single(single_stream_size(&mut file, codec)?)),
        }
    }

    /// Sorting by path components yields a pre-order walk of the implied
    /// directory tree without building it.
    fn indexed(mut entries: Vec<ViewEntry>) -> Self {
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Self::Indexed(entries)
    }

    /// Visit every entry size, checking `token` before each step.
    pub(crate) fn walk(self, token: &CancellationToken, mut visit: impl FnMut(u64) -> Result<()>) -> Result<()> {
        match self {
            Self::Indexed(entries) => {
                for entry in entries {
                    check(token)?;
                    visit(entry.size)?;
                }
            }
            Self::Streamed(mut archive) => {
                let mut entries = archive.entries()?;
                loop {
                    check(token)?;
                    let Some(entry) = entries.next() else { break };
                    visit(entry?.size())?;
                }
            }
            Self::Single(size) => {
                check(token)?;
                visit(size)?;
            }
        }
        Ok(())
    }
}

impl ViewEntry {
    fn new(name: &str, size: u64) -> Self {
        Self {
            path: name
                .split(['/', '\\'])
                .filter(|part| !part.is_empty())
                .map(str::to_owned)
                .collect(),
            size,
        }
    }
}

fn check(token: &CancellationToken) -> Result<()> {
    if token.is_cancelled() { Err(Error::Cancelled) } else { Ok(()) }
}

/// Decompressed size of a single stream as far as its container declares it,
/// never less than the stored size. Xz carries no size up front.
fn single_stream_size(file: &mut File, codec: Compression) -> Result<u64> {
    let stored = file.metadata()?.len();
    let declared = match codec {
        Compression::Gzip => gzip_size(file, stored)?,
        Compression::Zstd => zstd_size(file)?,
        Compression::Xz => None,
    };
    file.rewind()?;
    Ok(declared.map_or(stored, |size| size.max(stored)))
}

/// Gzip records the uncompressed length modulo 2^32 in its last four bytes.
fn gzip_size(file: &mut File, stored: u64) -> Result<Option<u64>> {
    if stored < GZIP_MIN_LEN {
        return Ok(None);
    }
    file.seek(SeekFrom::End(-4))?;
    let mut trailer = [0u8; 4];
    file.read_exact(&mut trailer)?;
    Ok(Some(u32::from_le_bytes(trailer).into()))
}

/// Content size from the first zstd frame header, when the encoder wrote it.
#[cfg(feature = "zstd")]
fn zstd_size(file: &mut File) -> Result<Option<u64>> {
    file.rewind()?;
    let mut header = Vec::with_capacity(ZSTD_FRAME_HEADER_MAX);
    Read::take(&mut *file, ZSTD_FRAME_HEADER_MAX as u64).read_to_end(&mut header)?;
    Ok(zstd::zstd_safe::get_frame_content_size(&header).ok().flatten())
}

#[cfg(not(feature = "zstd"))]
fn zstd_size(_file: &mut File) -> Result<Option<u64>> { Ok(None) }

/// Fail with [`Error::DiskSpace`] as soon as the running total of `view`
/// exceeds what `quota` can still take.
pub(crate) fn check_space(view: ArchiveView, token: &CancellationToken, quota: &Quota) -> Result<()> {
    let total = AtomicU64::new(0);
    view.walk(token, |size| {
        let previous = total
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |t| Some(t.saturating_add(size)))
            .unwrap_or_else(|t| t);
        let sum = previous.saturating_add(size);
        if quota.can_fit(i64::try_from(sum).unwrap_or(i64::MAX)) {
            Ok(())
        } else {
            Err(Error::DiskSpace)
        }
    })
}
