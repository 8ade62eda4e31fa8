//! Archive compression and extraction on a quota-tracked server filesystem.
//!
//! # Architecture
//!
//! - `format.rs` - Format descriptor and codec decoders
//! - `sniff.rs` - Content-first format detection
//! - `extract.rs` - Streaming extraction through the filesystem
//! - `estimate.rs` - Pre-flight uncompressed size checks
//! - `compress.rs` - `.tar.gz` creation
//! - `options.rs` - Tunables for extraction

pub use compress::Archive;
pub use error::{Error, Result};
pub use extract::{extract_stream, ExtractRequest};
pub use format::{Compression, Container, Format};
pub use options::ExtractOptions;
pub use sniff::{detect, identify_seekable, identify_stream, Sniffed};
pub use tokio_util::sync::CancellationToken;

mod compress;
mod error;
mod estimate;
pub mod extract;
mod format;
pub mod options;
pub mod sniff;

use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::Local;
use hangar_fs::{CountedWriter, Filesystem};
use tracing::{debug, info, warn};

use crate::compress::{archive_name, PendingArchive};
use crate::estimate::ArchiveView;

/// Name hint used when sniffing a stream that has no file name.
const UNNAMED_STREAM_HINT: &str = "archive.tar.gz";

/// A finished archive created by [`Archiver::compress_files`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArchiveFile {
    pub name:     String,
    pub path:     PathBuf,
    pub size:     u64,
    pub modified: Option<SystemTime>,
}

/// Archive operations bound to one filesystem.
#[derive(Clone, Copy, Debug)]
pub struct Archiver<'a> {
    fs:      &'a Filesystem,
    options: ExtractOptions,
}

impl<'a> Archiver<'a> {
    pub fn new(fs: &'a Filesystem) -> Self {
        Self {
            fs,
            options: ExtractOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ExtractOptions) -> Self {
        self.options = options;
        self
    }

    /// Compress `paths` (relative to `dir`) into a new timestamped `.tar.gz`
    /// inside `dir`.
    pub fn compress_files<S: AsRef<str>>(&self, dir: impl AsRef<Path>, paths: &[S]) -> Result<ArchiveFile> {
        self.compress_files_with(&CancellationToken::new(), dir, paths)
    }

    /// [`Archiver::compress_files`] with cancellation.
    ///
    /// The output is written first and charged afterwards. If it does not fit
    /// the quota, or anything fails on the way, the file is removed.
    pub fn compress_files_with<S: AsRef<str>>(
        &self,
        token: &CancellationToken,
        dir: impl AsRef<Path>,
        paths: &[S],
    ) -> Result<ArchiveFile> {
        let dir = dir.as_ref();
        if !self.fs.stat(dir)?.is_dir() {
            return Err(io::Error::new(io::ErrorKind::NotADirectory, dir.display().to_string()).into());
        }
        let name = archive_name(&Local::now());
        let relative = dir.join(&name);
        let path = self.fs.safe_path(&relative)?;

        debug!(archive = %relative.display(), files = paths.len(), "compressing files");
        let file = self.fs.open_for_write(&relative)?;
        let pending = PendingArchive::new(self.fs, relative.clone());

        let archive = Archive::new(self.fs, dir, paths).skipping(path.clone());
        let writer = archive.stream(token, CountedWriter::new(file))?;
        let size = writer.bytes_written();
        let file = writer.into_inner();
        file.sync_all()?;

        let charged = i64::try_from(size).unwrap_or(i64::MAX);
        if !self.fs.can_fit(charged) {
            warn!(archive = %relative.display(), size, "compressed archive exceeds disk quota");
            return Err(Error::DiskSpace);
        }
        self.fs.commit(charged);

        let modified = file.metadata().and_then(|m| m.modified()).ok();
        pending.keep();

        info!(archive = %relative.display(), size, files = paths.len(), "created archive");
        Ok(ArchiveFile {
            name,
            path,
            size,
            modified,
        })
    }

    /// Check that the uncompressed contents of `dir/file` fit the remaining
    /// quota. Always succeeds on an unlimited filesystem.
    pub fn space_available_for_decompression(
        &self,
        token: &CancellationToken,
        dir: impl AsRef<Path>,
        file: &str,
    ) -> Result<()> {
        if self.fs.quota().is_unlimited() {
            return Ok(());
        }

        let path = dir.as_ref().join(file);
        let mut source = self.fs.open(&path)?;
        let format = identify_seekable(base_name(file), &mut source, self.options.sniff_window)?;
        let view = ArchiveView::open(source, format)?;
        estimate::check_space(view, token, self.fs.quota()).inspect_err(|e| {
            if e.is_disk_space() {
                debug!(archive = %path.display(), "archive would exceed disk quota");
            }
        })
    }

    /// Extract `dir/file` into `dir`.
    pub fn decompress_file(&self, token: &CancellationToken, dir: impl AsRef<Path>, file: &str) -> Result<()> {
        let dir = dir.as_ref();
        let mut source = self.fs.open(dir.join(file))?;
        let format = identify_seekable(base_name(file), &mut source, self.options.sniff_window)?;

        match format {
            Format::Unrecognized => return Err(Error::UnknownFormat),
            Format::MultiEntry(Container::Zip) => {
                extract::extract_zip(self.fs, token, dir, Some(file), source)?;
            }
            _ => extract_stream(
                self.fs,
                token,
                &self.options,
                ExtractRequest {
                    directory: dir,
                    file_name: Some(file),
                    format,
                    reader: BufReader::new(source),
                },
            )?,
        }

        info!(archive = file, directory = %dir.display(), ?format, "extracted archive");
        Ok(())
    }

    /// Extract an arbitrary stream into `dir` without a pre-flight size
    /// check. Containment, ignore rules and per-write quota still apply.
    pub fn extract_stream_unsafe(&self, token: &CancellationToken, dir: impl AsRef<Path>, reader: impl Read) -> Result<()> {
        let dir = dir.as_ref();
        let sniffed = identify_stream(UNNAMED_STREAM_HINT, reader, self.options.sniff_window)?;
        if !sniffed.format.is_recognized() {
            return Err(Error::UnknownFormat);
        }

        let format = sniffed.format;
        extract_stream(
            self.fs,
            token,
            &self.options,
            ExtractRequest {
                directory: dir,
                file_name: None,
                format,
                reader: sniffed.reader,
            },
        )?;

        info!(directory = %dir.display(), ?format, "extracted archive stream");
        Ok(())
    }
}

/// Archive operations directly on a [`Filesystem`], with default options.
pub trait ArchiveExt {
    fn archiver(&self) -> Archiver<'_>;

    fn compress_files<S: AsRef<str>>(&self, dir: impl AsRef<Path>, paths: &[S]) -> Result<ArchiveFile> {
        self.archiver().compress_files(dir, paths)
    }

    fn space_available_for_decompression(
        &self,
        token: &CancellationToken,
        dir: impl AsRef<Path>,
        file: &str,
    ) -> Result<()> {
        self.archiver().space_available_for_decompression(token, dir, file)
    }

    fn decompress_file(&self, token: &CancellationToken, dir: impl AsRef<Path>, file: &str) -> Result<()> {
        self.archiver().decompress_file(token, dir, file)
    }

    fn extract_stream_unsafe(&self, token: &CancellationToken, dir: impl AsRef<Path>, reader: impl Read) -> Result<()> {
        self.archiver().extract_stream_unsafe(token, dir, reader)
    }
}

impl ArchiveExt for Filesystem {
    fn archiver(&self) -> Archiver<'_> { Archiver::new(self) }
}

fn base_name(file: &str) -> &str {
    Path::new(file)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(file)
}
