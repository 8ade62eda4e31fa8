//! Gzip-compressed tar creation from selected paths.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, TimeZone};
use flate2::write::GzEncoder;
use hangar_fs::Filesystem;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{Error, Result};

/// A set of paths, relative to `base_directory`, to be written as `.tar.gz`.
#[derive(Debug)]
pub struct Archive<'a> {
    fs:             &'a Filesystem,
    base_directory: PathBuf,
    files:          Vec<String>,
    skip:           Option<PathBuf>,
}

impl<'a> Archive<'a> {
    pub fn new<S: AsRef<str>>(fs: &'a Filesystem, base_directory: impl AsRef<Path>, files: &[S]) -> Self {
        Self {
            fs,
            base_directory: base_directory.as_ref().to_path_buf(),
            files: files.iter().map(|f| f.as_ref().to_owned()).collect(),
            skip: None,
        }
    }

    /// Leave `path` out of the walk, typically the archive being written.
    pub fn skipping(mut self, path: impl Into<PathBuf>) -> Self {
        self.skip = Some(path.into());
        self
    }

    /// Write the archive to `writer` and hand it back once the gzip trailer
    /// is flushed. Only regular files are included; entry names are relative
    /// to the base directory.
    pub fn stream<W: Write>(&self, token: &CancellationToken, writer: W) -> Result<W> {
        let base = self.fs.safe_path(&self.base_directory)?;
        let mut builder = tar::Builder::new(GzEncoder::new(writer, flate2::Compression::default()));

        for selector in &self.files {
            let root = self
                .fs
                .safe_path(self.base_directory.join(selector.trim_start_matches(['/', '\\'])))?;
            if !root.starts_with(&base) {
                return Err(hangar_fs::Error::PathEscape {
                    path: PathBuf::from(selector),
                }
                .into());
            }

            for entry in WalkDir::new(&root).follow_links(false).sort_by_file_name() {
                if token.is_cancelled() {
                    return Err(Error::Cancelled);
                }

                let entry = entry?;
                if !entry.file_type().is_file() || self.skip.as_deref() == Some(entry.path()) {
                    continue;
                }

                let name = entry.path().strip_prefix(&base).map_err(|_| hangar_fs::Error::PathEscape {
                    path: entry.path().to_path_buf(),
                })?;
                debug!(entry = %name.display(), "adding file to archive");
                builder.append_path_with_name(entry.path(), name)?;
            }
        }

        let encoder = builder.into_inner()?;
        Ok(encoder.finish()?)
    }
}

/// An output archive that is deleted unless [`PendingArchive::keep`] is
/// reached.
pub(crate) struct PendingArchive<'a> {
    fs:   &'a Filesystem,
    path: PathBuf,
    kept: bool,
}

impl<'a> PendingArchive<'a> {
    pub(crate) fn new(fs: &'a Filesystem, path: PathBuf) -> Self { Self { fs, path, kept: false } }

    pub(crate) fn keep(mut self) { self.kept = true; }
}

impl Drop for PendingArchive<'_> {
    fn drop(&mut self) {
        if self.kept {
            return;
        }
        if let Err(e) = self.fs.remove(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to remove incomplete archive");
        }
    }
}

/// `archive-<RFC 3339 timestamp without colons>.tar.gz`
pub(crate) fn archive_name<Tz: TimeZone>(now: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let stamp = now.to_rfc3339_opts(SecondsFormat::Secs, true).replace(':', "");
    format!("archive-{stamp}.tar.gz")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    #[test]
    fn archive_name_has_no_colons() {
        let utc = Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap();
        assert_eq!(archive_name(&utc), "archive-2024-05-01T123045Z.tar.gz");

        let offset = FixedOffset::east_opt(2 * 3600).unwrap();
        let local = offset.with_ymd_and_hms(2024, 5, 1, 14, 30, 45).unwrap();
        assert_eq!(archive_name(&local), "archive-2024-05-01T143045+0200.tar.gz");
    }
}
