//! Root-confined, quota-tracked filesystem for one managed server instance.
//!
//! # Architecture
//!
//! - `path.rs` - Root confinement (traversal and symlink escapes)
//! - `quota.rs` - Shared disk usage counter
//! - `rules.rs` - Gitignore-style exclusion rules
//! - `counted.rs` - Byte-counting writer
//! - `config.rs` - Deserializable per-server settings

mod config;
mod counted;
mod error;
pub mod path;
mod quota;
mod rules;

pub use config::FilesystemConfig;
pub use counted::CountedWriter;
pub use error::{Error, Result};
pub use quota::Quota;
pub use rules::IgnoreRules;

use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use filetime::FileTime;
use tracing::debug;

use crate::error::{read_error, write_error};

const DEFAULT_FILE_MODE: u32 = 0o644;

/// Handle to one server's data directory.
///
/// Clones share the same quota counter and ignore rules, so every archive
/// job, upload and editor write against the same server sees one usage total.
#[derive(Clone, Debug)]
pub struct Filesystem {
    root:  PathBuf,
    quota: Arc<Quota>,
    rules: Arc<IgnoreRules>,
}

impl Filesystem {
    pub fn new(root: impl AsRef<Path>, config: &FilesystemConfig) -> Result<Self> {
        let root = canonical_root(root.as_ref())?;
        let rules = IgnoreRules::new(&root, config.ignore.as_slice())?;
        let quota = Quota::new(config.disk_limit);
        quota.reset(config.initial_usage);
        Ok(Self {
            root,
            quota: Arc::new(quota),
            rules: Arc::new(rules),
        })
    }

    /// Build a filesystem around an existing quota counter.
    pub fn with_quota(
        root: impl AsRef<Path>,
        quota: Arc<Quota>,
        rules: IgnoreRules,
    ) -> Result<Self> {
        Ok(Self {
            root: canonical_root(root.as_ref())?,
            quota,
            rules: Arc::new(rules),
        })
    }

    pub fn root(&self) -> &Path { &self.root }

    pub fn quota(&self) -> &Arc<Quota> { &self.quota }

    /// Absolute location of `path` inside the root.
    pub fn safe_path(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        path::resolve(&self.root, path)
    }

    pub fn max_disk(&self) -> i64 { self.quota.limit() }

    pub fn used_disk(&self) -> i64 { self.quota.used() }

    pub fn can_fit(&self, size: i64) -> bool { self.quota.can_fit(size) }

    pub fn has_space_for(&self, size: i64) -> Result<()> { self.quota.has_space_for(size) }

    pub fn commit(&self, delta: i64) -> i64 { self.quota.commit(delta) }

    /// `Err(Error::Ignored)` when an ignore rule excludes `path`.
    pub fn is_ignored(&self, path: impl AsRef<Path>) -> Result<()> {
        if self.rules.is_empty() {
            return Ok(());
        }
        let resolved = self.safe_path(&path)?;
        let Some(relative) = path::relative(&self.root, &resolved) else {
            return Ok(());
        };
        if self.rules.matches(&relative, resolved.is_dir()) {
            return Err(Error::Ignored(path.as_ref().to_path_buf()));
        }
        Ok(())
    }

    pub fn open(&self, path: impl AsRef<Path>) -> Result<File> {
        let resolved = self.safe_path(path)?;
        File::open(&resolved).map_err(read_error(resolved))
    }

    /// Open for writing, creating parent directories and truncating any
    /// existing file. The truncated bytes are released from the quota.
    pub fn open_for_write(&self, path: impl AsRef<Path>) -> Result<File> {
        let resolved = self.safe_path(path)?;
        let existing = existing_len(&resolved)?;
        let file = self.create_file(&resolved, DEFAULT_FILE_MODE)?;
        if existing > 0 {
            self.quota.commit(-(existing as i64));
        }
        Ok(file)
    }

    pub fn stat(&self, path: impl AsRef<Path>) -> Result<Metadata> {
        let resolved = self.safe_path(path)?;
        fs::metadata(&resolved).map_err(read_error(resolved))
    }

    pub fn create_dir_all(&self, path: impl AsRef<Path>) -> Result<()> {
        let resolved = self.safe_path(path)?;
        fs::create_dir_all(&resolved).map_err(write_error(resolved))
    }

    /// Remove a file or directory tree. Quota usage is left untouched; callers
    /// that committed the bytes release them themselves.
    pub fn remove(&self, path: impl AsRef<Path>) -> Result<()> {
        let resolved = self.safe_path(path)?;
        let metadata = fs::symlink_metadata(&resolved).map_err(read_error(&resolved))?;
        if metadata.is_dir() {
            fs::remove_dir_all(&resolved).map_err(write_error(resolved))
        } else {
            fs::remove_file(&resolved).map_err(write_error(resolved))
        }
    }

    pub fn set_mod_time(&self, path: impl AsRef<Path>, time: SystemTime) -> Result<()> {
        let resolved = self.safe_path(path)?;
        let time = FileTime::from_system_time(time);
        filetime::set_file_times(&resolved, time, time).map_err(write_error(resolved))
    }

    /// Write `size` bytes from `reader` to `path` with the given mode.
    ///
    /// The quota is checked against the declared size up front and charged
    /// with the bytes actually flushed, including on a failed copy.
    pub fn write(
        &self,
        path: impl AsRef<Path>,
        reader: impl Read,
        size: u64,
        mode: u32,
    ) -> Result<()> {
        let resolved = self.safe_path(path)?;
        let existing = existing_len(&resolved)? as i64;

        let declared = i64::try_from(size).unwrap_or(i64::MAX);
        if let Err(e) = self.quota.has_space_for(declared.saturating_sub(existing)) {
            debug!(path = %resolved.display(), size, "write rejected by disk quota");
            return Err(e);
        }

        let file = self.create_file(&resolved, mode)?;
        let mut writer = CountedWriter::new(file);
        let copied = io::copy(&mut reader.take(size), &mut writer).and_then(|_| writer.flush());
        self.quota.commit(writer.bytes_written() as i64 - existing);
        copied.map_err(write_error(&resolved))?;

        set_mode(&resolved, mode)
    }

    fn create_file(&self, resolved: &Path, mode: u32) -> Result<File> {
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).map_err(write_error(parent))?;
        }

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(file_mode(mode));
        }
        #[cfg(not(unix))]
        let _ = mode;

        options.open(resolved).map_err(write_error(resolved))
    }
}

fn canonical_root(root: &Path) -> Result<PathBuf> {
    root.canonicalize().map_err(read_error(root))
}

fn existing_len(resolved: &Path) -> Result<u64> {
    match fs::metadata(resolved) {
        Ok(metadata) if metadata.is_dir() => Err(Error::Write {
            path:   resolved.to_path_buf(),
            source: io::Error::other("destination is a directory"),
        }),
        Ok(metadata) => Ok(metadata.len()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(Error::Read {
            path:   resolved.to_path_buf(),
            source: e,
        }),
    }
}

fn file_mode(mode: u32) -> u32 {
    match mode & 0o777 {
        0 => DEFAULT_FILE_MODE,
        bits => bits,
    }
}

#[cfg(unix)]
fn set_mode(resolved: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(resolved, fs::Permissions::from_mode(file_mode(mode)))
        .map_err(write_error(resolved))
}

#[cfg(not(unix))]
fn set_mode(_resolved: &Path, _mode: u32) -> Result<()> { Ok(()) }

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::tempdir;

    fn limited(limit: i64) -> (tempfile::TempDir, Filesystem) {
        let dir = tempdir().unwrap();
        let fs = Filesystem::new(dir.path(), &FilesystemConfig::new().disk_limit(limit)).unwrap();
        (dir, fs)
    }

    #[test]
    fn write_commits_bytes_to_quota() -> Result<()> {
        let (dir, fs) = limited(0);
        fs.write("a/b.txt", &b"hello"[..], 5, 0o644)?;
        assert_eq!(std::fs::read(dir.path().join("a/b.txt"))?, b"hello");
        assert_eq!(fs.used_disk(), 5);
        Ok(())
    }

    #[test]
    fn huge_declared_size_is_rejected() {
        let (dir, fs) = limited(1024);
        let result = fs.write("huge.bin", &b"tiny"[..], u64::MAX, 0o644);
        assert!(matches!(result, Err(Error::DiskSpace)));
        assert!(!dir.path().join("huge.bin").exists());
        assert_eq!(fs.used_disk(), 0);
    }

    #[test]
    fn overwrite_charges_only_the_difference() -> Result<()> {
        let (_dir, fs) = limited(0);
        fs.write("file.txt", &b"0123456789"[..], 10, 0o644)?;
        fs.write("file.txt", &b"0123"[..], 4, 0o644)?;
        assert_eq!(fs.used_disk(), 4);
        Ok(())
    }

    #[test]
    fn write_over_quota_is_rejected() {
        let (dir, fs) = limited(4);
        let result = fs.write("big.txt", &b"too large"[..], 9, 0o644);
        assert!(matches!(result, Err(Error::DiskSpace)));
        assert!(!dir.path().join("big.txt").exists());
        assert_eq!(fs.used_disk(), 0);
    }

    #[test]
    fn write_stops_at_declared_size() -> Result<()> {
        let (dir, fs) = limited(0);
        fs.write("short.txt", &b"abcdef"[..], 3, 0o644)?;
        assert_eq!(std::fs::read(dir.path().join("short.txt"))?, b"abc");
        assert_eq!(fs.used_disk(), 3);
        Ok(())
    }

    #[test]
    fn failed_copy_commits_flushed_bytes() {
        struct Broken(usize);

        impl Read for Broken {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.0 == 0 {
                    return Err(io::Error::other("connection reset"));
                }
                let n = self.0.min(buf.len());
                buf[..n].fill(b'x');
                self.0 -= n;
                Ok(n)
            }
        }

        let (_dir, fs) = limited(0);
        let result = fs.write("partial.bin", Broken(7), 100, 0o644);
        assert!(matches!(result, Err(Error::Write { .. })));
        assert_eq!(fs.used_disk(), 7);
    }

    #[test]
    fn write_outside_root_is_rejected() {
        let (dir, fs) = limited(0);
        let result = fs.write("../outside.txt", &b"x"[..], 1, 0o644);
        assert!(matches!(result, Err(Error::PathEscape { .. })));
        assert!(!dir.path().parent().unwrap().join("outside.txt").exists());
    }

    #[cfg(unix)]
    #[test]
    fn write_applies_mode() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let (dir, fs) = limited(0);
        fs.write("run.sh", &b"#!/bin/sh\n"[..], 10, 0o100755)?;
        let mode = std::fs::metadata(dir.path().join("run.sh"))?.permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        Ok(())
    }

    #[test]
    fn open_for_write_releases_truncated_bytes() -> Result<()> {
        let (_dir, fs) = limited(0);
        fs.write("log.txt", &b"0123456789"[..], 10, 0o644)?;
        let _file = fs.open_for_write("log.txt")?;
        assert_eq!(fs.used_disk(), 0);
        Ok(())
    }

    #[test]
    fn set_mod_time_updates_mtime() -> Result<()> {
        let (dir, fs) = limited(0);
        fs.write("old.txt", &b"x"[..], 1, 0o644)?;
        let when = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        fs.set_mod_time("old.txt", when)?;
        let modified = std::fs::metadata(dir.path().join("old.txt"))?.modified()?;
        assert_eq!(modified, when);
        Ok(())
    }

    #[test]
    fn ignore_rules_are_reported() -> Result<()> {
        let dir = tempdir()?;
        let fs = Filesystem::new(dir.path(), &FilesystemConfig::new().ignore("*.log"))?;
        assert!(matches!(fs.is_ignored("logs/latest.log"), Err(Error::Ignored(_))));
        assert!(fs.is_ignored("server.properties").is_ok());
        Ok(())
    }

    #[test]
    fn clones_share_the_quota() -> Result<()> {
        let (_dir, fs) = limited(0);
        let other = fs.clone();
        other.commit(42);
        assert_eq!(fs.used_disk(), 42);
        Ok(())
    }

    #[test]
    fn remove_deletes_files_and_directories() -> Result<()> {
        let (dir, fs) = limited(0);
        fs.write("tree/a.txt", &b"a"[..], 1, 0o644)?;
        fs.write("single.txt", &b"b"[..], 1, 0o644)?;
        fs.remove("tree")?;
        fs.remove("single.txt")?;
        assert!(!dir.path().join("tree").exists());
        assert!(!dir.path().join("single.txt").exists());
        Ok(())
    }
}
