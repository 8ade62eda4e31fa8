use std::sync::Arc;
use std::thread;

use hangar_fs::{Error, Filesystem, FilesystemConfig, IgnoreRules, Quota, Result};
use tempfile::tempdir;

#[test]
fn test_quota_shared_across_filesystems() -> Result<()> {
    let dir = tempdir()?;
    let quota = Arc::new(Quota::new(10));
    let first = Filesystem::with_quota(dir.path(), Arc::clone(&quota), IgnoreRules::empty())?;
    let second = Filesystem::with_quota(dir.path(), Arc::clone(&quota), IgnoreRules::empty())?;

    first.write("a.txt", &b"123456"[..], 6, 0o644)?;
    let result = second.write("b.txt", &b"123456"[..], 6, 0o644);

    assert!(matches!(result, Err(Error::DiskSpace)));
    assert_eq!(quota.used(), 6);
    Ok(())
}

#[test]
fn test_independent_filesystems_do_not_share_usage() -> Result<()> {
    let one = tempdir()?;
    let two = tempdir()?;
    let config = FilesystemConfig::new().disk_limit(8);
    let first = Filesystem::new(one.path(), &config)?;
    let second = Filesystem::new(two.path(), &config)?;

    first.write("a.txt", &b"12345678"[..], 8, 0o644)?;
    second.write("a.txt", &b"12345678"[..], 8, 0o644)?;

    assert_eq!(first.used_disk(), 8);
    assert_eq!(second.used_disk(), 8);
    Ok(())
}

#[test]
fn test_concurrent_writes_track_every_byte() -> Result<()> {
    let dir = tempdir()?;
    let fs = Filesystem::new(dir.path(), &FilesystemConfig::new())?;

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let fs = fs.clone();
            thread::spawn(move || fs.write(format!("worker-{i}.bin"), &[7u8; 1024][..], 1024, 0o644))
        })
        .collect();
    for handle in handles {
        handle.join().unwrap()?;
    }

    assert_eq!(fs.used_disk(), 4096);
    Ok(())
}

#[test]
fn test_initial_usage_counts_against_limit() -> Result<()> {
    let dir = tempdir()?;
    let config = FilesystemConfig::new().disk_limit(100).initial_usage(95);
    let fs = Filesystem::new(dir.path(), &config)?;

    assert!(fs.can_fit(5));
    assert!(!fs.can_fit(6));
    Ok(())
}

#[test]
fn test_missing_root_is_reported() {
    let dir = tempdir().unwrap();
    let result = Filesystem::new(dir.path().join("missing"), &FilesystemConfig::new());
    assert!(matches!(result, Err(Error::NotFound(_))));
}

#[test]
fn test_invalid_ignore_pattern_is_rejected() {
    let dir = tempdir().unwrap();
    let result = Filesystem::new(dir.path(), &FilesystemConfig::new().ignore("[z-a]"));
    assert!(matches!(result, Err(Error::Pattern(_))));
}
