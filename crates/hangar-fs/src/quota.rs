use std::sync::atomic::{AtomicI64, Ordering};

use crate::{Error, Result};

/// Disk usage ceiling shared by every operation against one server root.
///
/// Checks are a best-effort ceiling rather than a reservation: two callers
/// that each fit may together push usage slightly past the limit. A limit of
/// zero or less means unlimited.
#[derive(Debug, Default)]
pub struct Quota {
    used:  AtomicI64,
    limit: AtomicI64,
}

impl Quota {
    pub fn new(limit: i64) -> Self {
        Self {
            used:  AtomicI64::new(0),
            limit: AtomicI64::new(limit),
        }
    }

    pub fn unlimited() -> Self { Self::new(0) }

    pub fn limit(&self) -> i64 { self.limit.load(Ordering::Acquire) }

    pub fn set_limit(&self, limit: i64) { self.limit.store(limit, Ordering::Release); }

    pub fn used(&self) -> i64 { self.used.load(Ordering::Acquire) }

    pub fn is_unlimited(&self) -> bool { self.limit() <= 0 }

    /// Replaces the tracked usage, e.g. after a fresh disk scan.
    pub fn reset(&self, used: i64) { self.used.store(used, Ordering::Release); }

    /// Whether `size` additional bytes fit under the limit.
    pub fn can_fit(&self, size: i64) -> bool {
        let limit = self.limit();
        limit <= 0 || self.used().saturating_add(size) <= limit
    }

    pub fn has_space_for(&self, size: i64) -> Result<()> {
        if self.can_fit(size) {
            Ok(())
        } else {
            Err(Error::DiskSpace)
        }
    }

    /// Adds `delta` to the tracked usage (negative releases it) and returns the
    /// new total.
    pub fn commit(&self, delta: i64) -> i64 {
        self.used.fetch_add(delta, Ordering::AcqRel) + delta
    }
}
