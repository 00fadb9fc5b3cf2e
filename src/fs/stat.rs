//! Immutable stat snapshots.

use std::time::{SystemTime, UNIX_EPOCH};

/// Snapshot of a filesystem entry's metadata at one point in time.
///
/// Freshness comparisons use the modification time at millisecond
/// precision, which is the finest granularity the backends agree on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    /// True for files, false for directories.
    pub is_file: bool,
    /// Size in bytes (0 for directories).
    pub size: u64,
    /// Last modification time.
    pub mtime: SystemTime,
    /// Resolved target path when the entry is reached through a link.
    pub real_path: Option<String>,
}

impl FileStat {
    /// Create a snapshot with no real-path information.
    pub fn new(is_file: bool, size: u64, mtime: SystemTime) -> Self {
        Self {
            is_file,
            size,
            mtime,
            real_path: None,
        }
    }

    /// Attach a resolved real path.
    pub fn with_real_path(mut self, real_path: impl Into<String>) -> Self {
        self.real_path = Some(real_path.into());
        self
    }

    /// True for directories.
    pub fn is_directory(&self) -> bool {
        !self.is_file
    }

    fn mtime_millis(&self) -> u128 {
        self.mtime
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0)
    }

    /// Compare modification times at millisecond precision.
    pub fn same_mtime(&self, other: &FileStat) -> bool {
        self.mtime_millis() == other.mtime_millis()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_same_mtime_ignores_sub_millisecond_noise() {
        let base = UNIX_EPOCH + Duration::from_millis(1_000);
        let a = FileStat::new(true, 10, base);
        let b = FileStat::new(true, 20, base + Duration::from_micros(400));
        assert!(a.same_mtime(&b));

        let c = FileStat::new(true, 10, base + Duration::from_millis(1));
        assert!(!a.same_mtime(&c));
    }
}
