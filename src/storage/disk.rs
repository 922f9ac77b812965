//! Filesystem usage sampling and the disk alert ladder.

use anyhow::{bail, Result};
use serde::Serialize;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
  pub total_bytes: u64,
  pub used_bytes: u64,
  pub available_bytes: u64,
}

impl DiskUsage {
  pub fn percent_used(&self) -> f64 {
    if self.total_bytes == 0 {
      return 0.0;
    }
    100.0 * self.used_bytes as f64 / self.total_bytes as f64
  }

  pub fn available_gb(&self) -> f64 {
    self.available_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
  }
}

/// Escalation ladder for disk pressure. Ordering matters: alerts fire when
/// the level rises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskAlertLevel {
  Normal,
  Warning,
  Critical,
  Emergency,
}

impl DiskAlertLevel {
  pub fn from_percent(percent_used: f64) -> Self {
    if percent_used >= 95.0 {
      DiskAlertLevel::Emergency
    } else if percent_used >= 90.0 {
      DiskAlertLevel::Critical
    } else if percent_used >= 80.0 {
      DiskAlertLevel::Warning
    } else {
      DiskAlertLevel::Normal
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      DiskAlertLevel::Normal => "normal",
      DiskAlertLevel::Warning => "warning",
      DiskAlertLevel::Critical => "critical",
      DiskAlertLevel::Emergency => "emergency",
    }
  }
}

/// Source of filesystem statistics. The retention manager depends on this
/// seam rather than the syscall so prune behavior is testable.
pub trait DiskStats: Send + Sync {
  fn sample(&self, path: &Path) -> Result<DiskUsage>;
}

/// Reads real usage via `statvfs(2)`.
pub struct StatvfsDisk;

impl DiskStats for StatvfsDisk {
  fn sample(&self, path: &Path) -> Result<DiskUsage> {
    let c_path = CString::new(path.as_os_str().as_bytes())?;

    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if ret != 0 {
      bail!(
        "statvfs {} failed: {}",
        path.display(),
        std::io::Error::last_os_error()
      );
    }

    let frsize = stat.f_frsize as u64;
    let total_bytes = stat.f_blocks as u64 * frsize;
    let available_bytes = stat.f_bavail as u64 * frsize;

    Ok(DiskUsage {
      total_bytes,
      used_bytes: total_bytes.saturating_sub(available_bytes),
      available_bytes,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn alert_levels_follow_thresholds() {
    assert_eq!(DiskAlertLevel::from_percent(0.0), DiskAlertLevel::Normal);
    assert_eq!(DiskAlertLevel::from_percent(79.9), DiskAlertLevel::Normal);
    assert_eq!(DiskAlertLevel::from_percent(80.0), DiskAlertLevel::Warning);
    assert_eq!(DiskAlertLevel::from_percent(90.0), DiskAlertLevel::Critical);
    assert_eq!(DiskAlertLevel::from_percent(95.0), DiskAlertLevel::Emergency);
    assert_eq!(DiskAlertLevel::from_percent(100.0), DiskAlertLevel::Emergency);
  }

  #[test]
  fn alert_levels_are_ordered() {
    assert!(DiskAlertLevel::Normal < DiskAlertLevel::Warning);
    assert!(DiskAlertLevel::Warning < DiskAlertLevel::Critical);
    assert!(DiskAlertLevel::Critical < DiskAlertLevel::Emergency);
  }

  #[test]
  fn statvfs_samples_a_real_path() {
    let usage = StatvfsDisk.sample(Path::new("/")).unwrap();
    assert!(usage.total_bytes > 0);
    assert!(usage.used_bytes <= usage.total_bytes);
  }

  #[test]
  fn percent_used_handles_empty_filesystem() {
    let usage = DiskUsage {
      total_bytes: 0,
      used_bytes: 0,
      available_bytes: 0,
    };
    assert_eq!(usage.percent_used(), 0.0);
  }
}
