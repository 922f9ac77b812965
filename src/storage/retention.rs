//! Age-based cleanup and disk-pressure response.
//!
//! Every pass samples the filesystem, walks the alert ladder, deletes date
//! partitions past the retention horizon and, under pressure, escalates up
//! to an oldest-first emergency prune that stops at a 10% free-space floor.

use anyhow::Result;
use chrono::{Days, Local, NaiveDate};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::alerts::Alerter;
use crate::config::StorageConfig;
use crate::storage::disk::{DiskAlertLevel, DiskStats, DiskUsage};
use crate::storage::layout;

/// Time between retention passes.
pub const PASS_INTERVAL: Duration = Duration::from_secs(600);
/// Held non-normal levels are re-announced after this long.
const ALERT_RESEND_INTERVAL: Duration = Duration::from_secs(3600);
/// Emergency prune stops once this fraction of the disk is free again.
const EMERGENCY_FREE_FRACTION: f64 = 0.10;
/// Partitions younger than this many days are never emergency-pruned.
const EMERGENCY_PROTECT_DAYS: u64 = 2;

/// A date partition found on disk.
#[derive(Debug, Clone)]
pub struct Partition {
  pub path: PathBuf,
  pub date: NaiveDate,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CleanupReport {
  pub deleted_dirs: usize,
  pub freed_bytes: u64,
}

struct AlertState {
  last_level: DiskAlertLevel,
  last_sent: Option<SystemTime>,
}

pub struct RetentionManager {
  storage: StorageConfig,
  disk: Arc<dyn DiskStats>,
  alerter: Arc<dyn Alerter>,
  alert_state: Mutex<AlertState>,
}

impl RetentionManager {
  pub fn new(
    storage: StorageConfig,
    disk: Arc<dyn DiskStats>,
    alerter: Arc<dyn Alerter>,
  ) -> Self {
    Self {
      storage,
      disk,
      alerter,
      alert_state: Mutex::new(AlertState {
        last_level: DiskAlertLevel::Normal,
        last_sent: None,
      }),
    }
  }

  /// Run passes until cancelled, starting with an immediate one.
  pub async fn run(&self, token: CancellationToken) {
    info!(
      retention_days = self.storage.retention_days,
      interval_secs = PASS_INTERVAL.as_secs(),
      "storage manager started"
    );

    loop {
      self.pass();

      tokio::select! {
        _ = token.cancelled() => {
          info!("storage manager shutting down");
          return;
        }
        _ = tokio::time::sleep(PASS_INTERVAL) => {}
      }
    }
  }

  /// One full retention pass: sample, alert, clean, escalate.
  pub fn pass(&self) {
    let usage = match self.disk.sample(&self.storage.base_path) {
      Ok(usage) => usage,
      Err(e) => {
        error!(error = %e, "failed to sample disk usage");
        return;
      }
    };

    let percent = usage.percent_used();
    info!(
      percent_used = percent,
      available_gb = usage.available_gb(),
      "disk usage"
    );

    let level = DiskAlertLevel::from_percent(percent);
    self.maybe_alert(level, &usage, SystemTime::now());

    let today = Local::now().date_naive();

    if self.storage.retention_days > 0 {
      self.cleanup(today);
    }

    match level {
      DiskAlertLevel::Emergency => {
        warn!("disk usage at 95%+, triggering emergency prune");
        if let Err(e) = self.emergency_prune(today) {
          error!(error = %e, "emergency prune failed");
        }
      }
      DiskAlertLevel::Critical if self.storage.retention_days > 0 => {
        warn!("disk usage at 90%+, running cleanup outside schedule");
        self.cleanup(today);
      }
      _ => {}
    }
  }

  /// Fire a disk alert when the level rises, or hourly while it stays
  /// above normal.
  fn maybe_alert(&self, level: DiskAlertLevel, usage: &DiskUsage, now: SystemTime) {
    let mut state = self.alert_state.lock().unwrap();

    let resend_due = level > DiskAlertLevel::Normal
      && state
        .last_sent
        .map(|sent| {
          now
            .duration_since(sent)
            .unwrap_or(Duration::ZERO)
            > ALERT_RESEND_INTERVAL
        })
        .unwrap_or(true);

    if level > state.last_level || resend_due {
      if level > DiskAlertLevel::Normal {
        let emoji = match level {
          DiskAlertLevel::Warning => "\u{26a0}\u{fe0f}",
          DiskAlertLevel::Critical => "\u{1f534}",
          _ => "\u{1f6a8}",
        };
        self.alerter.notify(&format!(
          "{} *Disk Usage {}*\nUsage: {:.1}%\nAvailable: {:.2} GB\nPath: {}",
          emoji,
          level.as_str().to_uppercase(),
          usage.percent_used(),
          usage.available_gb(),
          self.storage.base_path.display()
        ));
      }
      state.last_level = level;
      state.last_sent = Some(now);
    }
  }

  /// Delete every partition dated strictly before `today - retention_days`.
  /// Individual removal failures are logged and skipped.
  pub fn cleanup(&self, today: NaiveDate) -> CleanupReport {
    let Some(cutoff) = today.checked_sub_days(Days::new(self.storage.retention_days as u64))
    else {
      return CleanupReport::default();
    };

    let mut report = CleanupReport::default();

    for partition in collect_partitions(&self.storage.base_path) {
      if partition.date >= cutoff {
        continue;
      }

      let size = dir_size(&partition.path);
      match std::fs::remove_dir_all(&partition.path) {
        Ok(()) => {
          report.deleted_dirs += 1;
          report.freed_bytes += size;
          info!(path = %partition.path.display(), "deleted expired partition");
        }
        Err(e) => {
          warn!(path = %partition.path.display(), error = %e, "failed to delete partition");
        }
      }
    }

    if report.deleted_dirs > 0 {
      info!(
        deleted_dirs = report.deleted_dirs,
        freed_bytes = report.freed_bytes,
        "cleanup complete"
      );
    } else {
      info!("cleanup complete: nothing to delete");
    }

    report
  }

  /// Delete partitions oldest-first until at least 10% of the disk is free
  /// again. Partitions from the last two days are preserved regardless.
  pub fn emergency_prune(&self, today: NaiveDate) -> Result<CleanupReport> {
    let usage = self.disk.sample(&self.storage.base_path)?;
    let target_free = usage.total_bytes as f64 * EMERGENCY_FREE_FRACTION;

    let mut partitions = collect_partitions(&self.storage.base_path);
    partitions.sort_by_key(|p| p.date);

    let protect_after = today
      .checked_sub_days(Days::new(EMERGENCY_PROTECT_DAYS))
      .unwrap_or(today);

    let mut report = CleanupReport::default();

    for partition in partitions {
      let available = self.disk.sample(&self.storage.base_path)?.available_bytes;
      if available as f64 >= target_free {
        break;
      }

      if partition.date > protect_after {
        info!(path = %partition.path.display(), "skipping recent partition");
        continue;
      }

      let size = dir_size(&partition.path);
      info!(
        path = %partition.path.display(),
        size_bytes = size,
        "emergency deleting partition"
      );
      match std::fs::remove_dir_all(&partition.path) {
        Ok(()) => {
          report.deleted_dirs += 1;
          report.freed_bytes += size;
        }
        Err(e) => {
          warn!(path = %partition.path.display(), error = %e, "failed to delete partition");
        }
      }
    }

    if report.deleted_dirs > 0 {
      self.alerter.notify(&format!(
        "\u{1f6a8} *Emergency Cleanup Completed*\nDeleted {} directories\nFreed {:.2} GB of space",
        report.deleted_dirs,
        report.freed_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
      ));
    }

    info!(
      deleted_dirs = report.deleted_dirs,
      freed_bytes = report.freed_bytes,
      "emergency prune complete"
    );

    Ok(report)
  }
}

/// Find all date partitions beneath `base`. Date-named directories are
/// recorded and not descended into; anything else is walked. A partition
/// vanishing mid-walk is not an error.
pub fn collect_partitions(base: &Path) -> Vec<Partition> {
  let mut partitions = Vec::new();
  walk_for_partitions(base, &mut partitions);
  partitions
}

fn walk_for_partitions(dir: &Path, out: &mut Vec<Partition>) {
  let Ok(entries) = std::fs::read_dir(dir) else {
    return;
  };

  for entry in entries.flatten() {
    let Ok(file_type) = entry.file_type() else {
      continue;
    };
    if !file_type.is_dir() {
      continue;
    }

    let name = entry.file_name();
    match layout::parse_partition_date(&name.to_string_lossy()) {
      Some(date) => out.push(Partition {
        path: entry.path(),
        date,
      }),
      None => walk_for_partitions(&entry.path(), out),
    }
  }
}

/// Total size of all files beneath `path`.
pub fn dir_size(path: &Path) -> u64 {
  let mut size = 0;
  let Ok(entries) = std::fs::read_dir(path) else {
    return 0;
  };

  for entry in entries.flatten() {
    let Ok(meta) = entry.metadata() else {
      continue;
    };
    if meta.is_dir() {
      size += dir_size(&entry.path());
    } else {
      size += meta.len();
    }
  }

  size
}
