//! Per-camera recording supervision.
//!
//! Each enabled camera gets two independent retry loops (archive and live)
//! plus a midnight helper that pre-creates the next day's partition so the
//! strftime template never points at a missing directory. Stop cancels the
//! camera's token and waits for both drivers to let go of their children.

use chrono::{DateTime, Datelike, Days, Local, NaiveDate, TimeZone};
use std::path::Path;
use std::time::{Duration, SystemTime};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{CameraConfig, StorageConfig};
use crate::recording::pipeline::{archive_spec, live_spec, TranscoderDriver};
use crate::storage::layout;

/// Quiescence between stop and start on a restart.
const RESTART_PAUSE: Duration = Duration::from_secs(2);
/// How far ahead of local midnight the next-day partition is created.
const MIDNIGHT_LEAD: chrono::Duration = chrono::Duration::minutes(1);
/// Pause after creating the partition, so the helper does not fire twice
/// for the same midnight.
const MIDNIGHT_COOLDOWN: Duration = Duration::from_secs(120);

struct Running {
  token: CancellationToken,
  tasks: Vec<JoinHandle<()>>,
}

pub struct CameraSupervisor {
  camera: CameraConfig,
  storage: StorageConfig,
  parent: CancellationToken,
  running: Mutex<Option<Running>>,
}

impl CameraSupervisor {
  pub fn new(camera: CameraConfig, storage: StorageConfig, parent: CancellationToken) -> Self {
    Self {
      camera,
      storage,
      parent,
      running: Mutex::new(None),
    }
  }

  pub fn camera_name(&self) -> &str {
    &self.camera.name
  }

  /// Launch the archive loop, the live loop and the midnight helper under
  /// a fresh child token. No-op if already running.
  pub async fn start(&self) {
    let mut running = self.running.lock().await;
    if running.is_some() {
      return;
    }

    let token = self.parent.child_token();
    let tasks = vec![
      tokio::spawn(archive_loop(
        self.camera.clone(),
        self.storage.clone(),
        token.clone(),
      )),
      tokio::spawn(live_loop(
        self.camera.clone(),
        self.storage.clone(),
        token.clone(),
      )),
      tokio::spawn(midnight_loop(
        self.camera.clone(),
        self.storage.clone(),
        token.clone(),
      )),
    ];

    info!(camera = %self.camera.name, "recorder started");
    *running = Some(Running { token, tasks });
  }

  /// Cancel the camera token and wait for both drivers to terminate. The
  /// five-second kill grace lives in the driver itself.
  pub async fn stop(&self) {
    let running = self.running.lock().await.take();
    let Some(running) = running else {
      return;
    };

    info!(camera = %self.camera.name, "stopping recorder");
    running.token.cancel();
    for task in running.tasks {
      let _ = task.await;
    }
    info!(camera = %self.camera.name, "recorder stopped");
  }

  /// Full stop, short quiescence, fresh start on the parent token.
  pub async fn restart(&self) {
    info!(camera = %self.camera.name, "restarting recorder");
    self.stop().await;
    tokio::time::sleep(RESTART_PAUSE).await;
    if !self.parent.is_cancelled() {
      self.start().await;
    }
  }

  /// Modification time of the newest archive segment: today's partition
  /// first, then yesterday's (covers the just-after-midnight window).
  pub fn last_segment_time(&self) -> Option<SystemTime> {
    let today = Local::now().date_naive();
    last_segment_time_at(&self.storage.base_path, &self.camera.name, today)
  }
}

/// Probe implementation, parameterized on "today" for the midnight edge.
pub fn last_segment_time_at(
  base: &Path,
  camera: &str,
  today: NaiveDate,
) -> Option<SystemTime> {
  let today_dir = layout::partition_dir(base, camera, today);
  if let Some(mtime) = newest_segment_mtime(&today_dir) {
    return Some(mtime);
  }

  let yesterday = today.checked_sub_days(Days::new(1))?;
  newest_segment_mtime(&layout::partition_dir(base, camera, yesterday))
}

fn newest_segment_mtime(dir: &Path) -> Option<SystemTime> {
  let entries = std::fs::read_dir(dir).ok()?;

  let mut newest: Option<SystemTime> = None;
  for entry in entries.flatten() {
    let path = entry.path();
    if path.extension().and_then(|e| e.to_str()) != Some(layout::SEGMENT_EXT) {
      continue;
    }
    let Ok(meta) = entry.metadata() else {
      continue;
    };
    if !meta.is_file() {
      continue;
    }
    if let Ok(mtime) = meta.modified() {
      if newest.map(|n| mtime > n).unwrap_or(true) {
        newest = Some(mtime);
      }
    }
  }

  newest
}

async fn archive_loop(camera: CameraConfig, storage: StorageConfig, token: CancellationToken) {
  let mut retry_count: i64 = 0;

  loop {
    if token.is_cancelled() {
      return;
    }

    if camera.max_retries >= 0 && retry_count >= camera.max_retries as i64 {
      warn!(camera = %camera.name, max_retries = camera.max_retries, "recording: max retries reached");
      return;
    }

    info!(camera = %camera.name, attempt = retry_count + 1, "starting recording");
    let result = record_once(&camera, &storage, &token).await;

    if token.is_cancelled() {
      return;
    }

    if let Err(e) = result {
      warn!(camera = %camera.name, error = %e, "recording failed");
      retry_count += 1;

      tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(Duration::from_secs(camera.retry_delay as u64)) => {}
      }
    }
  }
}

async fn record_once(
  camera: &CameraConfig,
  storage: &StorageConfig,
  token: &CancellationToken,
) -> anyhow::Result<()> {
  // ffmpeg expands the strftime placeholders but will not create the date
  // directory, so it must exist before the first segment opens.
  let today = Local::now().date_naive();
  std::fs::create_dir_all(layout::partition_dir(&storage.base_path, &camera.name, today))?;

  let driver = TranscoderDriver::new(archive_spec(camera, storage));
  driver.run(token).await
}

async fn live_loop(camera: CameraConfig, storage: StorageConfig, token: CancellationToken) {
  let mut retry_count: i64 = 0;

  loop {
    if token.is_cancelled() {
      return;
    }

    if camera.max_retries >= 0 && retry_count >= camera.max_retries as i64 {
      warn!(camera = %camera.name, max_retries = camera.max_retries, "live stream: max retries reached");
      return;
    }

    info!(camera = %camera.name, attempt = retry_count + 1, "starting live stream");
    let result = live_once(&camera, &storage, &token).await;

    if token.is_cancelled() {
      return;
    }

    if let Err(e) = result {
      warn!(camera = %camera.name, error = %e, "live stream failed");
      retry_count += 1;

      tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(Duration::from_secs(camera.retry_delay as u64)) => {}
      }
    }
  }
}

async fn live_once(
  camera: &CameraConfig,
  storage: &StorageConfig,
  token: &CancellationToken,
) -> anyhow::Result<()> {
  std::fs::create_dir_all(layout::live_dir(&storage.base_path, &camera.name))?;

  let driver = TranscoderDriver::new(live_spec(camera, storage));
  driver.run(token).await
}

/// Wake one minute before each local midnight and create the next day's
/// partition, closing the window where a segment could start with nowhere
/// to land.
async fn midnight_loop(camera: CameraConfig, storage: StorageConfig, token: CancellationToken) {
  loop {
    let sleep_for = until_midnight_wake(Local::now());

    tokio::select! {
      _ = token.cancelled() => return,
      _ = tokio::time::sleep(sleep_for) => {}
    }

    let Some(tomorrow) = Local::now().date_naive().checked_add_days(Days::new(1)) else {
      continue;
    };
    let dir = layout::partition_dir(&storage.base_path, &camera.name, tomorrow);
    match std::fs::create_dir_all(&dir) {
      Ok(()) => info!(camera = %camera.name, date = %tomorrow, "created next day partition"),
      Err(e) => warn!(camera = %camera.name, error = %e, "failed to create next day partition"),
    }

    tokio::select! {
      _ = token.cancelled() => return,
      _ = tokio::time::sleep(MIDNIGHT_COOLDOWN) => {}
    }
  }
}

/// Duration until one minute before the next local midnight. When already
/// inside that minute, targets the following midnight instead.
fn until_midnight_wake(now: DateTime<Local>) -> Duration {
  for days_ahead in 1..=2u64 {
    let Some(date) = now.date_naive().checked_add_days(Days::new(days_ahead)) else {
      continue;
    };
    let midnight = Local
      .with_ymd_and_hms(date.year(), date.month(), date.day(), 0, 0, 0)
      .earliest();
    let Some(midnight) = midnight else {
      continue;
    };

    let wake = midnight - MIDNIGHT_LEAD;
    if let Ok(delay) = (wake - now).to_std() {
      if !delay.is_zero() {
        return delay;
      }
    }
  }

  // Unreachable with a sane clock; retry in a day.
  Duration::from_secs(24 * 3600)
}
