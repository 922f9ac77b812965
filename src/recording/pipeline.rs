//! Driver for a single external ffmpeg process.
//!
//! The driver copies the RTSP stream as received (no transcoding) into
//! either clock-aligned archive segments or a rolling low-latency HLS
//! window. On cancellation the child gets SIGINT and five seconds to flush
//! its current segment before SIGKILL.

use anyhow::{bail, Context, Result};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{CameraConfig, StorageConfig};
use crate::storage::layout;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// What to launch for one pipeline of one camera.
#[derive(Debug, Clone)]
pub struct TranscoderSpec {
  pub camera: String,
  /// Short tag used in log lines, `rec` or `live`.
  pub label: &'static str,
  pub args: Vec<String>,
}

/// Archive pipeline: long MPEG-TS segments aligned to the wall clock,
/// written through a strftime template so segments land in the right date
/// partition even across midnight.
pub fn archive_spec(camera: &CameraConfig, storage: &StorageConfig) -> TranscoderSpec {
  let template = layout::archive_output_template(&storage.base_path, &camera.name);

  let args = vec![
    "-hide_banner".to_string(),
    "-loglevel".to_string(),
    "error".to_string(),
    "-rtsp_transport".to_string(),
    "tcp".to_string(),
    "-i".to_string(),
    camera.url.clone(),
    "-c:v".to_string(),
    "copy".to_string(),
    "-c:a".to_string(),
    "copy".to_string(),
    "-f".to_string(),
    "segment".to_string(),
    "-segment_time".to_string(),
    storage.segment_duration.to_string(),
    "-segment_format".to_string(),
    "mpegts".to_string(),
    "-segment_atclocktime".to_string(),
    "1".to_string(),
    "-reset_timestamps".to_string(),
    "1".to_string(),
    "-strftime".to_string(),
    "1".to_string(),
    template.to_string_lossy().into_owned(),
  ];

  TranscoderSpec {
    camera: camera.name.clone(),
    label: "rec",
    args,
  }
}

/// Live pipeline: two-second HLS segments, window of five, old segments
/// deleted by the transcoder, buffering disabled for latency.
pub fn live_spec(camera: &CameraConfig, storage: &StorageConfig) -> TranscoderSpec {
  let playlist = layout::live_playlist_path(&storage.base_path, &camera.name);
  let segments = layout::live_segment_template(&storage.base_path, &camera.name);

  let args = vec![
    "-hide_banner".to_string(),
    "-loglevel".to_string(),
    "error".to_string(),
    "-fflags".to_string(),
    "nobuffer".to_string(),
    "-flags".to_string(),
    "low_delay".to_string(),
    "-rtsp_transport".to_string(),
    "tcp".to_string(),
    "-i".to_string(),
    camera.url.clone(),
    "-c:v".to_string(),
    "copy".to_string(),
    "-c:a".to_string(),
    "copy".to_string(),
    "-f".to_string(),
    "hls".to_string(),
    "-hls_time".to_string(),
    "2".to_string(),
    "-hls_list_size".to_string(),
    "5".to_string(),
    "-hls_flags".to_string(),
    "delete_segments+append_list".to_string(),
    "-hls_segment_type".to_string(),
    "mpegts".to_string(),
    "-hls_segment_filename".to_string(),
    segments.to_string_lossy().into_owned(),
    "-hls_allow_cache".to_string(),
    "0".to_string(),
    playlist.to_string_lossy().into_owned(),
  ];

  TranscoderSpec {
    camera: camera.name.clone(),
    label: "live",
    args,
  }
}

pub struct TranscoderDriver {
  spec: TranscoderSpec,
}

impl TranscoderDriver {
  pub fn new(spec: TranscoderSpec) -> Self {
    Self { spec }
  }

  /// Spawn ffmpeg and wait until it exits or the token is cancelled.
  /// Always returns once the child is gone.
  pub async fn run(&self, token: &CancellationToken) -> Result<()> {
    let mut child = Command::new("ffmpeg")
      .args(&self.spec.args)
      .stdout(Stdio::null())
      .stderr(Stdio::piped())
      .spawn()
      .context("spawning ffmpeg")?;

    if let Some(stderr) = child.stderr.take() {
      let camera = self.spec.camera.clone();
      let label = self.spec.label;
      tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
          warn!(camera = %camera, pipeline = label, "ffmpeg: {}", line);
        }
      });
    }

    info!(camera = %self.spec.camera, pipeline = self.spec.label, "transcoder started");

    tokio::select! {
      status = child.wait() => {
        let status = status.context("waiting for ffmpeg")?;
        if status.success() {
          Ok(())
        } else {
          bail!("ffmpeg exited with status {}", status)
        }
      }
      _ = token.cancelled() => {
        self.shutdown(&mut child).await;
        Ok(())
      }
    }
  }

  /// SIGINT first so ffmpeg can finalize the open segment, SIGKILL after
  /// the grace period.
  async fn shutdown(&self, child: &mut tokio::process::Child) {
    if let Some(pid) = child.id() {
      unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGINT);
      }
    }

    match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
      Ok(_) => {
        info!(camera = %self.spec.camera, pipeline = self.spec.label, "transcoder stopped gracefully");
      }
      Err(_) => {
        warn!(camera = %self.spec.camera, pipeline = self.spec.label, "transcoder did not stop, killing");
        let _ = child.start_kill();
        let _ = child.wait().await;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::path::PathBuf;

  fn camera() -> CameraConfig {
    CameraConfig {
      name: "cam1".to_string(),
      url: "rtsp://10.0.0.20:554/stream1".to_string(),
      enabled: true,
      retry_delay: 10,
      max_retries: -1,
    }
  }

  fn storage() -> StorageConfig {
    StorageConfig {
      base_path: PathBuf::from("/rec"),
      segment_duration: 1800,
      retention_days: 2,
    }
  }

  #[test]
  fn archive_args_request_clock_aligned_stream_copy() {
    let spec = archive_spec(&camera(), &storage());
    let joined = spec.args.join(" ");

    assert!(joined.contains("-rtsp_transport tcp"));
    assert!(joined.contains("-i rtsp://10.0.0.20:554/stream1"));
    assert!(joined.contains("-c:v copy"));
    assert!(joined.contains("-c:a copy"));
    assert!(joined.contains("-f segment"));
    assert!(joined.contains("-segment_time 1800"));
    assert!(joined.contains("-segment_atclocktime 1"));
    assert!(joined.contains("-reset_timestamps 1"));
    assert!(joined.contains("-strftime 1"));
    assert!(joined.ends_with("/rec/cam1/recordings/%Y-%m-%d/%H-%M-%S.ts"));
  }

  #[test]
  fn live_args_request_a_rolling_low_latency_window() {
    let spec = live_spec(&camera(), &storage());
    let joined = spec.args.join(" ");

    assert!(joined.contains("-fflags nobuffer"));
    assert!(joined.contains("-flags low_delay"));
    assert!(joined.contains("-f hls"));
    assert!(joined.contains("-hls_time 2"));
    assert!(joined.contains("-hls_list_size 5"));
    assert!(joined.contains("-hls_flags delete_segments+append_list"));
    assert!(joined.contains("-hls_segment_filename /rec/cam1/live/segment%03d.ts"));
    assert!(joined.ends_with("/rec/cam1/live/stream.m3u8"));
  }
}
