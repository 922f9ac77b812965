//! Typed JSON bodies for the HTTP facade, one per endpoint.

use serde::{Deserialize, Serialize};

use crate::storage::disk::DiskAlertLevel;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
  pub status: &'static str,
  pub storage_path: String,
  /// Percent of the storage filesystem in use.
  pub disk_usage: f64,
  pub retention_days: u32,
  pub segment_duration: u32,
}

#[derive(Debug, Serialize)]
pub struct CameraStatus {
  pub name: String,
  pub enabled: bool,
  /// Newest segment modified within the last five minutes.
  pub recording: bool,
  pub last_file: String,
  /// `HH:MM:SS` local time of the newest segment, empty when none exists.
  pub last_modified: String,
}

#[derive(Debug, Serialize)]
pub struct StorageResponse {
  pub total_bytes: u64,
  pub used_bytes: u64,
  pub available_bytes: u64,
  pub total_gb: f64,
  pub used_gb: f64,
  pub available_gb: f64,
  pub percent_used: f64,
  pub alert_level: DiskAlertLevel,
  pub retention_days: u32,
  pub cameras: Vec<CameraStorage>,
}

#[derive(Debug, Serialize)]
pub struct CameraStorage {
  pub name: String,
  pub size_bytes: u64,
  pub size_gb: f64,
  pub days_stored: usize,
}

#[derive(Debug, Serialize)]
pub struct DatesResponse {
  pub camera: String,
  pub dates: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RecordingsListResponse {
  pub camera: String,
  pub date: String,
  pub count: usize,
  pub recordings: Vec<RecordingItem>,
}

#[derive(Debug, Serialize)]
pub struct RecordingItem {
  pub filename: String,
  /// `YYYY-MM-DD HH:MM:SS`, parsed from the filename.
  pub start_time: String,
  pub size: u64,
  pub size_mb: f64,
  pub duration_seconds: u32,
  pub url: String,
  pub playlist_url: String,
}

#[derive(Debug, Serialize)]
pub struct TimelineResponse {
  pub camera: String,
  pub date: String,
  pub segments: Vec<TimelineSegmentItem>,
  pub gaps: Vec<TimelineGapItem>,
  pub total_segments: usize,
  pub total_gaps: usize,
  pub coverage_percent: f64,
  pub recorded_hours: f64,
}

#[derive(Debug, Serialize)]
pub struct TimelineSegmentItem {
  pub start_time: String,
  pub end_time: String,
  pub filename: String,
  pub size_mb: f64,
}

#[derive(Debug, Serialize)]
pub struct TimelineGapItem {
  pub start_time: String,
  pub end_time: String,
  pub duration_mins: i64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
  pub error: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
  pub status: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
  pub username: String,
  pub password: String,
  /// Checkbox value, `on` when set.
  #[serde(default)]
  pub remember: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CameraQuery {
  pub camera: String,
}

#[derive(Debug, Deserialize)]
pub struct CameraDateQuery {
  pub camera: String,
  pub date: String,
}
