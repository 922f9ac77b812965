//! HTTP handlers for the facade.

use axum::{
  body::Body,
  extract::{Form, Path, Query, Request, State},
  http::{header, HeaderMap, HeaderValue, StatusCode},
  middleware::Next,
  response::{IntoResponse, Redirect, Response},
  Json,
};
use chrono::{DateTime, Local, NaiveDate};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tower::util::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{error, info};

use crate::auth::{session_id_from_cookies, SESSION_COOKIE};
use crate::playback::{indexer, timeline};
use crate::storage::disk::DiskAlertLevel;
use crate::storage::{layout, retention};
use crate::web::dto::*;
use crate::web::AppState;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const MIB: f64 = 1024.0 * 1024.0;
/// A camera counts as actively recording when its newest segment is
/// younger than this.
const RECORDING_FRESHNESS: Duration = Duration::from_secs(5 * 60);

fn round1(v: f64) -> f64 {
  (v * 10.0).round() / 10.0
}

fn round2(v: f64) -> f64 {
  (v * 100.0).round() / 100.0
}

fn error_response(status: StatusCode, message: &str) -> Response {
  (
    status,
    Json(ErrorResponse {
      error: message.to_string(),
    }),
  )
    .into_response()
}

/// Path segments used to build filesystem paths must be plain names.
fn valid_name(s: &str) -> bool {
  !s.is_empty() && !s.contains('/') && !s.contains('\\') && !s.contains("..")
}

/// Canonicalize `candidate` and require it to stay under `root`.
fn resolve_under(root: &std::path::Path, candidate: &std::path::Path) -> Result<PathBuf, Response> {
  let root = std::fs::canonicalize(root).map_err(|e| {
    if e.kind() == std::io::ErrorKind::NotFound {
      error_response(StatusCode::NOT_FOUND, "not found")
    } else {
      error_response(StatusCode::INTERNAL_SERVER_ERROR, "filesystem error")
    }
  })?;

  let resolved = std::fs::canonicalize(candidate).map_err(|e| {
    if e.kind() == std::io::ErrorKind::NotFound {
      error_response(StatusCode::NOT_FOUND, "not found")
    } else {
      error_response(StatusCode::INTERNAL_SERVER_ERROR, "filesystem error")
    }
  })?;

  if !resolved.starts_with(&root) {
    return Err(error_response(StatusCode::FORBIDDEN, "forbidden"));
  }

  Ok(resolved)
}

pub async fn require_session(State(state): State<AppState>, req: Request, next: Next) -> Response {
  let Some(sessions) = state.sessions.as_ref() else {
    return next.run(req).await;
  };

  let session_id = req
    .headers()
    .get(header::COOKIE)
    .and_then(|v| v.to_str().ok())
    .and_then(session_id_from_cookies);

  match session_id {
    Some(id) if sessions.validate_session(&id).await => {
      sessions.refresh_session(&id).await;
      next.run(req).await
    }
    _ => error_response(StatusCode::UNAUTHORIZED, "authentication required"),
  }
}

pub async fn health() -> &'static str {
  "OK"
}

pub async fn api_status(State(state): State<AppState>) -> Json<StatusResponse> {
  let disk_usage = state
    .disk
    .sample(&state.config.storage.base_path)
    .map(|u| round1(u.percent_used()))
    .unwrap_or(0.0);

  Json(StatusResponse {
    status: "running",
    storage_path: state.config.storage.base_path.display().to_string(),
    disk_usage,
    retention_days: state.config.storage.retention_days,
    segment_duration: state.config.storage.segment_duration,
  })
}

pub async fn api_cameras(State(state): State<AppState>) -> Json<Vec<CameraStatus>> {
  let base = &state.config.storage.base_path;
  let today = Local::now().date_naive();

  let cameras = state
    .config
    .cameras
    .iter()
    .map(|cam| {
      let mut status = CameraStatus {
        name: cam.name.clone(),
        enabled: cam.enabled,
        recording: false,
        last_file: String::new(),
        last_modified: String::new(),
      };

      let dir = layout::partition_dir(base, &cam.name, today);
      let Ok(entries) = std::fs::read_dir(&dir) else {
        return status;
      };

      let mut files: Vec<String> = entries
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|n| n.ends_with(".ts"))
        .collect();
      files.sort();

      if let Some(latest) = files.last() {
        status.last_file = latest.clone();
        if let Ok(mtime) = std::fs::metadata(dir.join(latest)).and_then(|m| m.modified()) {
          let local: DateTime<Local> = mtime.into();
          status.last_modified = local.format("%H:%M:%S").to_string();
          status.recording = SystemTime::now()
            .duration_since(mtime)
            .map(|age| age < RECORDING_FRESHNESS)
            .unwrap_or(true);
        }
      }

      status
    })
    .collect();

  Json(cameras)
}

pub async fn api_storage(State(state): State<AppState>) -> Response {
  let base = &state.config.storage.base_path;
  let usage = match state.disk.sample(base) {
    Ok(usage) => usage,
    Err(e) => {
      error!(error = %e, "failed to get disk stats");
      return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to get disk stats");
    }
  };

  let cameras = state
    .config
    .enabled_cameras()
    .map(|cam| {
      let size = retention::dir_size(&layout::recordings_dir(base, &cam.name));
      let days = indexer::list_dates(base, &cam.name)
        .map(|d| d.len())
        .unwrap_or(0);
      CameraStorage {
        name: cam.name.clone(),
        size_bytes: size,
        size_gb: round2(size as f64 / GIB),
        days_stored: days,
      }
    })
    .collect();

  let percent_used = usage.percent_used();
  Json(StorageResponse {
    total_bytes: usage.total_bytes,
    used_bytes: usage.used_bytes,
    available_bytes: usage.available_bytes,
    total_gb: round2(usage.total_bytes as f64 / GIB),
    used_gb: round2(usage.used_bytes as f64 / GIB),
    available_gb: round2(usage.available_bytes as f64 / GIB),
    percent_used: round1(percent_used),
    alert_level: DiskAlertLevel::from_percent(percent_used),
    retention_days: state.config.storage.retention_days,
    cameras,
  })
  .into_response()
}

pub async fn recording_dates(
  State(state): State<AppState>,
  Query(query): Query<CameraQuery>,
) -> Response {
  if !valid_name(&query.camera) {
    return error_response(StatusCode::BAD_REQUEST, "camera parameter required");
  }

  match indexer::list_dates(&state.config.storage.base_path, &query.camera) {
    Ok(dates) => Json(DatesResponse {
      camera: query.camera,
      dates,
    })
    .into_response(),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      error_response(StatusCode::NOT_FOUND, "camera not found")
    }
    Err(e) => {
      error!(camera = %query.camera, error = %e, "failed to list recording dates");
      error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to read recordings")
    }
  }
}

fn parse_date_param(date: &str) -> Result<NaiveDate, Response> {
  layout::parse_partition_date(date).ok_or_else(|| {
    error_response(StatusCode::BAD_REQUEST, "invalid date format, use YYYY-MM-DD")
  })
}

pub async fn recordings_list(
  State(state): State<AppState>,
  Query(query): Query<CameraDateQuery>,
) -> Response {
  if !valid_name(&query.camera) {
    return error_response(StatusCode::BAD_REQUEST, "camera parameter required");
  }
  let date = match parse_date_param(&query.date) {
    Ok(date) => date,
    Err(resp) => return resp,
  };

  let base = &state.config.storage.base_path;
  if !indexer::camera_has_recordings(base, &query.camera) {
    return error_response(StatusCode::NOT_FOUND, "camera not found");
  }

  let segments = match indexer::read_day_segments(base, &query.camera, date) {
    Ok(segments) => segments,
    Err(e) => {
      error!(camera = %query.camera, error = %e, "failed to list recordings");
      return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to list recordings");
    }
  };

  let recordings: Vec<RecordingItem> = segments
    .into_iter()
    .map(|seg| RecordingItem {
      start_time: format!("{} {}", query.date, seg.start.format("%H:%M:%S")),
      size: seg.size_bytes,
      size_mb: round2(seg.size_bytes as f64 / MIB),
      duration_seconds: state.config.storage.segment_duration,
      url: format!("/recordings/{}/{}/{}", query.camera, query.date, seg.filename),
      playlist_url: format!(
        "/api/recordings/playlist/{}/{}/{}",
        query.camera, query.date, seg.filename
      ),
      filename: seg.filename,
    })
    .collect();

  Json(RecordingsListResponse {
    camera: query.camera,
    date: query.date,
    count: recordings.len(),
    recordings,
  })
  .into_response()
}

pub async fn recordings_timeline(
  State(state): State<AppState>,
  Query(query): Query<CameraDateQuery>,
) -> Response {
  if !valid_name(&query.camera) {
    return error_response(StatusCode::BAD_REQUEST, "camera parameter required");
  }
  let date = match parse_date_param(&query.date) {
    Ok(date) => date,
    Err(resp) => return resp,
  };

  let base = &state.config.storage.base_path;
  if !indexer::camera_has_recordings(base, &query.camera) {
    return error_response(StatusCode::NOT_FOUND, "camera not found");
  }

  let segments = match indexer::read_day_segments(base, &query.camera, date) {
    Ok(segments) => segments,
    Err(e) => {
      error!(camera = %query.camera, error = %e, "failed to read timeline");
      return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to read timeline");
    }
  };

  let tl = timeline::build_timeline(segments, state.config.storage.segment_duration);

  Json(TimelineResponse {
    camera: query.camera,
    date: query.date,
    total_segments: tl.segments.len(),
    total_gaps: tl.gaps.len(),
    segments: tl
      .segments
      .into_iter()
      .map(|s| TimelineSegmentItem {
        start_time: s.start.format("%H:%M:%S").to_string(),
        end_time: s.end.format("%H:%M:%S").to_string(),
        filename: s.filename,
        size_mb: round2(s.size_bytes as f64 / MIB),
      })
      .collect(),
    gaps: tl
      .gaps
      .into_iter()
      .map(|g| TimelineGapItem {
        start_time: g.start.format("%H:%M:%S").to_string(),
        end_time: g.end.format("%H:%M:%S").to_string(),
        duration_mins: g.duration_mins,
      })
      .collect(),
    coverage_percent: round1(tl.coverage_percent),
    recorded_hours: round1(tl.recorded_hours),
  })
  .into_response()
}

pub async fn recording_playlist(
  State(state): State<AppState>,
  Path((camera, date, file)): Path<(String, String, String)>,
) -> Response {
  if !valid_name(&camera) || !valid_name(&file) {
    return error_response(StatusCode::BAD_REQUEST, "invalid path");
  }
  if parse_date_param(&date).is_err() {
    return error_response(StatusCode::BAD_REQUEST, "invalid date format, use YYYY-MM-DD");
  }
  if !file.ends_with(".ts") {
    return error_response(StatusCode::BAD_REQUEST, "invalid file type");
  }

  let base = &state.config.storage.base_path;
  let root = layout::recordings_dir(base, &camera);
  let candidate = root.join(&date).join(&file);
  if let Err(resp) = resolve_under(&root, &candidate) {
    return resp;
  }

  let playlist = indexer::single_segment_playlist(
    &camera,
    &date,
    &file,
    state.config.storage.segment_duration,
  );

  (
    [
      (header::CONTENT_TYPE, "application/vnd.apple.mpegurl"),
      (header::CACHE_CONTROL, "no-cache"),
    ],
    playlist,
  )
    .into_response()
}

pub async fn serve_recording(
  State(state): State<AppState>,
  Path((camera, date, file)): Path<(String, String, String)>,
  req: Request,
) -> Response {
  if !valid_name(&camera) || !valid_name(&file) {
    return error_response(StatusCode::BAD_REQUEST, "invalid path");
  }
  if parse_date_param(&date).is_err() {
    return error_response(StatusCode::BAD_REQUEST, "invalid date format, use YYYY-MM-DD");
  }
  if !file.ends_with(".ts") {
    return error_response(StatusCode::BAD_REQUEST, "invalid file type");
  }

  let base = &state.config.storage.base_path;
  let root = layout::recordings_dir(base, &camera);
  let candidate = root.join(&date).join(&file);
  let resolved = match resolve_under(&root, &candidate) {
    Ok(path) => path,
    Err(resp) => return resp,
  };

  let mime: mime::Mime = "video/mp2t".parse().expect("valid mime");
  match ServeFile::new_with_mime(&resolved, &mime).oneshot(req).await {
    Ok(res) => res.map(Body::new).into_response(),
    Err(e) => {
      error!(path = %resolved.display(), error = %e, "failed to serve recording");
      error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to serve recording")
    }
  }
}

pub async fn serve_live(
  State(state): State<AppState>,
  Path((camera, file)): Path<(String, String)>,
  req: Request,
) -> Response {
  if !valid_name(&camera) || !valid_name(&file) {
    return error_response(StatusCode::BAD_REQUEST, "invalid path");
  }

  let is_playlist = file.ends_with(".m3u8");
  if !is_playlist && !file.ends_with(".ts") {
    return error_response(StatusCode::BAD_REQUEST, "invalid file type");
  }

  let root = layout::live_dir(&state.config.storage.base_path, &camera);
  let resolved = match resolve_under(&root, &root.join(&file)) {
    Ok(path) => path,
    Err(resp) => return resp,
  };

  let mime: mime::Mime = if is_playlist {
    "application/vnd.apple.mpegurl".parse().expect("valid mime")
  } else {
    "video/mp2t".parse().expect("valid mime")
  };

  match ServeFile::new_with_mime(&resolved, &mime).oneshot(req).await {
    Ok(res) => {
      let mut res = res.map(Body::new).into_response();
      if is_playlist {
        res
          .headers_mut()
          .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
      }
      res
    }
    Err(e) => {
      error!(path = %resolved.display(), error = %e, "failed to serve live segment");
      error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to serve live segment")
    }
  }
}

pub async fn login_page() -> Json<LoginResponse> {
  Json(LoginResponse {
    status: "login_required",
  })
}

pub async fn login(State(state): State<AppState>, Form(form): Form<LoginForm>) -> Response {
  let Some(sessions) = state.sessions.as_ref() else {
    return Json(LoginResponse { status: "success" }).into_response();
  };

  if !sessions.authenticate(&form.username, &form.password) {
    return error_response(StatusCode::UNAUTHORIZED, "invalid username or password");
  }

  let session_id = sessions.create_session(&form.username).await;
  let remember = form.remember.as_deref() == Some("on");

  let mut cookie = format!(
    "{}={}; Path=/; HttpOnly; SameSite=Strict",
    SESSION_COOKIE, session_id
  );
  if remember {
    cookie.push_str("; Max-Age=2592000");
  }

  info!(username = %form.username, "user logged in");

  (
    [(header::SET_COOKIE, cookie)],
    Json(LoginResponse { status: "success" }),
  )
    .into_response()
}

pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> Response {
  if let Some(sessions) = state.sessions.as_ref() {
    let session_id = headers
      .get(header::COOKIE)
      .and_then(|v| v.to_str().ok())
      .and_then(session_id_from_cookies);
    if let Some(id) = session_id {
      sessions.destroy_session(&id).await;
    }
  }

  info!("user logged out");

  let clear = format!("{}=; Path=/; Max-Age=0; HttpOnly", SESSION_COOKIE);
  ([(header::SET_COOKIE, clear)], Redirect::to("/login")).into_response()
}
