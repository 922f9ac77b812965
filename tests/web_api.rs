//! HTTP facade exercised end to end against a seeded recordings tree.

use anyhow::Result;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

use corenvr::auth::SessionManager;
use corenvr::config::{AuthConfig, CameraConfig, Config, StorageConfig, WebUiConfig};
use corenvr::storage::disk::{DiskStats, DiskUsage};
use corenvr::web::{router, AppState};

struct FixedDisk;

impl DiskStats for FixedDisk {
  fn sample(&self, _path: &Path) -> Result<DiskUsage> {
    Ok(DiskUsage {
      total_bytes: 100_000_000_000,
      used_bytes: 42_000_000_000,
      available_bytes: 58_000_000_000,
    })
  }
}

fn seed_segment(base: &Path, camera: &str, date: &str, file: &str) {
  let dir = base.join(camera).join("recordings").join(date);
  std::fs::create_dir_all(&dir).unwrap();
  std::fs::write(dir.join(file), b"mpegts-bytes").unwrap();
}

fn test_config(base: &Path) -> Config {
  Config {
    storage: StorageConfig {
      base_path: base.to_path_buf(),
      segment_duration: 1800,
      retention_days: 2,
    },
    cameras: vec![CameraConfig {
      name: "cam1".to_string(),
      url: "rtsp://10.0.0.20:554/stream1".to_string(),
      enabled: true,
      retry_delay: 10,
      max_retries: -1,
    }],
    ..Config::default()
  }
}

fn open_state(base: &Path) -> AppState {
  AppState {
    config: Arc::new(test_config(base)),
    sessions: None,
    disk: Arc::new(FixedDisk),
  }
}

async fn get(state: AppState, uri: &str) -> (StatusCode, serde_json::Value) {
  let response = router(state)
    .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
    .await
    .unwrap();

  let status = response.status();
  let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
    .await
    .unwrap();
  let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
  (status, json)
}

#[tokio::test]
async fn health_is_public_and_plain() {
  let tmp = TempDir::new().unwrap();
  let response = router(open_state(tmp.path()))
    .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  let body = axum::body::to_bytes(response.into_body(), usize::MAX)
    .await
    .unwrap();
  assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn status_reports_storage_settings() {
  let tmp = TempDir::new().unwrap();
  let (status, json) = get(open_state(tmp.path()), "/api/status").await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(json["status"], "running");
  assert_eq!(json["retention_days"], 2);
  assert_eq!(json["segment_duration"], 1800);
  assert_eq!(json["disk_usage"], 42.0);
}

#[tokio::test]
async fn timeline_reports_segments_gaps_and_coverage() {
  let tmp = TempDir::new().unwrap();
  seed_segment(tmp.path(), "cam1", "2025-01-01", "10-00-00.ts");
  seed_segment(tmp.path(), "cam1", "2025-01-01", "10-30-00.ts");

  let (status, json) = get(
    open_state(tmp.path()),
    "/api/recordings/timeline?camera=cam1&date=2025-01-01",
  )
  .await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(json["total_segments"], 2);
  assert_eq!(json["total_gaps"], 2);

  assert_eq!(json["segments"][0]["start_time"], "10:00:00");
  assert_eq!(json["segments"][0]["end_time"], "10:30:00");
  assert_eq!(json["segments"][1]["end_time"], "11:00:00");

  assert_eq!(json["gaps"][0]["start_time"], "00:00:00");
  assert_eq!(json["gaps"][0]["end_time"], "10:00:00");
  assert_eq!(json["gaps"][0]["duration_mins"], 600);
  assert_eq!(json["gaps"][1]["start_time"], "11:00:00");
  assert_eq!(json["gaps"][1]["end_time"], "23:59:59");
  assert_eq!(json["gaps"][1]["duration_mins"], 780);

  assert_eq!(json["coverage_percent"], 4.2);
  assert_eq!(json["recorded_hours"], 1.0);
}

#[tokio::test]
async fn empty_day_timeline_is_one_full_gap() {
  let tmp = TempDir::new().unwrap();
  seed_segment(tmp.path(), "cam1", "2025-01-01", "10-00-00.ts");

  let (status, json) = get(
    open_state(tmp.path()),
    "/api/recordings/timeline?camera=cam1&date=2025-01-02",
  )
  .await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(json["total_segments"], 0);
  assert_eq!(json["total_gaps"], 1);
  assert_eq!(json["gaps"][0]["duration_mins"], 1440);
  assert_eq!(json["coverage_percent"], 0.0);
}

#[tokio::test]
async fn recordings_list_describes_each_segment() {
  let tmp = TempDir::new().unwrap();
  seed_segment(tmp.path(), "cam1", "2025-01-01", "10-00-00.ts");

  let (status, json) = get(
    open_state(tmp.path()),
    "/api/recordings/list?camera=cam1&date=2025-01-01",
  )
  .await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(json["count"], 1);
  let item = &json["recordings"][0];
  assert_eq!(item["filename"], "10-00-00.ts");
  assert_eq!(item["start_time"], "2025-01-01 10:00:00");
  assert_eq!(item["duration_seconds"], 1800);
  assert_eq!(item["url"], "/recordings/cam1/2025-01-01/10-00-00.ts");
  assert_eq!(
    item["playlist_url"],
    "/api/recordings/playlist/cam1/2025-01-01/10-00-00.ts"
  );
}

#[tokio::test]
async fn dates_are_listed_for_known_cameras_only() {
  let tmp = TempDir::new().unwrap();
  seed_segment(tmp.path(), "cam1", "2025-01-02", "00-00-00.ts");
  seed_segment(tmp.path(), "cam1", "2025-01-01", "00-00-00.ts");

  let (status, json) = get(open_state(tmp.path()), "/api/recordings/dates?camera=cam1").await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(json["dates"][0], "2025-01-01");
  assert_eq!(json["dates"][1], "2025-01-02");

  let (status, _) = get(open_state(tmp.path()), "/api/recordings/dates?camera=ghost").await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_dates_are_rejected() {
  let tmp = TempDir::new().unwrap();
  seed_segment(tmp.path(), "cam1", "2025-01-01", "10-00-00.ts");

  let (status, _) = get(
    open_state(tmp.path()),
    "/api/recordings/list?camera=cam1&date=01-01-2025",
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn recording_files_are_served_with_mpegts_content_type() {
  let tmp = TempDir::new().unwrap();
  seed_segment(tmp.path(), "cam1", "2025-01-01", "10-00-00.ts");

  let response = router(open_state(tmp.path()))
    .oneshot(
      Request::builder()
        .uri("/recordings/cam1/2025-01-01/10-00-00.ts")
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(
    response.headers().get(header::CONTENT_TYPE).unwrap(),
    "video/mp2t"
  );
  let body = axum::body::to_bytes(response.into_body(), usize::MAX)
    .await
    .unwrap();
  assert_eq!(&body[..], b"mpegts-bytes");
}

#[tokio::test]
async fn recording_routes_reject_traversal_and_foreign_extensions() {
  let tmp = TempDir::new().unwrap();
  seed_segment(tmp.path(), "cam1", "2025-01-01", "10-00-00.ts");
  std::fs::write(tmp.path().join("secret.ts"), b"secret").unwrap();

  for uri in [
    "/recordings/cam1/2025-01-01/10-00-00.mp4",
    "/recordings/cam1/2025-01-01/..%2F..%2F..%2Fsecret.ts",
    "/recordings/..%2Fcam1/2025-01-01/10-00-00.ts",
  ] {
    let response = router(open_state(tmp.path()))
      .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
      .await
      .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri: {}", uri);
  }

  let response = router(open_state(tmp.path()))
    .oneshot(
      Request::builder()
        .uri("/recordings/cam1/2025-01-01/missing.ts")
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn playlist_wraps_a_single_segment() {
  let tmp = TempDir::new().unwrap();
  seed_segment(tmp.path(), "cam1", "2025-01-01", "10-00-00.ts");

  let response = router(open_state(tmp.path()))
    .oneshot(
      Request::builder()
        .uri("/api/recordings/playlist/cam1/2025-01-01/10-00-00.ts")
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();

  assert_eq!(response.status(), StatusCode::OK);
  assert_eq!(
    response.headers().get(header::CONTENT_TYPE).unwrap(),
    "application/vnd.apple.mpegurl"
  );

  let body = axum::body::to_bytes(response.into_body(), usize::MAX)
    .await
    .unwrap();
  let playlist = String::from_utf8(body.to_vec()).unwrap();
  assert!(playlist.contains("#EXT-X-TARGETDURATION:1800"));
  assert!(playlist.contains("/recordings/cam1/2025-01-01/10-00-00.ts"));
}

#[tokio::test]
async fn storage_breaks_usage_down_per_camera() {
  let tmp = TempDir::new().unwrap();
  seed_segment(tmp.path(), "cam1", "2025-01-01", "10-00-00.ts");
  seed_segment(tmp.path(), "cam1", "2025-01-02", "10-00-00.ts");

  let (status, json) = get(open_state(tmp.path()), "/api/storage").await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(json["percent_used"], 42.0);
  assert_eq!(json["alert_level"], "normal");
  assert_eq!(json["cameras"][0]["name"], "cam1");
  assert_eq!(json["cameras"][0]["days_stored"], 2);
  assert_eq!(json["cameras"][0]["size_bytes"], 24);
}

fn auth_state(base: &Path) -> AppState {
  let mut config = test_config(base);
  config.webui = WebUiConfig {
    enabled: true,
    port: 8080,
    authentication: AuthConfig {
      enabled: true,
      username: "admin".to_string(),
      password_hash: corenvr::auth::hash_password("hunter2").unwrap(),
      session_timeout: 60,
      secret_key: "secret".to_string(),
    },
  };

  let auth = &config.webui.authentication;
  let sessions = Arc::new(SessionManager::new(
    auth.username.clone(),
    auth.password_hash.clone(),
    auth.session_timeout,
  ));

  AppState {
    config: Arc::new(config),
    sessions: Some(sessions),
    disk: Arc::new(FixedDisk),
  }
}

async fn login(state: AppState, body: &str) -> (StatusCode, Option<String>) {
  let response = router(state)
    .oneshot(
      Request::builder()
        .method("POST")
        .uri("/login")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap(),
    )
    .await
    .unwrap();

  let status = response.status();
  let cookie = response
    .headers()
    .get(header::SET_COOKIE)
    .map(|v| v.to_str().unwrap().to_string());
  (status, cookie)
}

#[tokio::test]
async fn api_requires_a_session_when_auth_is_enabled() {
  let tmp = TempDir::new().unwrap();
  let state = auth_state(tmp.path());

  let (status, _) = get(state.clone(), "/api/status").await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);

  // Health stays public.
  let response = router(state)
    .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn login_issues_a_cookie_that_unlocks_the_api() {
  let tmp = TempDir::new().unwrap();
  let state = auth_state(tmp.path());

  let (status, _) = login(state.clone(), "username=admin&password=wrong").await;
  assert_eq!(status, StatusCode::UNAUTHORIZED);

  let (status, cookie) = login(state.clone(), "username=admin&password=hunter2").await;
  assert_eq!(status, StatusCode::OK);
  let cookie = cookie.unwrap();
  assert!(cookie.starts_with("session_id="));
  assert!(cookie.contains("HttpOnly"));

  let session_pair = cookie.split(';').next().unwrap().to_string();
  let response = router(state)
    .oneshot(
      Request::builder()
        .uri("/api/status")
        .header(header::COOKIE, session_pair)
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn remember_me_extends_the_cookie() {
  let tmp = TempDir::new().unwrap();
  let state = auth_state(tmp.path());

  let (status, cookie) = login(state, "username=admin&password=hunter2&remember=on").await;
  assert_eq!(status, StatusCode::OK);
  assert!(cookie.unwrap().contains("Max-Age=2592000"));
}

#[tokio::test]
async fn logout_clears_the_session() {
  let tmp = TempDir::new().unwrap();
  let state = auth_state(tmp.path());

  let (_, cookie) = login(state.clone(), "username=admin&password=hunter2").await;
  let session_pair = cookie.unwrap().split(';').next().unwrap().to_string();

  let response = router(state.clone())
    .oneshot(
      Request::builder()
        .uri("/logout")
        .header(header::COOKIE, session_pair.clone())
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::SEE_OTHER);

  let response = router(state)
    .oneshot(
      Request::builder()
        .uri("/api/status")
        .header(header::COOKIE, session_pair)
        .body(Body::empty())
        .unwrap(),
    )
    .await
    .unwrap();
  assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
