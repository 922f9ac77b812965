pub mod dto;
pub mod routes;

use anyhow::{Context, Result};
use axum::{
  middleware,
  routing::get,
  Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::SessionManager;
use crate::config::Config;
use crate::storage::disk::DiskStats;

#[derive(Clone)]
pub struct AppState {
  pub config: Arc<Config>,
  pub sessions: Option<Arc<SessionManager>>,
  pub disk: Arc<dyn DiskStats>,
}

pub fn router(state: AppState) -> Router {
  let mut protected = Router::new()
    .route("/api/status", get(routes::api_status))
    .route("/api/cameras", get(routes::api_cameras))
    .route("/api/storage", get(routes::api_storage))
    .route("/api/recordings/dates", get(routes::recording_dates))
    .route("/api/recordings/list", get(routes::recordings_list))
    .route("/api/recordings/timeline", get(routes::recordings_timeline))
    .route(
      "/api/recordings/playlist/:camera/:date/:file",
      get(routes::recording_playlist),
    )
    .route("/recordings/:camera/:date/:file", get(routes::serve_recording))
    .route("/stream/:camera/*file", get(routes::serve_live));

  if state.sessions.is_some() {
    protected = protected.route_layer(middleware::from_fn_with_state(
      state.clone(),
      routes::require_session,
    ));
  }

  Router::new()
    .route("/health", get(routes::health))
    .route("/login", get(routes::login_page).post(routes::login))
    .route("/logout", get(routes::logout).post(routes::logout))
    .merge(protected)
    .layer(TraceLayer::new_for_http())
    .with_state(state)
}

/// Bind and serve until the token is cancelled.
pub async fn serve(state: AppState, port: u16, token: CancellationToken) -> Result<()> {
  let app = router(state);
  let addr = SocketAddr::from(([0, 0, 0, 0], port));
  let listener = TcpListener::bind(addr)
    .await
    .with_context(|| format!("binding web ui on {}", addr))?;

  info!(%addr, "web ui started");

  axum::serve(listener, app)
    .with_graceful_shutdown(async move { token.cancelled().await })
    .await
    .context("serving web ui")?;

  Ok(())
}
