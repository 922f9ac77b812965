use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use corenvr::alerts::{Alerter, SlackAlerter};
use corenvr::auth::SessionManager;
use corenvr::config::Config;
use corenvr::recording::supervisor::{last_segment_time_at, CameraSupervisor};
use corenvr::recovery::manager::{CameraHandle, RecoveryManager, SystemdServiceControl};
use corenvr::recovery::smartplug::SmartPlug;
use corenvr::storage::disk::{DiskStats, StatvfsDisk};
use corenvr::storage::retention::RetentionManager;
use corenvr::telemetry;
use corenvr::web::{self, AppState};

/// Bound on the wait for all supervisors during shutdown.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "corenvr", version, about = "Lightweight NVR with tiered camera recovery")]
struct Args {
  /// Path to the configuration file
  #[arg(long, default_value = "/etc/corenvr/config.yaml")]
  config: PathBuf,

  /// Exercise the smart plug against the configured device and exit
  #[arg(long, value_enum, value_name = "COMMAND")]
  test_plug: Option<PlugCommand>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PlugCommand {
  On,
  Off,
  Status,
  Cycle,
}

#[tokio::main]
async fn main() -> Result<()> {
  let args = Args::parse();

  if let Some(command) = args.test_plug {
    return test_plug(&args.config, command).await;
  }

  let config = Config::load(&args.config)?;
  let _telemetry_guard = telemetry::init(&config.system);

  info!(version = env!("CARGO_PKG_VERSION"), "starting corenvr");
  info!(
    base_path = %config.storage.base_path.display(),
    segment_duration = config.storage.segment_duration,
    retention_days = config.storage.retention_days,
    "storage configuration"
  );

  std::fs::create_dir_all(&config.storage.base_path)
    .context("creating storage directory")?;

  let config = Arc::new(config);
  let root = CancellationToken::new();
  let mut background: Vec<JoinHandle<()>> = Vec::new();

  let webhook = (config.recovery.enabled && !config.recovery.slack_webhook.is_empty())
    .then(|| config.recovery.slack_webhook.clone());
  let alerter: Arc<dyn Alerter> = Arc::new(SlackAlerter::new(webhook));
  let disk: Arc<dyn DiskStats> = Arc::new(StatvfsDisk);

  let retention = Arc::new(RetentionManager::new(
    config.storage.clone(),
    disk.clone(),
    alerter.clone(),
  ));
  {
    let retention = retention.clone();
    let token = root.clone();
    background.push(tokio::spawn(async move {
      retention.run(token).await;
    }));
  }

  let mut supervisors: Vec<Arc<CameraSupervisor>> = Vec::new();
  for cam in &config.cameras {
    if !cam.enabled {
      info!(camera = %cam.name, "camera disabled, skipping");
      continue;
    }

    let supervisor = Arc::new(CameraSupervisor::new(
      cam.clone(),
      config.storage.clone(),
      root.clone(),
    ));
    supervisor.start().await;
    supervisors.push(supervisor);
  }

  if config.system.health_check_interval > 0 {
    background.push(tokio::spawn(health_monitor(
      config.clone(),
      disk.clone(),
      root.clone(),
    )));
  }

  if config.recovery.enabled {
    match SmartPlug::new(config.recovery.smartplug.clone()) {
      Ok(plug) => {
        let handles: Vec<Arc<dyn CameraHandle>> = supervisors
          .iter()
          .map(|s| s.clone() as Arc<dyn CameraHandle>)
          .collect();
        let manager = Arc::new(RecoveryManager::new(
          config.recovery.clone(),
          handles,
          Arc::new(plug),
          Arc::new(SystemdServiceControl {
            unit: "corenvr".to_string(),
          }),
          alerter.clone(),
        ));
        background.push(tokio::spawn(manager.run(root.clone())));
        info!("camera recovery system active");
      }
      Err(e) => {
        warn!(error = %e, "failed to initialize recovery manager, continuing without automatic recovery");
      }
    }
  }

  if config.webui.enabled {
    let auth = &config.webui.authentication;
    let sessions = auth.enabled.then(|| {
      Arc::new(SessionManager::new(
        auth.username.clone(),
        auth.password_hash.clone(),
        auth.session_timeout,
      ))
    });

    if let Some(sessions) = &sessions {
      background.push(tokio::spawn(sessions.clone().run_sweeper(root.clone())));
    }

    let state = AppState {
      config: config.clone(),
      sessions,
      disk: disk.clone(),
    };
    let port = config.webui.port;
    let token = root.clone();
    background.push(tokio::spawn(async move {
      if let Err(e) = web::serve(state, port, token).await {
        error!(error = %e, "web ui server failed");
      }
    }));
  }

  shutdown_signal().await;
  info!("shutting down");
  root.cancel();

  let stop_all = async {
    for supervisor in &supervisors {
      supervisor.stop().await;
    }
  };
  if tokio::time::timeout(SHUTDOWN_TIMEOUT, stop_all).await.is_err() {
    warn!("timeout waiting for recorders to stop");
  }

  for task in background {
    let _ = tokio::time::timeout(Duration::from_secs(5), task).await;
  }

  info!("corenvr shutdown complete");
  Ok(())
}

async fn shutdown_signal() {
  let ctrl_c = async {
    tokio::signal::ctrl_c()
      .await
      .expect("failed to install ctrl-c handler");
  };

  let terminate = async {
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
      .expect("failed to install signal handler")
      .recv()
      .await;
  };

  tokio::select! {
    _ = ctrl_c => info!("received ctrl-c"),
    _ = terminate => info!("received terminate signal"),
  }
}

/// Lightweight periodic health logging: disk headroom and cameras without
/// recent segments. The recovery controller owns the real reaction.
async fn health_monitor(config: Arc<Config>, disk: Arc<dyn DiskStats>, token: CancellationToken) {
  let interval = Duration::from_secs(config.system.health_check_interval as u64);

  loop {
    tokio::select! {
      _ = token.cancelled() => return,
      _ = tokio::time::sleep(interval) => {}
    }

    match disk.sample(&config.storage.base_path) {
      Ok(usage) => {
        let percent = usage.percent_used();
        if percent > 90.0 {
          warn!(percent_used = percent, "disk usage critical");
        } else if percent > 80.0 {
          warn!(percent_used = percent, "disk usage high");
        }
      }
      Err(e) => warn!(error = %e, "health check failed to sample disk"),
    }

    let today = Local::now().date_naive();
    for cam in config.enabled_cameras() {
      let fresh = last_segment_time_at(&config.storage.base_path, &cam.name, today)
        .and_then(|mtime| SystemTime::now().duration_since(mtime).ok())
        .map(|age| age <= Duration::from_secs(600))
        .unwrap_or(false);
      if !fresh {
        warn!(camera = %cam.name, "no recent recordings");
      }
    }
  }
}

/// `--test-plug`: bypass startup and drive the configured smart plug once.
async fn test_plug(config_path: &Path, command: PlugCommand) -> Result<()> {
  let config = Config::load(config_path)?;
  if !config.recovery.enabled {
    bail!("recovery system is not enabled in config");
  }

  let plug = SmartPlug::new(config.recovery.smartplug.clone())
    .context("initializing smart plug")?;
  println!("Smart plug initialized: {}", config.recovery.smartplug.ip);

  match command {
    PlugCommand::On => {
      plug.turn_on().await.context("turning plug on")?;
      println!("Plug turned ON successfully");
    }
    PlugCommand::Off => {
      plug.turn_off().await.context("turning plug off")?;
      println!("Plug turned OFF successfully");
    }
    PlugCommand::Status => {
      let online = plug.get_status().await.context("getting plug status")?;
      if online {
        println!("Plug is ONLINE and responsive");
      } else {
        println!("Plug is OFFLINE or not responding");
      }
    }
    PlugCommand::Cycle => {
      println!(
        "Power cycling: plug will stay off for {} seconds",
        config.recovery.smartplug.power_off_duration
      );
      plug.power_cycle().await.context("power cycling plug")?;
      println!("Power cycle completed successfully");
    }
  }

  Ok(())
}
