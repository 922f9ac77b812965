//! Tiered camera recovery.
//!
//! A ticker reads each camera's last-segment time. Stale cameras first sit
//! through a verification window (debouncing transient stalls), then
//! escalate one tier per tick: pipeline restart, whole-service restart,
//! smart-plug power cycle. Each tier runs at most once per failure episode
//! and power cycles are rate-capped across episodes.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::alerts::Alerter;
use crate::config::RecoveryConfig;
use crate::recording::supervisor::CameraSupervisor;
use crate::recovery::smartplug::SmartPlug;

/// Rolling window for the power-cycle rate cap.
const POWER_CYCLE_WINDOW: Duration = Duration::from_secs(30 * 60);

/// A camera the controller can observe and restart.
#[async_trait]
pub trait CameraHandle: Send + Sync {
  fn name(&self) -> &str;
  fn last_segment_time(&self) -> Option<SystemTime>;
  async fn restart_pipelines(&self) -> Result<()>;
}

#[async_trait]
impl CameraHandle for CameraSupervisor {
  fn name(&self) -> &str {
    self.camera_name()
  }

  fn last_segment_time(&self) -> Option<SystemTime> {
    CameraSupervisor::last_segment_time(self)
  }

  async fn restart_pipelines(&self) -> Result<()> {
    self.restart().await;
    Ok(())
  }
}

#[async_trait]
pub trait PlugControl: Send + Sync {
  async fn power_cycle(&self) -> Result<()>;
}

#[async_trait]
impl PlugControl for SmartPlug {
  async fn power_cycle(&self) -> Result<()> {
    SmartPlug::power_cycle(self).await
  }
}

/// Process-manager seam for the whole-service restart tier.
#[async_trait]
pub trait ServiceControl: Send + Sync {
  async fn restart_service(&self) -> Result<()>;
}

pub struct SystemdServiceControl {
  pub unit: String,
}

#[async_trait]
impl ServiceControl for SystemdServiceControl {
  async fn restart_service(&self) -> Result<()> {
    // The restart may terminate this very process; issue the command and
    // return, the process manager takes it from here.
    let status = tokio::process::Command::new("systemctl")
      .arg("restart")
      .arg(&self.unit)
      .status()
      .await?;
    if !status.success() {
      anyhow::bail!("systemctl restart {} exited with {}", self.unit, status);
    }
    Ok(())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryTier {
  PipelineRestart,
  ServiceRestart,
  PowerCycle,
}

impl RecoveryTier {
  pub fn as_str(&self) -> &'static str {
    match self {
      RecoveryTier::PipelineRestart => "pipeline_restart",
      RecoveryTier::ServiceRestart => "service_restart",
      RecoveryTier::PowerCycle => "power_cycle",
    }
  }
}

#[derive(Debug, Clone)]
pub struct RecoveryAttempt {
  pub at: SystemTime,
  pub tier: RecoveryTier,
  pub success: bool,
}

/// Per-camera recovery bookkeeping. Cleared whenever the camera is
/// observed healthy again.
#[derive(Debug, Default)]
pub struct RecoveryState {
  pub failure_detected_at: Option<SystemTime>,
  pub attempts: Vec<RecoveryAttempt>,
}

impl RecoveryState {
  fn has_attempted(&self, tier: RecoveryTier) -> bool {
    self.attempts.iter().any(|a| a.tier == tier)
  }

  fn recent_power_cycles(&self, now: SystemTime, window: Duration) -> usize {
    self
      .attempts
      .iter()
      .filter(|a| a.tier == RecoveryTier::PowerCycle)
      .filter(|a| {
        now
          .duration_since(a.at)
          .map(|age| age <= window)
          .unwrap_or(false)
      })
      .count()
  }

  fn record(&mut self, tier: RecoveryTier, now: SystemTime) {
    // `success` stays false here; only the next healthy observation
    // proves an attempt worked, and that clears the whole list.
    self.attempts.push(RecoveryAttempt {
      at: now,
      tier,
      success: false,
    });
  }

  fn clear(&mut self) {
    self.failure_detected_at = None;
    self.attempts.clear();
  }
}

struct CameraEntry {
  handle: Arc<dyn CameraHandle>,
  state: Mutex<RecoveryState>,
}

pub struct RecoveryManager {
  config: RecoveryConfig,
  cameras: RwLock<HashMap<String, Arc<CameraEntry>>>,
  plug: Arc<dyn PlugControl>,
  service: Arc<dyn ServiceControl>,
  alerter: Arc<dyn Alerter>,
}

impl RecoveryManager {
  pub fn new(
    config: RecoveryConfig,
    handles: Vec<Arc<dyn CameraHandle>>,
    plug: Arc<dyn PlugControl>,
    service: Arc<dyn ServiceControl>,
    alerter: Arc<dyn Alerter>,
  ) -> Self {
    let cameras = handles
      .into_iter()
      .map(|handle| {
        (
          handle.name().to_string(),
          Arc::new(CameraEntry {
            handle,
            state: Mutex::new(RecoveryState::default()),
          }),
        )
      })
      .collect();

    info!("recovery manager initialized");
    Self {
      config,
      cameras: RwLock::new(cameras),
      plug,
      service,
      alerter,
    }
  }

  pub async fn run(self: Arc<Self>, token: CancellationToken) {
    info!(
      interval_secs = self.config.health_check_interval,
      "camera recovery monitor started"
    );

    let interval = Duration::from_secs(self.config.health_check_interval.max(1) as u64);
    loop {
      tokio::select! {
        _ = token.cancelled() => {
          info!("recovery manager shutting down");
          return;
        }
        _ = tokio::time::sleep(interval) => {
          Arc::clone(&self).check_all(SystemTime::now()).await;
        }
      }
    }
  }

  /// Kick off a health check for every camera. Checks run as independent
  /// tasks so one camera's recovery wait never delays the others.
  async fn check_all(self: Arc<Self>, now: SystemTime) {
    let entries: Vec<String> = {
      let cameras = self.cameras.read().await;
      cameras.keys().cloned().collect()
    };

    for name in entries {
      let manager = Arc::clone(&self);
      tokio::spawn(async move {
        if let Err(e) = manager.tick_camera(&name, now).await {
          error!(camera = %name, error = %e, "camera health check failed");
        }
      });
    }
  }

  /// One health observation for one camera at time `now`. Skips silently
  /// when a previous tick is still mid-recovery for this camera.
  pub async fn tick_camera(&self, name: &str, now: SystemTime) -> Result<()> {
    let entry = {
      let cameras = self.cameras.read().await;
      cameras
        .get(name)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("unknown camera {}", name))?
    };

    let Ok(mut state) = entry.state.try_lock() else {
      return Ok(());
    };

    let Some(last) = entry.handle.last_segment_time() else {
      warn!(camera = %name, "no recordings found yet");
      return Ok(());
    };

    let age = now.duration_since(last).unwrap_or(Duration::ZERO);
    let stale_threshold = Duration::from_secs(self.config.stale_threshold as u64);

    if age < stale_threshold {
      if state.failure_detected_at.is_some() {
        info!(camera = %name, age_secs = age.as_secs(), "camera recovered");
        self.alerter.notify(&format!(
          "\u{2705} *Camera Recovered*\nCamera: `{}`\nRecording resumed successfully",
          name
        ));
        state.clear();
      }
      return Ok(());
    }

    let Some(detected_at) = state.failure_detected_at else {
      state.failure_detected_at = Some(now);
      warn!(camera = %name, age_secs = age.as_secs(), "stale recording detected");
      return Ok(());
    };

    let dwell = now.duration_since(detected_at).unwrap_or(Duration::ZERO);
    let verification_delay = Duration::from_secs(self.config.verification_delay as u64);
    if dwell < verification_delay {
      info!(
        camera = %name,
        dwell_secs = dwell.as_secs(),
        delay_secs = verification_delay.as_secs(),
        "verifying failure is persistent"
      );
      return Ok(());
    }

    warn!(camera = %name, age_secs = age.as_secs(), "recording stale, starting recovery");
    self.recover(name, &entry.handle, &mut state, now).await
  }

  async fn recover(
    &self,
    name: &str,
    handle: &Arc<dyn CameraHandle>,
    state: &mut RecoveryState,
    now: SystemTime,
  ) -> Result<()> {
    let recent_cycles = state.recent_power_cycles(now, POWER_CYCLE_WINDOW);
    if recent_cycles >= self.config.max_power_cycles_per_30min as usize {
      self.alerter.notify(&format!(
        "\u{1f6a8} *CRITICAL: Max Recovery Attempts Reached*\nCamera: `{}`\nExceeded {} power cycles in 30 minutes\nManual intervention required",
        name, self.config.max_power_cycles_per_30min
      ));
      return Ok(());
    }

    if !state.has_attempted(RecoveryTier::PipelineRestart) {
      return self.restart_pipelines_tier(name, handle, state, now).await;
    }

    if !state.has_attempted(RecoveryTier::ServiceRestart) {
      return self.restart_service_tier(name, state, now).await;
    }

    if !state.has_attempted(RecoveryTier::PowerCycle) {
      return self.power_cycle_tier(name, state, now).await;
    }

    self.alerter.notify(&format!(
      "\u{1f480} *CRITICAL: All Recovery Attempts Failed*\nCamera: `{}`\nAll recovery methods exhausted\nImmediate attention required",
      name
    ));
    Ok(())
  }

  async fn restart_pipelines_tier(
    &self,
    name: &str,
    handle: &Arc<dyn CameraHandle>,
    state: &mut RecoveryState,
    now: SystemTime,
  ) -> Result<()> {
    info!(camera = %name, "recovery tier 1: restarting camera pipelines");
    self.alerter.notify(&format!(
      "\u{1f504} *Recovery Started*\nCamera: `{}`\nAction: Restarting recorder pipelines",
      name
    ));

    state.record(RecoveryTier::PipelineRestart, now);

    if let Err(e) = handle.restart_pipelines().await {
      // Silent escalation: the next tick moves on to tier 2.
      warn!(camera = %name, error = %e, "pipeline restart failed");
      return Ok(());
    }

    tokio::time::sleep(Duration::from_secs(self.config.service_restart_timeout as u64)).await;
    Ok(())
  }

  async fn restart_service_tier(
    &self,
    name: &str,
    state: &mut RecoveryState,
    now: SystemTime,
  ) -> Result<()> {
    info!(camera = %name, "recovery tier 2: restarting service");
    self.alerter.notify(&format!(
      "\u{1f504} *Escalating Recovery*\nCamera: `{}`\nAction: Restarting corenvr service",
      name
    ));

    state.record(RecoveryTier::ServiceRestart, now);

    if let Err(e) = self.service.restart_service().await {
      warn!(camera = %name, error = %e, "service restart failed");
    }
    Ok(())
  }

  async fn power_cycle_tier(
    &self,
    name: &str,
    state: &mut RecoveryState,
    now: SystemTime,
  ) -> Result<()> {
    info!(camera = %name, "recovery tier 3: power-cycling camera");
    self.alerter.notify(&format!(
      "\u{1f50c} *Power Cycle Initiated*\nCamera: `{}`\nAction: Cycling camera power via smart plug",
      name
    ));

    state.record(RecoveryTier::PowerCycle, now);

    if let Err(e) = self.plug.power_cycle().await {
      error!(camera = %name, error = %e, "power cycle failed");
      self.alerter.notify(&format!(
        "\u{274c} *Power Cycle Failed*\nCamera: `{}`\nError: {}",
        name, e
      ));
      return Err(e);
    }

    info!(
      camera = %name,
      wait_secs = self.config.power_cycle_recovery_timeout,
      "waiting for camera to come back"
    );
    tokio::time::sleep(Duration::from_secs(
      self.config.power_cycle_recovery_timeout as u64,
    ))
    .await;
    Ok(())
  }

  /// Snapshot of a camera's attempts, oldest first.
  pub async fn attempts(&self, name: &str) -> Vec<RecoveryAttempt> {
    let cameras = self.cameras.read().await;
    match cameras.get(name) {
      Some(entry) => entry.state.lock().await.attempts.clone(),
      None => Vec::new(),
    }
  }

  /// Seed an attempt record, e.g. when restoring state across restarts.
  pub async fn seed_attempt(&self, name: &str, tier: RecoveryTier, at: SystemTime) {
    let cameras = self.cameras.read().await;
    if let Some(entry) = cameras.get(name) {
      let mut state = entry.state.lock().await;
      state.attempts.push(RecoveryAttempt {
        at,
        tier,
        success: false,
      });
    }
  }

  /// Whether a failure episode is currently open for the camera.
  pub async fn failure_detected_at(&self, name: &str) -> Option<SystemTime> {
    let cameras = self.cameras.read().await;
    match cameras.get(name) {
      Some(entry) => entry.state.lock().await.failure_detected_at,
      None => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tiers_have_stable_names() {
    assert_eq!(RecoveryTier::PipelineRestart.as_str(), "pipeline_restart");
    assert_eq!(RecoveryTier::ServiceRestart.as_str(), "service_restart");
    assert_eq!(RecoveryTier::PowerCycle.as_str(), "power_cycle");
  }

  #[test]
  fn recent_power_cycles_respects_the_window() {
    let now = SystemTime::UNIX_EPOCH + Duration::from_secs(100_000);
    let mut state = RecoveryState::default();

    state.attempts.push(RecoveryAttempt {
      at: now - Duration::from_secs(29 * 60),
      tier: RecoveryTier::PowerCycle,
      success: false,
    });
    state.attempts.push(RecoveryAttempt {
      at: now - Duration::from_secs(31 * 60),
      tier: RecoveryTier::PowerCycle,
      success: false,
    });
    state.attempts.push(RecoveryAttempt {
      at: now - Duration::from_secs(60),
      tier: RecoveryTier::PipelineRestart,
      success: false,
    });

    assert_eq!(state.recent_power_cycles(now, POWER_CYCLE_WINDOW), 1);
  }

  #[test]
  fn clearing_state_ends_the_episode() {
    let now = SystemTime::UNIX_EPOCH + Duration::from_secs(100_000);
    let mut state = RecoveryState {
      failure_detected_at: Some(now),
      attempts: vec![RecoveryAttempt {
        at: now,
        tier: RecoveryTier::PipelineRestart,
        success: false,
      }],
    };

    state.clear();
    assert!(state.failure_detected_at.is_none());
    assert!(state.attempts.is_empty());
  }
}
