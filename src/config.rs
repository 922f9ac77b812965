use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete configuration, loaded from a single YAML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
  pub storage: StorageConfig,
  #[serde(default)]
  pub cameras: Vec<CameraConfig>,
  #[serde(default)]
  pub system: SystemConfig,
  #[serde(default)]
  pub webui: WebUiConfig,
  #[serde(default)]
  pub notifications: NotificationsConfig,
  #[serde(default)]
  pub recovery: RecoveryConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
  #[serde(default)]
  pub base_path: PathBuf,
  /// Archive segment length in seconds. Must be at least 60.
  #[serde(default = "default_segment_duration")]
  pub segment_duration: u32,
  /// Days of footage to keep. 0 disables age-based cleanup.
  #[serde(default)]
  pub retention_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub url: String,
  #[serde(default)]
  pub enabled: bool,
  /// Seconds to wait between pipeline respawns.
  #[serde(default = "default_retry_delay")]
  pub retry_delay: u32,
  /// Negative means retry forever.
  #[serde(default = "default_max_retries")]
  pub max_retries: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemConfig {
  #[serde(default)]
  pub log_level: String,
  #[serde(default)]
  pub log_file: Option<PathBuf>,
  /// Seconds between lightweight health log passes. 0 disables them.
  #[serde(default)]
  pub health_check_interval: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebUiConfig {
  #[serde(default)]
  pub enabled: bool,
  #[serde(default = "default_webui_port")]
  pub port: u16,
  #[serde(default)]
  pub authentication: AuthConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
  #[serde(default)]
  pub enabled: bool,
  #[serde(default)]
  pub username: String,
  /// PHC-format argon2 hash of the password.
  #[serde(default)]
  pub password_hash: String,
  /// Session lifetime in minutes.
  #[serde(default = "default_session_timeout")]
  pub session_timeout: u32,
  #[serde(default)]
  pub secret_key: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationsConfig {
  #[serde(default)]
  pub enabled: bool,
  #[serde(default)]
  pub r#type: String,
  #[serde(default)]
  pub telegram_bot_token: String,
  #[serde(default)]
  pub telegram_chat_id: String,
  #[serde(default)]
  pub gotify_url: String,
  #[serde(default)]
  pub gotify_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
  #[serde(default)]
  pub enabled: bool,
  /// Seconds without a fresh segment before a camera counts as stale.
  #[serde(default = "default_stale_threshold")]
  pub stale_threshold: u32,
  /// Seconds a stale observation must persist before recovery starts.
  #[serde(default = "default_verification_delay")]
  pub verification_delay: u32,
  #[serde(default = "default_health_check_interval")]
  pub health_check_interval: u32,
  #[serde(default = "default_max_power_cycles")]
  pub max_power_cycles_per_30min: u32,
  /// Seconds to wait after a pipeline restart before re-judging health.
  #[serde(default = "default_service_restart_timeout")]
  pub service_restart_timeout: u32,
  /// Seconds to wait after a power cycle before re-judging health.
  #[serde(default = "default_power_cycle_recovery_timeout")]
  pub power_cycle_recovery_timeout: u32,
  #[serde(default)]
  pub slack_webhook: String,
  #[serde(default)]
  pub smartplug: SmartPlugConfig,
}

impl Default for RecoveryConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      stale_threshold: default_stale_threshold(),
      verification_delay: default_verification_delay(),
      health_check_interval: default_health_check_interval(),
      max_power_cycles_per_30min: default_max_power_cycles(),
      service_restart_timeout: default_service_restart_timeout(),
      power_cycle_recovery_timeout: default_power_cycle_recovery_timeout(),
      slack_webhook: String::new(),
      smartplug: SmartPlugConfig::default(),
    }
  }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SmartPlugConfig {
  #[serde(default)]
  pub device_id: String,
  #[serde(default)]
  pub ip: String,
  #[serde(default)]
  pub local_key: String,
  /// Tuya protocol version, e.g. "3.3".
  #[serde(default = "default_plug_version")]
  pub version: String,
  /// Seconds to keep the plug off during a power cycle.
  #[serde(default = "default_power_off_duration")]
  pub power_off_duration: u32,
}

fn default_segment_duration() -> u32 {
  1800
}

fn default_retry_delay() -> u32 {
  10
}

fn default_max_retries() -> i32 {
  -1
}

fn default_webui_port() -> u16 {
  8080
}

fn default_session_timeout() -> u32 {
  60
}

fn default_stale_threshold() -> u32 {
  600
}

fn default_verification_delay() -> u32 {
  120
}

fn default_health_check_interval() -> u32 {
  60
}

fn default_max_power_cycles() -> u32 {
  2
}

fn default_service_restart_timeout() -> u32 {
  30
}

fn default_power_cycle_recovery_timeout() -> u32 {
  60
}

fn default_plug_version() -> String {
  "3.3".to_string()
}

fn default_power_off_duration() -> u32 {
  10
}

impl Config {
  /// Read and validate the configuration file.
  pub fn load(path: &Path) -> Result<Self> {
    let data = std::fs::read_to_string(path)
      .with_context(|| format!("reading config file {}", path.display()))?;
    let cfg: Config = serde_yaml::from_str(&data).context("parsing config")?;
    cfg.validate().context("invalid config")?;
    Ok(cfg)
  }

  pub fn validate(&self) -> Result<()> {
    if self.storage.base_path.as_os_str().is_empty() {
      bail!("storage.base_path is required");
    }

    if self.storage.segment_duration < 60 {
      bail!("storage.segment_duration must be at least 60 seconds");
    }

    let mut enabled_cameras = 0;
    for cam in &self.cameras {
      if cam.enabled {
        enabled_cameras += 1;
        if cam.url.is_empty() {
          bail!("camera {}: url is required", cam.name);
        }
      }
    }

    if enabled_cameras == 0 {
      bail!("at least one camera must be enabled");
    }

    Ok(())
  }

  pub fn enabled_cameras(&self) -> impl Iterator<Item = &CameraConfig> {
    self.cameras.iter().filter(|c| c.enabled)
  }
}
