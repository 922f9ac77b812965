//! Smart-plug adapter for camera power control.
//!
//! Delegates to the tinytuya helper through a short-lived python3 process;
//! the adapter contract (on/off/status/cycle) hides the vendor protocol.
//! All operations are serialized through one mutex so a power cycle cannot
//! interleave with a manual on/off.

use anyhow::{bail, Context, Result};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::SmartPlugConfig;

pub struct SmartPlug {
  config: SmartPlugConfig,
  lock: Mutex<()>,
}

impl SmartPlug {
  pub fn new(config: SmartPlugConfig) -> Result<Self> {
    // The helper needs python3; surface that at startup, not mid-recovery.
    let probe = std::process::Command::new("python3")
      .arg("--version")
      .output();
    if probe.is_err() {
      bail!("python3 not found, smart plug helper unavailable");
    }

    info!(ip = %config.ip, "smart plug configured (tinytuya helper)");
    Ok(Self {
      config,
      lock: Mutex::new(()),
    })
  }

  pub async fn turn_on(&self) -> Result<()> {
    let _guard = self.lock.lock().await;
    info!("turning smart plug on");
    self.run_helper(&set_state_script(&self.config, true)).await?;
    Ok(())
  }

  pub async fn turn_off(&self) -> Result<()> {
    let _guard = self.lock.lock().await;
    info!("turning smart plug off");
    self.run_helper(&set_state_script(&self.config, false)).await?;
    Ok(())
  }

  /// True when the plug answers a status query at all.
  pub async fn get_status(&self) -> Result<bool> {
    let _guard = self.lock.lock().await;
    let output = self.run_helper(&status_script(&self.config)).await?;
    Ok(!output.trim().is_empty())
  }

  /// Off, hold for `power_off_duration`, on again. The lock is held for
  /// the whole cycle.
  pub async fn power_cycle(&self) -> Result<()> {
    let _guard = self.lock.lock().await;
    info!(
      off_secs = self.config.power_off_duration,
      "power-cycling camera smart plug"
    );

    self
      .run_helper(&set_state_script(&self.config, false))
      .await
      .context("turning plug off")?;

    tokio::time::sleep(Duration::from_secs(self.config.power_off_duration as u64)).await;

    self
      .run_helper(&set_state_script(&self.config, true))
      .await
      .context("turning plug back on")?;

    info!("smart plug power cycle complete");
    Ok(())
  }

  async fn run_helper(&self, script: &str) -> Result<String> {
    let output = Command::new("python3")
      .arg("-c")
      .arg(script)
      .output()
      .await
      .context("running smart plug helper")?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      warn!(status = %output.status, stderr = %stderr, "smart plug helper failed");
      bail!("smart plug helper exited with {}: {}", output.status, stderr.trim());
    }

    Ok(stdout)
  }
}

fn device_ctor(config: &SmartPlugConfig) -> String {
  format!(
    "plug = tinytuya.OutletDevice(dev_id=\"{}\", address=\"{}\", local_key=\"{}\", version={})",
    config.device_id, config.ip, config.local_key, config.version
  )
}

fn set_state_script(config: &SmartPlugConfig, on: bool) -> String {
  let call = if on { "plug.turn_on()" } else { "plug.turn_off()" };
  format!("import tinytuya\n{}\n{}\n", device_ctor(config), call)
}

fn status_script(config: &SmartPlugConfig) -> String {
  format!(
    "import tinytuya\nimport json\n{}\nprint(json.dumps(plug.status()))\n",
    device_ctor(config)
  )
}
