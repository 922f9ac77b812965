use reqwest::StatusCode;
use std::time::Duration;
use tracing::{info, warn};

/// Sink for operational alerts. Implementations must never block the
/// caller; dispatch happens on a detached task.
pub trait Alerter: Send + Sync {
  fn notify(&self, message: &str);
}

/// Posts alerts to a Slack incoming webhook. With no webhook configured the
/// alert is still logged, so recovery events remain visible in the journal.
pub struct SlackAlerter {
  webhook: Option<String>,
  client: reqwest::Client,
}

impl SlackAlerter {
  pub fn new(webhook: Option<String>) -> Self {
    let client = reqwest::Client::builder()
      .timeout(Duration::from_secs(10))
      .build()
      .expect("building http client");

    Self {
      webhook: webhook.filter(|w| !w.is_empty()),
      client,
    }
  }
}

impl Alerter for SlackAlerter {
  fn notify(&self, message: &str) {
    let Some(webhook) = self.webhook.clone() else {
      info!(message, "alert (no webhook configured)");
      return;
    };

    info!(message, "alert");

    let client = self.client.clone();
    let body = serde_json::json!({ "text": message });
    tokio::spawn(async move {
      match client.post(&webhook).json(&body).send().await {
        Ok(resp) if resp.status() == StatusCode::OK => {}
        Ok(resp) => warn!(status = %resp.status(), "slack webhook returned non-OK status"),
        Err(e) => warn!(error = %e, "failed to send slack alert"),
      }
    });
  }
}

#[cfg(test)]
pub mod testing {
  use super::Alerter;
  use std::sync::Mutex;

  /// Captures alerts for assertions.
  #[derive(Default)]
  pub struct CapturingAlerter {
    pub messages: Mutex<Vec<String>>,
  }

  impl Alerter for CapturingAlerter {
    fn notify(&self, message: &str) {
      self.messages.lock().unwrap().push(message.to_string());
    }
  }
}
