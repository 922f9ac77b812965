//! Session authentication for the HTTP facade.
//!
//! Single configured user, argon2 password verification, random session
//! ids held in a server-side map with sliding expiry and a periodic sweep.

use argon2::{
  password_hash::{rand_core::OsRng as HashOsRng, PasswordHash, PasswordHasher, SaltString},
  Argon2, PasswordVerifier,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const SESSION_COOKIE: &str = "session_id";
const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Hash a password into PHC format. Startup tooling and tests use this;
/// the daemon itself only verifies.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
  let salt = SaltString::generate(&mut HashOsRng);
  let hash = Argon2::default()
    .hash_password(password.as_bytes(), &salt)
    .map_err(|e| anyhow::anyhow!("hashing password: {}", e))?;
  Ok(hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
  let Ok(parsed) = PasswordHash::new(password_hash) else {
    return false;
  };
  Argon2::default()
    .verify_password(password.as_bytes(), &parsed)
    .is_ok()
}

#[derive(Debug, Clone)]
struct Session {
  #[allow(dead_code)]
  username: String,
  expires_at: SystemTime,
}

pub struct SessionManager {
  username: String,
  password_hash: String,
  timeout: Duration,
  sessions: RwLock<HashMap<String, Session>>,
}

impl SessionManager {
  pub fn new(username: String, password_hash: String, timeout_minutes: u32) -> Self {
    let timeout_minutes = if timeout_minutes == 0 { 60 } else { timeout_minutes };
    Self {
      username,
      password_hash,
      timeout: Duration::from_secs(timeout_minutes as u64 * 60),
      sessions: RwLock::new(HashMap::new()),
    }
  }

  pub fn authenticate(&self, username: &str, password: &str) -> bool {
    username == self.username && verify_password(password, &self.password_hash)
  }

  pub async fn create_session(&self, username: &str) -> String {
    let id = generate_session_id();
    let session = Session {
      username: username.to_string(),
      expires_at: SystemTime::now() + self.timeout,
    };
    self.sessions.write().await.insert(id.clone(), session);
    id
  }

  pub async fn validate_session(&self, id: &str) -> bool {
    self.validate_session_at(id, SystemTime::now()).await
  }

  pub async fn validate_session_at(&self, id: &str, now: SystemTime) -> bool {
    let sessions = self.sessions.read().await;
    sessions
      .get(id)
      .map(|s| now < s.expires_at)
      .unwrap_or(false)
  }

  /// Sliding expiry: every authenticated request pushes the deadline out.
  pub async fn refresh_session(&self, id: &str) {
    let mut sessions = self.sessions.write().await;
    if let Some(session) = sessions.get_mut(id) {
      session.expires_at = SystemTime::now() + self.timeout;
    }
  }

  pub async fn destroy_session(&self, id: &str) {
    self.sessions.write().await.remove(id);
  }

  pub async fn sweep_expired_at(&self, now: SystemTime) -> usize {
    let mut sessions = self.sessions.write().await;
    let before = sessions.len();
    sessions.retain(|_, s| now < s.expires_at);
    before - sessions.len()
  }

  /// Evict expired sessions every few minutes until cancelled.
  pub async fn run_sweeper(self: Arc<Self>, token: CancellationToken) {
    loop {
      tokio::select! {
        _ = token.cancelled() => return,
        _ = tokio::time::sleep(SWEEP_INTERVAL) => {
          let evicted = self.sweep_expired_at(SystemTime::now()).await;
          if evicted > 0 {
            info!(evicted, "swept expired sessions");
          }
        }
      }
    }
  }
}

fn generate_session_id() -> String {
  let mut bytes = [0u8; 32];
  rand::rngs::OsRng.fill_bytes(&mut bytes);
  URL_SAFE_NO_PAD.encode(bytes)
}

/// Pull the session id out of a Cookie header value.
pub fn session_id_from_cookies(cookie_header: &str) -> Option<String> {
  cookie_header
    .split(';')
    .filter_map(|pair| pair.trim().split_once('='))
    .find(|(name, _)| *name == SESSION_COOKIE)
    .map(|(_, value)| value.to_string())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn verifies_only_the_matching_password() {
    let hash = hash_password("hunter2").unwrap();
    assert!(verify_password("hunter2", &hash));
    assert!(!verify_password("hunter3", &hash));
    assert!(!verify_password("hunter2", "not-a-phc-hash"));
  }

  #[tokio::test]
  async fn session_lifecycle() {
    let hash = hash_password("pw").unwrap();
    let manager = SessionManager::new("admin".to_string(), hash, 60);

    assert!(manager.authenticate("admin", "pw"));
    assert!(!manager.authenticate("admin", "wrong"));
    assert!(!manager.authenticate("intruder", "pw"));

    let id = manager.create_session("admin").await;
    assert!(manager.validate_session(&id).await);

    manager.destroy_session(&id).await;
    assert!(!manager.validate_session(&id).await);
  }

  #[tokio::test]
  async fn sessions_expire_and_get_swept() {
    let hash = hash_password("pw").unwrap();
    let manager = SessionManager::new("admin".to_string(), hash, 1);

    let id = manager.create_session("admin").await;
    let past_expiry = SystemTime::now() + Duration::from_secs(61);

    assert!(!manager.validate_session_at(&id, past_expiry).await);
    assert_eq!(manager.sweep_expired_at(past_expiry).await, 1);
    assert!(!manager.validate_session(&id).await);
  }

  #[test]
  fn session_ids_are_unique_and_urlsafe() {
    let a = generate_session_id();
    let b = generate_session_id();
    assert_ne!(a, b);
    assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
  }

  #[test]
  fn cookie_parsing_finds_the_session_id() {
    assert_eq!(
      session_id_from_cookies("theme=dark; session_id=abc123; other=1"),
      Some("abc123".to_string())
    );
    assert_eq!(session_id_from_cookies("theme=dark"), None);
    assert_eq!(session_id_from_cookies(""), None);
  }
}
