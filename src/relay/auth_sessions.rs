//! Pending browser-login store.
//!
//! A pending login is created when a CLI starts the browser auth flow, is
//! completed by the OIDC callback with an ID token, and is consumed exactly
//! once by the poll endpoint. Entries expire after [`LOGIN_TTL`]; a
//! background sweeper removes anything the read path has not already
//! evicted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::relay::random_id;

/// How long a pending login stays redeemable.
pub const LOGIN_TTL: Duration = Duration::from_secs(5 * 60);

/// How often the sweeper scans for expired entries.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

const LOGIN_ID_LEN: usize = 21;

/// A pending browser-based login.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub id: String,
    pub provider: String,
    pub code_verifier: String,
    pub created_at: DateTime<Utc>,
    /// Populated when the provider callback completes.
    pub id_token: String,
}

/// In-memory store of pending logins with TTL.
pub struct AuthSessionStore {
    sessions: Mutex<HashMap<String, AuthSession>>,
    ttl: chrono::Duration,
    stop: CancellationToken,
}

impl AuthSessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::seconds(300)),
            stop: CancellationToken::new(),
        }
    }

    /// Starts a new pending login and returns a copy of it.
    pub async fn create(&self, provider: &str, code_verifier: &str) -> AuthSession {
        let session = AuthSession {
            id: random_id(LOGIN_ID_LEN),
            provider: provider.to_owned(),
            code_verifier: code_verifier.to_owned(),
            created_at: Utc::now(),
            id_token: String::new(),
        };
        let mut sessions = self.sessions.lock().await;
        sessions.insert(session.id.clone(), session.clone());
        session
    }

    /// Returns a copy of a live pending login. Expired entries are deleted
    /// and reported as absent.
    pub async fn get(&self, id: &str) -> Option<AuthSession> {
        let mut sessions = self.sessions.lock().await;
        let expired = match sessions.get(id) {
            Some(session) => Utc::now() - session.created_at > self.ttl,
            None => return None,
        };
        if expired {
            sessions.remove(id);
            return None;
        }
        sessions.get(id).cloned()
    }

    /// Records the ID token obtained by the callback. No-op for unknown ids.
    pub async fn complete(&self, id: &str, id_token: &str) {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.get_mut(id) {
            session.id_token = id_token.to_owned();
        }
    }

    /// Returns the ID token and deletes the entry. Present only when the
    /// entry exists and has been completed; a second call returns `None`.
    pub async fn consume(&self, id: &str) -> Option<String> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(id) {
            Some(session) if !session.id_token.is_empty() => {
                sessions.remove(id).map(|s| s.id_token)
            }
            _ => None,
        }
    }

    /// Removes every entry older than the TTL.
    async fn sweep_expired(&self) {
        let mut sessions = self.sessions.lock().await;
        let now = Utc::now();
        let before = sessions.len();
        sessions.retain(|_, session| now - session.created_at <= self.ttl);
        let removed = before - sessions.len();
        if removed > 0 {
            debug!(removed, "swept expired pending logins");
        }
    }

    /// Spawns the background sweeper. Runs until [`stop`](Self::stop).
    pub fn spawn_sweeper(self: &Arc<Self>) {
        let store = Arc::clone(self);
        let stop = self.stop.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => store.sweep_expired().await,
                    _ = stop.cancelled() => break,
                }
            }
        });
    }

    /// Shuts down the sweeper.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_then_get_returns_the_entry() {
        let store = AuthSessionStore::new(LOGIN_TTL);
        let created = store.create("google", "verifier-123").await;
        assert_eq!(created.id.len(), LOGIN_ID_LEN);

        let fetched = store.get(&created.id).await.unwrap();
        assert_eq!(fetched.provider, "google");
        assert_eq!(fetched.code_verifier, "verifier-123");
        assert!(fetched.id_token.is_empty());
    }

    #[tokio::test]
    async fn get_unknown_id_is_none() {
        let store = AuthSessionStore::new(LOGIN_TTL);
        assert!(store.get("missing").await.is_none());
    }

    #[tokio::test]
    async fn expired_entries_are_evicted_on_read() {
        let store = AuthSessionStore::new(Duration::from_millis(20));
        let created = store.create("google", "v").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.get(&created.id).await.is_none());
        // The read path already removed it.
        assert!(store.sessions.lock().await.is_empty());
    }

    #[tokio::test]
    async fn consume_is_single_use_and_requires_completion() {
        let store = AuthSessionStore::new(LOGIN_TTL);
        let created = store.create("google", "v").await;

        // Not completed yet: nothing to consume, entry survives.
        assert!(store.consume(&created.id).await.is_none());
        assert!(store.get(&created.id).await.is_some());

        store.complete(&created.id, "id-token-value").await;
        assert_eq!(
            store.consume(&created.id).await.as_deref(),
            Some("id-token-value")
        );
        assert!(store.consume(&created.id).await.is_none());
        assert!(store.get(&created.id).await.is_none());
    }

    #[tokio::test]
    async fn complete_unknown_id_is_a_noop() {
        let store = AuthSessionStore::new(LOGIN_TTL);
        store.complete("missing", "token").await;
        assert!(store.consume("missing").await.is_none());
    }

    #[tokio::test]
    async fn sweep_removes_only_expired_entries() {
        let store = AuthSessionStore::new(Duration::from_millis(30));
        let old = store.create("google", "v").await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        let fresh = store.create("google", "v").await;

        store.sweep_expired().await;

        let sessions = store.sessions.lock().await;
        assert!(!sessions.contains_key(&old.id));
        assert!(sessions.contains_key(&fresh.id));
    }
}
