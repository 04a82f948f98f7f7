//! Relay-global session registry.
//!
//! The hub owns the id → session map and the grace-period reaper. Its lock
//! is independent of the per-session lock: lookups release the registry
//! lock before calling into a session, so the two never deadlock.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use tracing::{info, warn};

use crate::relay::session::{FrameSender, Session};

/// How long a disconnected producer may reconnect before its session is
/// removed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(60);

/// Registry of all active sessions.
pub struct Hub {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a session. Ids are freshly drawn random strings, so a collision
    /// indicates a caller bug; an existing entry is replaced with a warning.
    pub fn register(&self, session: Arc<Session>) {
        let id = session.id.clone();
        let owner = session.owner_sub.clone();
        if self.write().insert(id.clone(), session).is_some() {
            warn!(session = %id, "registered session replaced an existing id");
        }
        info!(session = %id, owner = %owner, "session registered");
    }

    /// Removes a session and closes it if it was present.
    pub fn unregister(&self, session_id: &str) {
        let removed = self.write().remove(session_id);
        if let Some(session) = removed {
            session.close();
            info!(session = %session_id, "session unregistered");
        }
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.read().get(session_id).cloned()
    }

    /// All sessions owned by the given identity, in no particular order.
    pub fn list_for_owner(&self, provider: &str, sub: &str) -> Vec<Arc<Session>> {
        self.read()
            .values()
            .filter(|s| s.owner_provider == provider && s.owner_sub == sub)
            .cloned()
            .collect()
    }

    /// Marks a session's producer as disconnected and schedules removal
    /// after the grace period unless the producer reconnects first.
    pub fn disconnect(self: &Arc<Self>, session_id: &str, grace_period: Duration) {
        let session = match self.get(session_id) {
            Some(s) => s,
            None => return,
        };

        session.mark_disconnected();
        info!(session = %session_id, grace = ?grace_period, "producer disconnected, grace period started");

        let hub = Arc::clone(self);
        let id = session_id.to_owned();
        tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            if session.is_disconnected() {
                hub.unregister(&id);
                info!(session = %id, "grace period expired, session removed");
            }
        });
    }

    /// Installs a new producer connection on a disconnected session.
    /// Returns false when the session is missing or still connected.
    pub fn reconnect(&self, session_id: &str, producer: FrameSender) -> bool {
        let session = match self.get(session_id) {
            Some(s) => s,
            None => return false,
        };
        if !session.is_disconnected() {
            return false;
        }
        session.replace_producer(producer);
        info!(session = %session_id, "producer reconnected");
        true
    }

    /// Closes every session and empties the registry. Used at shutdown.
    pub fn close_all(&self) {
        let sessions: Vec<Arc<Session>> = {
            let mut map = self.write();
            map.drain().map(|(_, s)| s).collect()
        };
        for session in sessions {
            session.close();
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Hello, SessionMode};
    use tokio::sync::mpsc;

    fn make_session(id: &str, provider: &str, sub: &str) -> (Arc<Session>, FrameSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        std::mem::forget(rx);
        let hello = Hello {
            token: String::new(),
            mode: SessionMode::Pty,
            cols: 80,
            rows: 24,
            command: "bash".into(),
            session_id: String::new(),
            reconnect_token: String::new(),
        };
        (
            Arc::new(Session::new(
                id.into(),
                provider.into(),
                sub.into(),
                tx.clone(),
                &hello,
            )),
            tx,
        )
    }

    #[test]
    fn register_get_unregister() {
        let hub = Hub::new();
        let (session, _tx) = make_session("s1", "dev", "alice");
        hub.register(session);

        assert!(hub.get("s1").is_some());
        hub.unregister("s1");
        assert!(hub.get("s1").is_none());
        // Unknown ids are a no-op.
        hub.unregister("s1");
    }

    #[test]
    fn unregister_closes_the_session() {
        let hub = Hub::new();
        let (session, _tx) = make_session("s1", "dev", "alice");
        hub.register(session.clone());
        hub.unregister("s1");
        assert!(session.is_closed());
    }

    #[test]
    fn list_for_owner_filters_by_identity_pair() {
        let hub = Hub::new();
        let (a, _t1) = make_session("a", "dev", "alice");
        let (b, _t2) = make_session("b", "dev", "alice");
        let (c, _t3) = make_session("c", "dev", "bob");
        let (d, _t4) = make_session("d", "google", "alice");
        for s in [a, b, c, d] {
            hub.register(s);
        }

        let mut ids: Vec<String> = hub
            .list_for_owner("dev", "alice")
            .iter()
            .map(|s| s.id.clone())
            .collect();
        ids.sort();
        assert_eq!(ids, ["a", "b"]);
        assert!(hub.list_for_owner("dev", "carol").is_empty());
    }

    #[tokio::test]
    async fn disconnect_reaps_after_grace_period() {
        let hub = Arc::new(Hub::new());
        let (session, _tx) = make_session("s1", "dev", "alice");
        hub.register(session);

        hub.disconnect("s1", Duration::from_millis(30));
        assert!(hub.get("s1").is_some(), "session survives the grace period");

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(hub.get("s1").is_none(), "session reaped after grace period");
    }

    #[tokio::test]
    async fn reconnect_within_grace_period_keeps_the_session() {
        let hub = Arc::new(Hub::new());
        let (session, _tx) = make_session("s1", "dev", "alice");
        hub.register(session.clone());

        hub.disconnect("s1", Duration::from_millis(40));
        let (new_tx, new_rx) = mpsc::unbounded_channel();
        std::mem::forget(new_rx);
        assert!(hub.reconnect("s1", new_tx));
        assert!(!session.is_disconnected());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(hub.get("s1").is_some(), "reaper must not remove a reconnected session");
    }

    #[tokio::test]
    async fn reconnect_rejects_connected_or_unknown_sessions() {
        let hub = Arc::new(Hub::new());
        let (session, _tx) = make_session("s1", "dev", "alice");
        hub.register(session);

        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(!hub.reconnect("s1", tx.clone()), "producer still connected");
        assert!(!hub.reconnect("missing", tx));
    }

    #[tokio::test]
    async fn duplicate_disconnects_are_harmless() {
        let hub = Arc::new(Hub::new());
        let (session, _tx) = make_session("s1", "dev", "alice");
        hub.register(session);

        hub.disconnect("s1", Duration::from_millis(30));
        hub.disconnect("s1", Duration::from_millis(30));

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert!(hub.get("s1").is_none());
    }

    #[test]
    fn close_all_empties_the_registry() {
        let hub = Hub::new();
        let (a, _t1) = make_session("a", "dev", "alice");
        let (b, _t2) = make_session("b", "dev", "bob");
        hub.register(a.clone());
        hub.register(b.clone());

        hub.close_all();

        assert!(hub.get("a").is_none());
        assert!(hub.get("b").is_none());
        assert!(a.is_closed());
        assert!(b.is_closed());
    }
}
