//! Relay core state: sessions, the session hub, and pending browser logins.

pub mod auth_sessions;
pub mod hub;
pub mod session;

pub use auth_sessions::{AuthSession, AuthSessionStore, LOGIN_TTL};
pub use hub::{Hub, DEFAULT_GRACE_PERIOD};
pub use session::{FrameSender, Outbound, Session, SessionError, MAX_VIEWERS};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::{Rng, RngCore};

/// Generates a random URL-safe identifier of the given length.
pub(crate) fn random_id(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Generates a 256-bit random secret, URL-safe base64 without padding.
pub(crate) fn random_secret() -> String {
    let mut buf = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_id_has_requested_length() {
        assert_eq!(random_id(12).len(), 12);
        assert_eq!(random_id(21).len(), 21);
    }

    #[test]
    fn random_id_is_url_safe() {
        let id = random_id(64);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn random_secret_is_nonempty_and_unique() {
        let a = random_secret();
        let b = random_secret();
        assert!(!a.is_empty());
        assert_ne!(a, b);
    }
}
