//! Server-side sessions. The cookie carries a random token; the user it
//! stands for lives here.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(8 * 60 * 60);

#[derive(Clone, Debug)]
struct Entry {
    user: String,
    expires_at: DateTime<Utc>,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

#[derive(Debug)]
pub struct SessionStore {
    ttl: Duration,
    sessions: RwLock<HashMap<String, Entry>>,
}

impl Default for SessionStore {
    fn default() -> Self {
        SessionStore::new(DEFAULT_SESSION_TTL)
    }
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        SessionStore {
            ttl,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Start a session for `user` and return its token.
    pub fn open(&self, user: &str) -> String {
        let token = uuid::Uuid::new_v4().simple().to_string();
        let expires_at = Utc::now() + chrono::Duration::from_std(self.ttl).unwrap_or_default();
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        sessions.retain(|_, entry| !entry.is_expired());
        sessions.insert(
            token.clone(),
            Entry {
                user: user.to_string(),
                expires_at,
            },
        );
        token
    }

    /// User behind a token. Unknown and expired tokens yield nothing.
    pub fn user(&self, token: &str) -> Option<String> {
        let entry = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned()?;
        if entry.is_expired() {
            self.close(token);
            return None;
        }
        Some(entry.user)
    }

    pub fn close(&self, token: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_map_back_to_their_user() {
        let store = SessionStore::default();
        let token = store.open("admin");
        assert_ne!(token, "admin");
        assert_eq!(store.user(&token).as_deref(), Some("admin"));
    }

    #[test]
    fn user_names_are_not_tokens() {
        let store = SessionStore::default();
        store.open("admin");
        assert_eq!(store.user("admin"), None);
    }

    #[test]
    fn closed_sessions_are_gone() {
        let store = SessionStore::default();
        let token = store.open("bob");
        assert!(store.close(&token));
        assert_eq!(store.user(&token), None);
        assert!(!store.close(&token));
    }

    #[test]
    fn expired_sessions_are_dropped() {
        let store = SessionStore::new(Duration::ZERO);
        let token = store.open("bob");
        assert_eq!(store.user(&token), None);
        assert!(store.is_empty());
    }

    #[test]
    fn each_sign_in_gets_a_fresh_token() {
        let store = SessionStore::default();
        assert_ne!(store.open("bob"), store.open("bob"));
        assert_eq!(store.len(), 2);
    }
}
