//! Cache-backed sessions.
//!
//! A [`Session`] is the serialized state one browser holds against the
//! relying party: the current token bundle, the resolved user claims, a
//! pending PKCE context while a login round-trip is in flight, and the URL
//! to return to afterwards. Sessions live under `sess:{id}` with a 24 h
//! TTL and are validated as closed structs when loaded back.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::key::layout;
use crate::cache::CacheStore;
use crate::oauth::pkce::PkceContext;
use crate::oauth::types::{TokenBundle, UserInfo};

/// Per-browser session state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Opaque session identifier, also the cache key suffix.
    pub id: String,

    /// Tokens for the authenticated principal, when logged in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<TokenBundle>,

    /// Userinfo claims resolved at login.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<UserInfo>,

    /// Pending PKCE parameters while an authorization round-trip is open.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pkce: Option<PkceContext>,

    /// Where to send the browser once login completes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_to: Option<String>,
}

impl Session {
    /// Create an empty session with a fresh identifier.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tokens: None,
            user: None,
            pkce: None,
            return_to: None,
        }
    }

    /// Subject of the authenticated principal, when known.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.user.as_ref().map(|user| user.sub.as_str())
    }

    /// Drop everything that marks this session authenticated, keeping the
    /// identifier so the browser's cookie stays valid for a fresh login.
    pub fn clear_authentication(&mut self) {
        self.tokens = None;
        self.user = None;
        self.pkce = None;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Persistence for [`Session`] records on top of [`CacheStore`].
#[derive(Debug, Clone)]
pub struct SessionStore {
    cache: Arc<CacheStore>,
}

impl SessionStore {
    #[must_use]
    pub fn new(cache: Arc<CacheStore>) -> Self {
        Self { cache }
    }

    /// Load a session by id. Corrupt or missing entries both come back as
    /// `None`; a session that fails validation is not trusted.
    pub async fn load(&self, session_id: &str) -> Option<Session> {
        let raw = self.cache.get(&layout::session(session_id)).await?;
        match serde_json::from_str::<Session>(&raw) {
            Ok(session) => Some(session),
            Err(err) => {
                warn!(session_id, error = %err, "discarding undecodable session");
                None
            }
        }
    }

    /// Persist a session under its id with the configured TTL. Failures are
    /// absorbed by the cache layer; the in-memory session stays usable for
    /// the rest of the request either way.
    pub async fn save(&self, session: &Session) {
        match serde_json::to_string(session) {
            Ok(json) => {
                let ttl = self.cache.session_ttl();
                self.cache.set(&layout::session(&session.id), &json, Some(ttl)).await;
                debug!(session_id = %session.id, "session saved");
            }
            Err(err) => {
                warn!(session_id = %session.id, error = %err, "failed to serialize session");
            }
        }
    }

    /// Delete a session record.
    pub async fn destroy(&self, session_id: &str) {
        self.cache.delete(&layout::session(session_id)).await;
        debug!(session_id, "session destroyed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;

    fn store() -> SessionStore {
        let cache = CacheStore::detached(CacheConfig::new("redis://unused", "test"));
        SessionStore::new(Arc::new(cache))
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let sessions = store();
        let mut session = Session::new();
        session.return_to = Some("/dashboard".into());
        session.pkce = Some(PkceContext::generate(None));

        sessions.save(&session).await;
        let loaded = sessions.load(&session.id).await.unwrap();
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn destroy_removes_session() {
        let sessions = store();
        let session = Session::new();
        sessions.save(&session).await;
        sessions.destroy(&session.id).await;
        assert!(sessions.load(&session.id).await.is_none());
    }

    #[tokio::test]
    async fn load_missing_session_is_none() {
        let sessions = store();
        assert!(sessions.load("nope").await.is_none());
    }

    #[test]
    fn clear_authentication_keeps_identifier() {
        let mut session = Session::new();
        let id = session.id.clone();
        session.user = Some(UserInfo {
            sub: "user-1".into(),
            name: None,
            email: None,
            preferred_username: None,
            extra: serde_json::Map::new(),
        });
        session.clear_authentication();
        assert_eq!(session.id, id);
        assert!(session.user.is_none());
        assert!(session.tokens.is_none());
    }
}
