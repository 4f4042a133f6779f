//! Token persistence and the refresh-token revocation blacklist.
//!
//! Bundles live under `token:{userId}` with a TTL matching the access
//! token's lifetime; revoked refresh tokens are remembered by SHA-256
//! digest under `blacklist:{hash}` for the refresh-token lifetime envelope,
//! so live secrets never sit in the cache verbatim.
//!
//! Writes are side effects only: a failed write is logged and swallowed so
//! the caller proceeds with the live bundle it already holds in memory.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::cache::key::layout;
use crate::cache::CacheStore;
use crate::oauth::types::TokenBundle;

/// TTL applied when the bundle reports no expiry.
const DEFAULT_TOKEN_TTL_SECS: u64 = 3600;

/// Blacklist entries outlive any refresh token: 30 days.
const BLACKLIST_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Cache-backed store for per-user token bundles and the revocation
/// blacklist.
#[derive(Debug, Clone)]
pub struct TokenVault {
    cache: Arc<CacheStore>,
    fail_closed: bool,
}

impl TokenVault {
    /// Create a vault over the given cache. `fail_closed` selects the
    /// blacklist policy when the cache cannot be read: `false` treats the
    /// token as not blacklisted (availability wins), `true` treats it as
    /// blacklisted (revocation correctness wins).
    #[must_use]
    pub fn new(cache: Arc<CacheStore>, fail_closed: bool) -> Self {
        Self { cache, fail_closed }
    }

    /// Persist a bundle for a user with TTL = `expires_in` (1 h default).
    pub async fn store_token(&self, user_id: &str, bundle: &TokenBundle) {
        let ttl = bundle
            .expires_in
            .filter(|&secs| secs > 0)
            .map_or(DEFAULT_TOKEN_TTL_SECS, |secs| secs as u64);

        match serde_json::to_string(bundle) {
            Ok(json) => {
                self.cache
                    .set(&layout::token(user_id), &json, Some(Duration::from_secs(ttl)))
                    .await;
                debug!(user_id, ttl, "stored token bundle");
            }
            Err(err) => warn!(user_id, error = %err, "failed to serialize token bundle"),
        }
    }

    /// Load the bundle for a user. Corrupt entries are discarded — cache
    /// contents are never trusted blindly.
    pub async fn get_token(&self, user_id: &str) -> Option<TokenBundle> {
        let raw = self.cache.get(&layout::token(user_id)).await?;
        match serde_json::from_str::<TokenBundle>(&raw) {
            Ok(bundle) => Some(bundle),
            Err(err) => {
                warn!(user_id, error = %err, "discarding undecodable token bundle");
                None
            }
        }
    }

    /// Remove the stored bundle for a user.
    pub async fn invalidate_token(&self, user_id: &str) {
        self.cache.delete(&layout::token(user_id)).await;
        debug!(user_id, "invalidated token bundle");
    }

    /// Record a refresh token as revoked for the 30-day envelope.
    pub async fn blacklist_token(&self, refresh_token: &str) {
        let key = layout::blacklist(&digest(refresh_token));
        self.cache.set(&key, "revoked", Some(BLACKLIST_TTL)).await;
        debug!("refresh token blacklisted");
    }

    /// Whether a refresh token has been revoked.
    ///
    /// A blacklisted token must never reach the identity provider, even if
    /// it would still be accepted there. When the cache read itself fails,
    /// the configured policy decides the answer (fail-open by default).
    pub async fn is_blacklisted(&self, refresh_token: &str) -> bool {
        let key = layout::blacklist(&digest(refresh_token));
        match self.cache.try_get(&key).await {
            Ok(entry) => entry.is_some(),
            Err(err) => {
                warn!(
                    error = %err,
                    fail_closed = self.fail_closed,
                    "blacklist check degraded by cache failure"
                );
                self.fail_closed
            }
        }
    }
}

fn digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::oauth::types::TokenResponse;

    fn vault() -> TokenVault {
        let cache = CacheStore::detached(CacheConfig::new("redis://unused", "test"));
        TokenVault::new(Arc::new(cache), false)
    }

    fn bundle(expires_in: Option<i64>) -> TokenBundle {
        TokenBundle::from(TokenResponse {
            access_token: "access-token".into(),
            refresh_token: Some("refresh-token".into()),
            id_token: Some("id-token".into()),
            token_type: "Bearer".into(),
            expires_in,
            scope: Some("openid offline".into()),
        })
    }

    #[tokio::test]
    async fn store_and_get_roundtrip_is_exact() {
        let vault = vault();
        let stored = bundle(Some(3600));

        vault.store_token("user-1", &stored).await;
        let loaded = vault.get_token("user-1").await.unwrap();
        assert_eq!(loaded, stored);
    }

    #[tokio::test]
    async fn invalidate_removes_bundle() {
        let vault = vault();
        vault.store_token("user-1", &bundle(Some(3600))).await;
        vault.invalidate_token("user-1").await;
        assert!(vault.get_token("user-1").await.is_none());
    }

    #[tokio::test]
    async fn blacklist_is_visible_immediately() {
        let vault = vault();
        assert!(!vault.is_blacklisted("rt-1").await);

        vault.blacklist_token("rt-1").await;
        assert!(vault.is_blacklisted("rt-1").await);
        // Unrelated tokens stay clean.
        assert!(!vault.is_blacklisted("rt-2").await);
    }

    #[tokio::test]
    async fn raw_refresh_token_never_stored_verbatim() {
        let cache = Arc::new(CacheStore::detached(CacheConfig::new("redis://unused", "test")));
        let vault = TokenVault::new(Arc::clone(&cache), false);

        vault.blacklist_token("super-secret-refresh").await;
        let hashed_key = layout::blacklist(&digest("super-secret-refresh"));
        assert!(cache.get(&hashed_key).await.is_some());
        assert!(cache.get(&layout::blacklist("super-secret-refresh")).await.is_none());
    }

    #[tokio::test]
    async fn corrupt_cache_entry_is_discarded() {
        let cache = Arc::new(CacheStore::detached(CacheConfig::new("redis://unused", "test")));
        let vault = TokenVault::new(Arc::clone(&cache), false);

        cache.set(&layout::token("user-1"), "{not json", None).await;
        assert!(vault.get_token("user-1").await.is_none());
    }
}
