//! Per-request token lifecycle management.
//!
//! A [`ServiceProvider`] is attached to one inbound request: it loads the
//! stored bundle (session first, vault as backstop), refreshes near-expiry
//! tokens before they are used, rebinds the dependent API clients in the
//! same operation that stores the refreshed bundle, and tears the whole
//! authentication state down when a refresh is rejected. Domain clients are
//! constructed lazily, on first use after a validated token is available.
//!
//! Lock ordering inside the provider is session → tokens → services; every
//! path acquires in that order.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::cache::CacheStore;
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::oauth::client::OidcClient;
use crate::oauth::flow::id_token_subject;
use crate::oauth::types::{TokenBundle, UserInfo};
use crate::services::{BlogService, UserService};
use crate::session::{Session, SessionStore};
use crate::vault::TokenVault;

/// Process-wide single-flight guard: at most one in-flight refresh per
/// user. The second caller awaits the winner and then adopts the refreshed
/// bundle from the vault instead of issuing a duplicate grant.
#[derive(Debug, Default)]
pub struct RefreshGate {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RefreshGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks.entry(key.to_string()).or_default().clone()
    }

    fn release(&self, key: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        // Drop the entry only when nobody else holds it; a racing waiter
        // keeps the mutex alive and the entry with it.
        self.locks.remove_if(key, |_, entry| Arc::strong_count(entry) == 1);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Request-scoped token lifecycle manager and service accessor.
pub struct ServiceProvider {
    config: Arc<AuthConfig>,
    oauth: Arc<OidcClient>,
    cache: Arc<CacheStore>,
    vault: Arc<TokenVault>,
    sessions: SessionStore,
    gate: Arc<RefreshGate>,
    session: RwLock<Session>,
    tokens: RwLock<Option<TokenBundle>>,
    user: RwLock<Option<UserInfo>>,
    blog: RwLock<Option<BlogService>>,
    users: RwLock<Option<UserService>>,
}

impl ServiceProvider {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn attach(
        config: Arc<AuthConfig>,
        oauth: Arc<OidcClient>,
        cache: Arc<CacheStore>,
        vault: Arc<TokenVault>,
        sessions: SessionStore,
        gate: Arc<RefreshGate>,
        session: Session,
    ) -> Self {
        Self {
            config,
            oauth,
            cache,
            vault,
            sessions,
            gate,
            session: RwLock::new(session),
            tokens: RwLock::new(None),
            user: RwLock::new(None),
            blog: RwLock::new(None),
            users: RwLock::new(None),
        }
    }

    /// Reconcile session and vault into the active context, then refresh if
    /// the bundle is already near expiry. A failed refresh leaves the
    /// provider unauthenticated rather than erroring the request.
    pub(crate) async fn load(&self) {
        {
            let mut session = self.session.write().await;

            // Vault backstop: a session that lost its bundle but still
            // knows its principal gets the bundle written back.
            if session.tokens.is_none() {
                if let Some(sub) = session.subject().map(str::to_string) {
                    if let Some(bundle) = self.vault.get_token(&sub).await {
                        debug!(user_id = %sub, "restored token bundle from vault");
                        session.tokens = Some(bundle);
                        self.sessions.save(&session).await;
                    }
                }
            }

            *self.tokens.write().await = session.tokens.clone();
            *self.user.write().await = session.user.clone();
        }

        if self.needs_refresh().await {
            if let Err(err) = self.refresh().await {
                warn!(error = %err, "refresh on load failed, continuing unauthenticated");
            }
        }
    }

    /// Whether a usable access token is present.
    pub async fn is_authenticated(&self) -> bool {
        self.tokens.read().await.as_ref().is_some_and(TokenBundle::is_usable)
    }

    /// Current userinfo claims, when authenticated.
    pub async fn user(&self) -> Option<UserInfo> {
        self.user.read().await.clone()
    }

    /// Current token bundle, when authenticated.
    pub async fn tokens(&self) -> Option<TokenBundle> {
        self.tokens.read().await.clone()
    }

    /// Identifier of the attached session (for cookie write-back).
    pub async fn session_id(&self) -> String {
        self.session.read().await.id.clone()
    }

    /// Snapshot of the attached session.
    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    async fn needs_refresh(&self) -> bool {
        let tokens = self.tokens.read().await;
        match tokens.as_ref() {
            Some(bundle) => {
                bundle.is_expired(self.config.refresh_threshold_secs)
                    && bundle.refresh_token.is_some()
            }
            None => false,
        }
    }

    /// Refresh the current bundle through the per-user single-flight gate.
    ///
    /// Rejects blacklisted refresh tokens before any network call. Any
    /// failure clears the authentication state entirely — a partial or
    /// ambiguous state is treated as unauthenticated.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let (refresh_token, subject) = {
            let tokens = self.tokens.read().await;
            let Some(bundle) = tokens.as_ref() else {
                return Err(AuthError::NotAuthenticated);
            };
            let Some(refresh_token) = bundle.refresh_token.clone() else {
                return Err(AuthError::RefreshFailure("no refresh token available".into()));
            };
            (refresh_token, self.current_subject(bundle).await)
        };

        let gate_key = subject.clone().unwrap_or_else(|| format!("rt:{refresh_token}"));
        let lock = self.gate.acquire(&gate_key);
        let guard = lock.lock().await;

        let result = self.refresh_locked(&refresh_token, subject.as_deref()).await;

        drop(guard);
        self.gate.release(&gate_key, lock);
        result
    }

    async fn refresh_locked(
        &self,
        refresh_token: &str,
        subject: Option<&str>,
    ) -> Result<(), AuthError> {
        // The winner of the gate may already have installed a fresh bundle
        // into this provider while we waited.
        {
            let tokens = self.tokens.read().await;
            if let Some(bundle) = tokens.as_ref() {
                if !bundle.is_expired(self.config.refresh_threshold_secs) {
                    debug!("bundle already fresh, skipping duplicate refresh");
                    return Ok(());
                }
            }
        }

        // A concurrent request may have finished the refresh while this one
        // waited on the gate; adopt its result instead of re-posting the
        // grant.
        if let Some(sub) = subject {
            if let Some(latest) = self.vault.get_token(sub).await {
                let current = self.tokens.read().await.clone();
                if current.as_ref() != Some(&latest)
                    && !latest.is_expired(self.config.refresh_threshold_secs)
                {
                    debug!(user_id = %sub, "adopting bundle refreshed by a concurrent request");
                    self.install_bundle(latest, subject).await?;
                    return Ok(());
                }
            }
        }

        if self.vault.is_blacklisted(refresh_token).await {
            warn!("blacklisted refresh token presented, de-authenticating");
            self.deauthenticate().await;
            return Err(AuthError::RevokedTokenReuse);
        }

        match self.oauth.refresh(refresh_token).await {
            Ok(bundle) => {
                self.install_bundle(bundle, subject).await?;
                info!("access token refreshed");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "token refresh failed, de-authenticating");
                self.deauthenticate().await;
                Err(err)
            }
        }
    }

    /// Store a bundle everywhere it lives — session, vault, the in-memory
    /// context, and every already-built dependent client — as one
    /// operation, so no client keeps using the superseded access token.
    async fn install_bundle(
        &self,
        bundle: TokenBundle,
        subject: Option<&str>,
    ) -> Result<(), AuthError> {
        {
            let mut session = self.session.write().await;
            session.tokens = Some(bundle.clone());
            self.sessions.save(&session).await;
        }

        if let Some(sub) = subject {
            self.vault.store_token(sub, &bundle).await;
        }

        *self.tokens.write().await = Some(bundle.clone());

        if let Some(blog) = self.blog.write().await.as_mut() {
            blog.rebind(&bundle.access_token)?;
        }
        if let Some(users) = self.users.write().await.as_mut() {
            users.rebind(&bundle.access_token)?;
        }

        Ok(())
    }

    async fn current_subject(&self, bundle: &TokenBundle) -> Option<String> {
        if let Some(user) = self.user.read().await.as_ref() {
            return Some(user.sub.clone());
        }
        bundle.id_token.as_deref().and_then(|token| id_token_subject(token).ok())
    }

    /// Drop every trace of the authenticated principal: destroy the stored
    /// session, clear the in-memory bundle and claims, and reset the
    /// service handles.
    pub async fn deauthenticate(&self) {
        let session_id = {
            let mut session = self.session.write().await;
            let id = session.id.clone();
            session.clear_authentication();
            id
        };
        self.sessions.destroy(&session_id).await;

        *self.tokens.write().await = None;
        *self.user.write().await = None;
        *self.blog.write().await = None;
        *self.users.write().await = None;
    }

    /// Log the principal out: blacklist the current refresh token, drop the
    /// vault entry, reset all state, and hand back the provider's
    /// end-session URL when it advertises one.
    pub async fn logout(&self) -> Option<String> {
        let bundle = self.tokens.read().await.clone();
        let subject = self.user.read().await.as_ref().map(|user| user.sub.clone());

        if let Some(refresh_token) =
            bundle.as_ref().and_then(|bundle| bundle.refresh_token.as_deref())
        {
            self.vault.blacklist_token(refresh_token).await;
        }
        if let Some(sub) = subject.as_deref() {
            self.vault.invalidate_token(sub).await;
        }

        let end_session = match self
            .oauth
            .end_session_url(bundle.as_ref().and_then(|bundle| bundle.id_token.as_deref()))
            .await
        {
            Ok(url) => url,
            Err(err) => {
                debug!(error = %err, "end-session URL unavailable");
                None
            }
        };

        self.deauthenticate().await;
        info!("logged out");

        end_session
    }

    /// Blog client pre-bound to a currently valid access token, refreshing
    /// first when needed. Built lazily on first use.
    pub async fn get_blog_service(&self) -> Result<BlogService, AuthError> {
        self.ensure_valid_token().await?;

        let tokens = self.tokens.read().await;
        let Some(bundle) = tokens.as_ref() else {
            return Err(AuthError::NotAuthenticated);
        };

        let mut slot = self.blog.write().await;
        match slot.as_mut() {
            Some(service) => {
                service.rebind(&bundle.access_token)?;
                Ok(service.clone())
            }
            None => {
                let service = BlogService::new(
                    &self.config.api_base_url,
                    &bundle.access_token,
                    Arc::clone(&self.cache),
                )?;
                *slot = Some(service.clone());
                Ok(service)
            }
        }
    }

    /// User client pre-bound to a currently valid access token.
    pub async fn get_user_service(&self) -> Result<UserService, AuthError> {
        self.ensure_valid_token().await?;

        let tokens = self.tokens.read().await;
        let Some(bundle) = tokens.as_ref() else {
            return Err(AuthError::NotAuthenticated);
        };

        let mut slot = self.users.write().await;
        match slot.as_mut() {
            Some(service) => {
                service.rebind(&bundle.access_token)?;
                Ok(service.clone())
            }
            None => {
                let service = UserService::new(
                    &self.config.api_base_url,
                    &bundle.access_token,
                    Arc::clone(&self.cache),
                )?;
                *slot = Some(service.clone());
                Ok(service)
            }
        }
    }

    async fn ensure_valid_token(&self) -> Result<(), AuthError> {
        if !self.is_authenticated().await {
            return Err(AuthError::NotAuthenticated);
        }
        if self.needs_refresh().await {
            self.refresh().await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceProvider").field("client_id", &self.config.client_id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn gate_entries_are_dropped_after_release() {
        let gate = RefreshGate::new();
        let lock = gate.acquire("user-1");
        {
            let _guard = lock.lock().await;
        }
        assert_eq!(gate.len(), 1);
        gate.release("user-1", lock);
        assert_eq!(gate.len(), 0);
    }

    #[tokio::test]
    async fn gate_serializes_same_user() {
        let gate = Arc::new(RefreshGate::new());
        let lock = gate.acquire("user-1");
        let guard = lock.lock().await;

        // A second acquire for the same user must come back as the same
        // mutex, so the second caller blocks behind the first.
        let second = gate.acquire("user-1");
        assert!(second.try_lock().is_err());

        drop(guard);
        assert!(second.try_lock().is_ok());
        gate.release("user-1", lock);
        gate.release("user-1", second);
    }

    #[tokio::test]
    async fn gate_does_not_couple_distinct_users() {
        let gate = RefreshGate::new();
        let lock_a = gate.acquire("user-a");
        let _guard = lock_a.lock().await;

        let lock_b = gate.acquire("user-b");
        assert!(lock_b.try_lock().is_ok());
    }
}
