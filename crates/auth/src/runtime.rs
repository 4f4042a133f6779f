//! Explicitly constructed assembly of the authentication stack.
//!
//! One [`AuthRuntime`] per configured relying party, built by application
//! code and passed through request context — never a module-level
//! singleton, so tests and multi-tenant processes can hold several with
//! different configurations.

use std::sync::Arc;

use tracing::debug;
use url::Url;

use crate::cache::CacheStore;
use crate::config::{AuthConfig, CacheConfig};
use crate::error::AuthError;
use crate::oauth::client::OidcClient;
use crate::oauth::flow::PkceFlow;
use crate::oauth::types::UserInfo;
use crate::provider::{RefreshGate, ServiceProvider};
use crate::session::{Session, SessionStore};
use crate::vault::TokenVault;

/// Shared, long-lived authentication components for one relying party.
#[derive(Debug)]
pub struct AuthRuntime {
    config: Arc<AuthConfig>,
    cache: Arc<CacheStore>,
    sessions: SessionStore,
    vault: Arc<TokenVault>,
    oauth: Arc<OidcClient>,
    flow: PkceFlow,
    gate: Arc<RefreshGate>,
}

impl AuthRuntime {
    /// Connect the cache backend and assemble the stack.
    pub async fn connect(
        config: AuthConfig,
        cache_config: CacheConfig,
    ) -> Result<Self, AuthError> {
        let cache = Arc::new(CacheStore::connect(cache_config).await);
        Self::with_cache(config, cache)
    }

    /// Assemble the stack over an existing cache handle. This is the seam
    /// test code uses to inject a detached store.
    pub fn with_cache(config: AuthConfig, cache: Arc<CacheStore>) -> Result<Self, AuthError> {
        config.validate()?;
        let config = Arc::new(config);

        let sessions = SessionStore::new(Arc::clone(&cache));
        let vault =
            Arc::new(TokenVault::new(Arc::clone(&cache), config.blacklist_fail_closed));
        let oauth = Arc::new(OidcClient::new(Arc::clone(&config))?);
        let flow = PkceFlow::new(Arc::clone(&oauth));

        Ok(Self {
            config,
            cache,
            sessions,
            vault,
            oauth,
            flow,
            gate: Arc::new(RefreshGate::new()),
        })
    }

    /// The PKCE authorization flow.
    #[must_use]
    pub fn flow(&self) -> &PkceFlow {
        &self.flow
    }

    /// Session persistence.
    #[must_use]
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Token vault and blacklist.
    #[must_use]
    pub fn vault(&self) -> &TokenVault {
        &self.vault
    }

    /// The provider-facing OIDC client, for introspection/revocation calls
    /// the lifecycle itself does not make.
    #[must_use]
    pub fn oauth(&self) -> &Arc<OidcClient> {
        &self.oauth
    }

    /// Relying-party configuration.
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Start a login: store the PKCE context on the session, persist it,
    /// and return the authorization URL for the redirect.
    pub async fn begin_login(
        &self,
        session: &mut Session,
        return_to: Option<String>,
    ) -> Result<String, AuthError> {
        if return_to.is_some() {
            session.return_to = return_to;
        }
        let url = self.flow.build_authorization_url(session, None, None).await?;
        self.sessions.save(session).await;
        Ok(url)
    }

    /// Complete a login from the callback URL: exchange the code, resolve
    /// the principal, and persist tokens against both the session and the
    /// vault.
    ///
    /// The consumed PKCE context is persisted even when the exchange fails,
    /// so a replayed callback cannot reuse it.
    pub async fn complete_login(
        &self,
        session: &mut Session,
        current_url: &Url,
    ) -> Result<UserInfo, AuthError> {
        let bundle = match self.flow.handle_callback(session, current_url).await {
            Ok(bundle) => bundle,
            Err(err) => {
                self.sessions.save(session).await;
                return Err(err);
            }
        };

        let user = match self.flow.resolve_identity(&bundle).await {
            Ok(user) => user,
            Err(err) => {
                self.sessions.save(session).await;
                return Err(err);
            }
        };

        session.tokens = Some(bundle.clone());
        session.user = Some(user.clone());
        self.vault.store_token(&user.sub, &bundle).await;
        self.sessions.save(session).await;

        debug!(user_id = %user.sub, "login completed");
        Ok(user)
    }

    /// Attach a request to its session (a fresh one when the id is unknown
    /// or the stored record is gone) and return the loaded, possibly
    /// refreshed, per-request provider.
    pub async fn begin_request(&self, session_id: Option<&str>) -> ServiceProvider {
        let session = match session_id {
            Some(id) => self.sessions.load(id).await.unwrap_or_else(|| {
                debug!(session_id = %id, "unknown session id, starting fresh");
                Session::new()
            }),
            None => Session::new(),
        };
        self.attach(session).await
    }

    /// Attach a request to an already-loaded session.
    pub async fn attach(&self, session: Session) -> ServiceProvider {
        let provider = ServiceProvider::attach(
            Arc::clone(&self.config),
            Arc::clone(&self.oauth),
            Arc::clone(&self.cache),
            Arc::clone(&self.vault),
            self.sessions.clone(),
            Arc::clone(&self.gate),
            session,
        );
        provider.load().await;
        provider
    }
}
