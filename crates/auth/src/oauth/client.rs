//! HTTP client for the external identity provider.
//!
//! Covers the full relying-party surface: discovery (retried, then cached
//! for the process lifetime), the `authorization_code` and `refresh_token`
//! grants, userinfo, token introspection and revocation, and the
//! end-session URL. All token-endpoint calls are form-encoded and carry the
//! client credentials.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::oauth::types::{
    IntrospectionResponse, OAuthErrorBody, ProviderMetadata, TokenBundle, TokenResponse, UserInfo,
};

const DISCOVERY_ATTEMPTS: u32 = 3;
const DISCOVERY_BACKOFF_BASE: Duration = Duration::from_millis(50);
const DISCOVERY_BACKOFF_CAP: Duration = Duration::from_millis(2000);

/// OIDC relying-party client bound to one provider and one client
/// registration.
pub struct OidcClient {
    config: Arc<AuthConfig>,
    http: Client,
    metadata: RwLock<Option<ProviderMetadata>>,
}

impl OidcClient {
    /// Build a client with the configured transport timeout.
    ///
    /// # Errors
    /// Returns [`AuthError::Config`] when the underlying HTTP client cannot
    /// be constructed.
    pub fn new(config: Arc<AuthConfig>) -> Result<Self, AuthError> {
        let http = Client::builder()
            .timeout(config.http_timeout)
            .build()
            .map_err(|e| AuthError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { config, http, metadata: RwLock::new(None) })
    }

    /// Shared relying-party configuration.
    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Fetch the provider's discovery document, retrying transient failures
    /// with exponential backoff. The document is cached after the first
    /// success; later calls are free.
    pub async fn discover(&self) -> Result<ProviderMetadata, AuthError> {
        if let Some(metadata) = self.metadata.read().await.clone() {
            return Ok(metadata);
        }

        let url = format!("{}/.well-known/openid-configuration", self.config.issuer_base());
        let mut delay = DISCOVERY_BACKOFF_BASE;
        let mut last_error = String::new();

        for attempt in 1..=DISCOVERY_ATTEMPTS {
            match self.fetch_discovery(&url).await {
                Ok(metadata) => {
                    info!(issuer = %metadata.issuer, "discovered OpenID Connect issuer");
                    *self.metadata.write().await = Some(metadata.clone());
                    return Ok(metadata);
                }
                Err(err) => {
                    warn!(attempt, error = %err, "issuer discovery failed");
                    last_error = err.to_string();
                    if attempt < DISCOVERY_ATTEMPTS {
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(DISCOVERY_BACKOFF_CAP);
                    }
                }
            }
        }

        Err(AuthError::Discovery { attempts: DISCOVERY_ATTEMPTS, message: last_error })
    }

    async fn fetch_discovery(&self, url: &str) -> Result<ProviderMetadata, AuthError> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(AuthError::Malformed(format!(
                "discovery endpoint returned {}",
                response.status()
            )));
        }
        response
            .json::<ProviderMetadata>()
            .await
            .map_err(|e| AuthError::Malformed(format!("discovery document: {e}")))
    }

    /// Build the fully-qualified authorization URL for a browser redirect.
    pub async fn authorization_url(
        &self,
        challenge: &str,
        state: &str,
        scope: &str,
    ) -> Result<String, AuthError> {
        let metadata = self.discover().await?;

        let mut params = vec![
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", scope),
            ("state", state),
            ("code_challenge", challenge),
            ("code_challenge_method", super::pkce::CHALLENGE_METHOD),
        ];
        if let Some(audience) = &self.config.audience {
            params.push(("audience", audience.as_str()));
        }

        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        Ok(format!("{}?{query}", metadata.authorization_endpoint))
    }

    /// Exchange an authorization code for tokens (grant type
    /// `authorization_code`).
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenBundle, AuthError> {
        let metadata = self.discover().await?;

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ];
        if let Some(audience) = &self.config.audience {
            form.push(("audience", audience.as_str()));
        }

        debug!("exchanging authorization code for tokens");
        self.post_token_grant(&metadata.token_endpoint, &form).await
    }

    /// Obtain a fresh bundle with the `refresh_token` grant.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenBundle, AuthError> {
        if refresh_token.is_empty() {
            return Err(AuthError::RefreshFailure("no refresh token available".into()));
        }

        let metadata = self.discover().await?;

        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];
        if let Some(audience) = &self.config.audience {
            form.push(("audience", audience.as_str()));
        }

        debug!("refreshing access token");
        match self.post_token_grant(&metadata.token_endpoint, &form).await {
            Ok(bundle) => Ok(bundle),
            // A rejected grant is a refresh failure; transport problems keep
            // their own classification so callers can tell the two apart.
            Err(AuthError::Provider { error, description }) => Err(AuthError::RefreshFailure(
                description.unwrap_or(error),
            )),
            Err(other) => Err(other),
        }
    }

    /// Fetch userinfo claims and verify they belong to the expected subject.
    pub async fn fetch_userinfo(
        &self,
        access_token: &str,
        expected_sub: &str,
    ) -> Result<UserInfo, AuthError> {
        let metadata = self.discover().await?;

        let response = self
            .http
            .get(&metadata.userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AuthError::Malformed(format!(
                "userinfo endpoint returned {}",
                response.status()
            )));
        }

        let claims = response
            .json::<UserInfo>()
            .await
            .map_err(|e| AuthError::Malformed(format!("userinfo claims: {e}")))?;

        if claims.sub != expected_sub {
            return Err(AuthError::InvalidIdToken(format!(
                "userinfo subject {} does not match ID token subject {expected_sub}",
                claims.sub
            )));
        }

        Ok(claims)
    }

    /// Introspect a token at `{issuer}/introspect` (RFC 7662).
    pub async fn introspect(
        &self,
        token: &str,
        token_type_hint: Option<&str>,
    ) -> Result<IntrospectionResponse, AuthError> {
        let mut form = vec![
            ("token", token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        if let Some(hint) = token_type_hint {
            form.push(("token_type_hint", hint));
        }

        let url = format!("{}/introspect", self.config.issuer_base());
        let response = self.http.post(&url).form(&form).send().await?;
        if !response.status().is_success() {
            return Err(AuthError::Malformed(format!(
                "introspection endpoint returned {}",
                response.status()
            )));
        }
        response
            .json::<IntrospectionResponse>()
            .await
            .map_err(|e| AuthError::Malformed(format!("introspection response: {e}")))
    }

    /// Revoke a token at `{issuer}/revoke` (RFC 7009).
    pub async fn revoke(
        &self,
        token: &str,
        token_type_hint: Option<&str>,
    ) -> Result<(), AuthError> {
        let mut form = vec![
            ("token", token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];
        if let Some(hint) = token_type_hint {
            form.push(("token_type_hint", hint));
        }

        let url = format!("{}/revoke", self.config.issuer_base());
        let response = self.http.post(&url).form(&form).send().await?;
        if !response.status().is_success() {
            return Err(AuthError::Malformed(format!(
                "revocation endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Build the provider's end-session URL when it advertises one.
    pub async fn end_session_url(
        &self,
        id_token: Option<&str>,
    ) -> Result<Option<String>, AuthError> {
        let metadata = self.discover().await?;
        let Some(endpoint) = metadata.end_session_endpoint else {
            return Ok(None);
        };

        let mut params: Vec<(&str, &str)> = Vec::new();
        if let Some(id_token) = id_token {
            params.push(("id_token_hint", id_token));
        }
        if let Some(redirect) = &self.config.post_logout_redirect_uri {
            params.push(("post_logout_redirect_uri", redirect.as_str()));
        }

        if params.is_empty() {
            return Ok(Some(endpoint));
        }

        let query = params
            .iter()
            .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        Ok(Some(format!("{endpoint}?{query}")))
    }

    async fn post_token_grant(
        &self,
        token_endpoint: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenBundle, AuthError> {
        let response = self.http.post(token_endpoint).form(form).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body: OAuthErrorBody = response.json().await.map_err(|e| {
                AuthError::Malformed(format!("error body from token endpoint ({status}): {e}"))
            })?;
            return Err(AuthError::Provider {
                error: body.error,
                description: body.error_description,
            });
        }

        let token_response = response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::Malformed(format!("token response: {e}")))?;

        Ok(TokenBundle::from(token_response))
    }
}

impl std::fmt::Debug for OidcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcClient")
            .field("issuer", &self.config.issuer_url)
            .field("client_id", &self.config.client_id)
            .finish()
    }
}
