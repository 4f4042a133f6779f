//! Configuration for the relying party and its cache backend.
//!
//! Everything here is explicit, constructed state: instances are built once
//! by application code and passed down through [`crate::runtime::AuthRuntime`]
//! rather than read from module-level globals.

use std::time::Duration;

use url::Url;

use crate::error::AuthError;

/// Default refresh threshold: refresh when fewer than 5 minutes remain.
pub const DEFAULT_REFRESH_THRESHOLD_SECS: i64 = 300;

/// Transport timeout for identity-provider calls.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Relying-party configuration for one OAuth2/OIDC client registration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Issuer base URL, e.g. `http://localhost:4444`. Discovery is fetched
    /// from `{issuer}/.well-known/openid-configuration`.
    pub issuer_url: String,

    /// OAuth client ID.
    pub client_id: String,

    /// OAuth client secret, sent on token-endpoint calls.
    pub client_secret: String,

    /// Redirect URI registered with the provider.
    pub redirect_uri: String,

    /// Scopes to request (joined with spaces).
    pub scopes: Vec<String>,

    /// Optional audience (API identifier) forwarded on authorize and token
    /// calls.
    pub audience: Option<String>,

    /// Base URL of the resource API the domain services talk to.
    pub api_base_url: String,

    /// Where the provider should send the browser after logout.
    pub post_logout_redirect_uri: Option<String>,

    /// Refresh tokens this many seconds before access-token expiry.
    pub refresh_threshold_secs: i64,

    /// Transport timeout applied to all identity-provider calls.
    pub http_timeout: Duration,

    /// Treat a failed blacklist lookup as "blacklisted" instead of "not
    /// blacklisted". Defaults to `false` (availability over revocation
    /// correctness); flip when the threat model demands the opposite.
    pub blacklist_fail_closed: bool,
}

impl AuthConfig {
    /// Create a configuration with defaults for the tuning knobs.
    #[must_use]
    pub fn new(
        issuer_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
        api_base_url: impl Into<String>,
    ) -> Self {
        Self {
            issuer_url: issuer_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes: vec![
                "openid".to_string(),
                "offline".to_string(),
                "profile".to_string(),
                "email".to_string(),
            ],
            audience: None,
            api_base_url: api_base_url.into(),
            post_logout_redirect_uri: None,
            refresh_threshold_secs: DEFAULT_REFRESH_THRESHOLD_SECS,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            blacklist_fail_closed: false,
        }
    }

    /// Load configuration from the process environment (and `.env` when
    /// present): `ISSUER_BASE_URL`, `CLIENT_ID`, `CLIENT_SECRET`,
    /// `BASE_URL`, `API_URL`, `OAUTH_SCOPE`.
    ///
    /// # Errors
    /// Returns [`AuthError::Config`] when a required variable is missing or
    /// the issuer URL does not parse.
    pub fn from_env() -> Result<Self, AuthError> {
        dotenvy::dotenv().ok();

        let issuer_url = require_env("ISSUER_BASE_URL")?;
        let client_id = require_env("CLIENT_ID")?;
        let client_secret = require_env("CLIENT_SECRET")?;
        let base_url =
            std::env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:5555".to_string());
        let api_base_url =
            std::env::var("API_URL").unwrap_or_else(|_| "http://localhost:8000".to_string());

        let mut config = Self::new(
            issuer_url,
            client_id,
            client_secret,
            format!("{}/oauth2/callback", base_url.trim_end_matches('/')),
            api_base_url.clone(),
        );
        config.audience = Some(api_base_url);
        config.post_logout_redirect_uri = Some(base_url);
        if let Ok(scope) = std::env::var("OAUTH_SCOPE") {
            config.scopes = scope.split_whitespace().map(str::to_string).collect();
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate the parts that would otherwise fail much later and less
    /// clearly.
    pub fn validate(&self) -> Result<(), AuthError> {
        Url::parse(&self.issuer_url)
            .map_err(|e| AuthError::Config(format!("issuer_url is not a valid URL: {e}")))?;
        Url::parse(&self.redirect_uri)
            .map_err(|e| AuthError::Config(format!("redirect_uri is not a valid URL: {e}")))?;
        if self.client_id.is_empty() {
            return Err(AuthError::Config("client_id must not be empty".into()));
        }
        if self.refresh_threshold_secs <= 0 {
            return Err(AuthError::Config("refresh_threshold_secs must be positive".into()));
        }
        Ok(())
    }

    /// Scopes joined into the space-separated wire form.
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scopes.join(" ")
    }

    /// Issuer URL with any trailing slash removed, for endpoint composition.
    #[must_use]
    pub fn issuer_base(&self) -> &str {
        self.issuer_url.trim_end_matches('/')
    }
}

/// Cache backend configuration.
///
/// The backoff parameters drive the reconnect loop only; individual
/// get/set/delete calls never retry, they fail over to the in-memory
/// fallback within the same call.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis connection URL, e.g. `redis://localhost:6379`.
    pub url: String,

    /// Service name used to namespace shared-cache keys.
    pub service: String,

    /// Reconnect attempts after the initial connection failure.
    pub max_retries: u32,

    /// First reconnect delay; doubles per attempt.
    pub backoff_base: Duration,

    /// Upper bound on the reconnect delay.
    pub backoff_cap: Duration,

    /// Timeout for a single connection attempt.
    pub connect_timeout: Duration,

    /// Lifetime of serialized sessions (`sess:{id}` entries).
    pub session_ttl: Duration,
}

impl CacheConfig {
    /// Configuration with the standard backoff envelope (50 ms base, 2 s
    /// cap, 3 retries) and a 24 h session lifetime.
    #[must_use]
    pub fn new(url: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            service: service.into(),
            max_retries: 3,
            backoff_base: Duration::from_millis(50),
            backoff_cap: Duration::from_millis(2000),
            connect_timeout: Duration::from_secs(2),
            session_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Load the cache configuration from `REDIS_URL` (falling back to the
    /// local default) with the given namespace.
    #[must_use]
    pub fn from_env(service: impl Into<String>) -> Self {
        dotenvy::dotenv().ok();
        let url = std::env::var("REDIS_URL")
            .unwrap_or_else(|_| "redis://localhost:6379".to_string());
        Self::new(url, service)
    }
}

fn require_env(name: &str) -> Result<String, AuthError> {
    std::env::var(name).map_err(|_| AuthError::Config(format!("{name} is not set")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> AuthConfig {
        AuthConfig::new(
            "http://localhost:4444",
            "client-app",
            "client-secret",
            "http://localhost:5555/oauth2/callback",
            "http://localhost:8000",
        )
    }

    #[test]
    fn defaults_apply() {
        let config = sample_config();
        assert_eq!(config.refresh_threshold_secs, 300);
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert!(!config.blacklist_fail_closed);
        assert_eq!(config.scope_string(), "openid offline profile email");
    }

    #[test]
    fn validate_rejects_bad_issuer() {
        let mut config = sample_config();
        config.issuer_url = "not a url".into();
        assert!(matches!(config.validate(), Err(AuthError::Config(_))));
    }

    #[test]
    fn validate_rejects_zero_threshold() {
        let mut config = sample_config();
        config.refresh_threshold_secs = 0;
        assert!(matches!(config.validate(), Err(AuthError::Config(_))));
    }

    #[test]
    fn issuer_base_strips_trailing_slash() {
        let mut config = sample_config();
        config.issuer_url = "http://localhost:4444/".into();
        assert_eq!(config.issuer_base(), "http://localhost:4444");
    }

    #[test]
    fn cache_config_backoff_envelope() {
        let config = CacheConfig::new("redis://localhost:6379", "client");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.backoff_base, Duration::from_millis(50));
        assert_eq!(config.backoff_cap, Duration::from_millis(2000));
        assert_eq!(config.session_ttl, Duration::from_secs(86_400));
    }
}
