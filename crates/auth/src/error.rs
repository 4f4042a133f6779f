//! Error taxonomy for the token lifecycle stack.
//!
//! Two families of failures flow through this crate:
//!
//! - **Infrastructure** errors (cache, transient network) degrade
//!   functionality but never abort a request. The cache layer absorbs them
//!   entirely; the OIDC client surfaces them so callers can decide.
//! - **Protocol/security** errors (`MissingVerifier`, `StateMismatch`,
//!   `InvalidIdToken`, `RevokedTokenReuse`, `RefreshFailure`) abort the
//!   specific flow and return the caller to a safe, unauthenticated state.
//!
//! Route-level code pattern-matches on these variants instead of catching a
//! generic error type.

use thiserror::Error;

/// Errors produced by the authentication stack.
#[derive(Debug, Error)]
pub enum AuthError {
    /// The backing cache could not be reached. Never surfaced to end users;
    /// only the blacklist check observes this directly (see
    /// [`crate::vault::TokenVault::is_blacklisted`]).
    #[error("cache unavailable: {0}")]
    CacheUnavailable(String),

    /// A callback arrived without a previously stored PKCE verifier.
    #[error("no PKCE verifier stored for this session")]
    MissingVerifier,

    /// The `state` parameter did not survive the authorization round-trip.
    #[error("state mismatch: expected {expected}, received {received}")]
    StateMismatch { expected: String, received: String },

    /// The callback URL carried no authorization code.
    #[error("callback URL is missing the authorization code")]
    MissingCode,

    /// The ID token could not be decoded or lacks a `sub` claim. Fatal for
    /// the login attempt: no principal is marked authenticated without it.
    #[error("invalid ID token: {0}")]
    InvalidIdToken(String),

    /// The refresh grant was rejected. Forces full de-authentication.
    #[error("token refresh failed: {0}")]
    RefreshFailure(String),

    /// A blacklisted refresh token was presented. Rejected before any
    /// network call reaches the identity provider.
    #[error("revoked refresh token presented")]
    RevokedTokenReuse,

    /// The authorization server returned an RFC 6749 error body.
    #[error(
        "authorization server error: {error}{}",
        .description.as_deref().map(|d| format!(": {d}")).unwrap_or_default()
    )]
    Provider { error: String, description: Option<String> },

    /// Provider discovery failed after the bounded retry loop.
    #[error("issuer discovery failed after {attempts} attempts: {message}")]
    Discovery { attempts: u32, message: String },

    /// Transport-level HTTP failure.
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The resource API rejected a request.
    #[error("resource API returned {status}: {message}")]
    Api { status: u16, message: String },

    /// A response body did not match its expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// An operation that requires a valid token was invoked without one.
    #[error("not authenticated")]
    NotAuthenticated,

    /// Invalid or incomplete configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl AuthError {
    /// Whether the failure is transient and the operation could be attempted
    /// again. Nothing in this crate retries automatically except the cache
    /// reconnect loop and the discovery fetch; this classification is for
    /// callers.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AuthError::CacheUnavailable(_) | AuthError::Transport(_) | AuthError::Discovery { .. }
        )
    }

    /// Whether the error is a protocol or security violation that must fail
    /// the flow closed (no degraded fallback, no retry).
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            AuthError::MissingVerifier
                | AuthError::StateMismatch { .. }
                | AuthError::InvalidIdToken(_)
                | AuthError::RevokedTokenReuse
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_discovery_are_retryable() {
        let err = AuthError::Discovery { attempts: 3, message: "connection refused".into() };
        assert!(err.is_retryable());
        assert!(!err.is_protocol_violation());
    }

    #[test]
    fn pkce_violations_fail_closed() {
        assert!(AuthError::MissingVerifier.is_protocol_violation());
        assert!(AuthError::RevokedTokenReuse.is_protocol_violation());
        assert!(!AuthError::MissingVerifier.is_retryable());
    }

    #[test]
    fn provider_error_display_includes_description() {
        let err = AuthError::Provider {
            error: "invalid_grant".into(),
            description: Some("refresh token is revoked".into()),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("invalid_grant"));
        assert!(rendered.contains("refresh token is revoked"));
    }

    #[test]
    fn provider_error_display_without_description() {
        let err = AuthError::Provider { error: "invalid_request".into(), description: None };
        assert_eq!(err.to_string(), "authorization server error: invalid_request");
    }
}
