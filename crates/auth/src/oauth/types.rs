//! Wire and domain types for the OAuth2/OIDC exchange.
//!
//! [`TokenBundle`] is the closed record this crate trusts internally; it is
//! validated at every deserialization boundary (cache, session) rather than
//! being accepted as free-form JSON. Bundles are immutable once issued and
//! replaced wholesale on refresh.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Access/refresh/ID token set issued for one authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBundle {
    /// Access token for API authentication.
    pub access_token: String,

    /// Refresh token; absent when the provider issues none (e.g. the
    /// `offline` scope was not granted).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// OpenID Connect ID token (JWT) carrying the subject claim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,

    /// Token type, `Bearer` for everything this crate talks to.
    pub token_type: String,

    /// Access-token lifetime in seconds, as reported by the provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,

    /// Absolute expiry instant, derived from `expires_in` at issue time so
    /// that expiry checks survive (de)serialization.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,

    /// Granted scopes, space-separated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl TokenBundle {
    /// Check whether the access token is expired or will expire within the
    /// given threshold. A bundle without expiry information never reports
    /// as expired.
    #[must_use]
    pub fn is_expired(&self, threshold_seconds: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => {
                Utc::now() + chrono::Duration::seconds(threshold_seconds) >= expires_at
            }
            None => false,
        }
    }

    /// Seconds until the access token expires, when known.
    #[must_use]
    pub fn seconds_until_expiry(&self) -> Option<i64> {
        self.expires_at.map(|expires_at| (expires_at - Utc::now()).num_seconds())
    }

    /// Whether the bundle can be used to authenticate a principal at all.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        !self.access_token.is_empty()
    }
}

/// Token-endpoint response body (RFC 6749 §5.1).
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub id_token: Option<String>,
    pub token_type: String,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
}

impl From<TokenResponse> for TokenBundle {
    fn from(response: TokenResponse) -> Self {
        let expires_at = response
            .expires_in
            .filter(|&secs| secs > 0)
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));

        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            id_token: response.id_token,
            token_type: response.token_type,
            expires_in: response.expires_in,
            expires_at,
            scope: response.scope,
        }
    }
}

/// Subset of the OpenID Connect discovery document this crate consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

/// Claims returned by the userinfo endpoint. `sub` is the only claim the
/// lifecycle logic depends on; everything else rides along for the
/// application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Introspection response (RFC 7662). Only `active` is interpreted.
#[derive(Debug, Clone, Deserialize)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(flatten)]
    pub claims: serde_json::Map<String, serde_json::Value>,
}

/// OAuth error response body (RFC 6749 §5.2).
#[derive(Debug, Deserialize)]
pub struct OAuthErrorBody {
    pub error: String,
    pub error_description: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_with_expiry(expires_in: i64) -> TokenBundle {
        TokenBundle::from(TokenResponse {
            access_token: "access".into(),
            refresh_token: Some("refresh".into()),
            id_token: None,
            token_type: "Bearer".into(),
            expires_in: Some(expires_in),
            scope: None,
        })
    }

    #[test]
    fn response_conversion_derives_expiry() {
        let bundle = bundle_with_expiry(3600);
        assert_eq!(bundle.expires_in, Some(3600));
        assert!(bundle.expires_at.is_some());

        let remaining = bundle.seconds_until_expiry().unwrap();
        assert!(remaining > 3590 && remaining <= 3600);
    }

    #[test]
    fn expiry_threshold_boundaries() {
        // 299 seconds remaining: inside the 300 s threshold, must refresh.
        assert!(bundle_with_expiry(299).is_expired(300));
        // 301 seconds remaining: outside the threshold, no refresh yet.
        assert!(!bundle_with_expiry(301).is_expired(300));
    }

    #[test]
    fn missing_expiry_never_reports_expired() {
        let bundle = TokenBundle::from(TokenResponse {
            access_token: "access".into(),
            refresh_token: None,
            id_token: None,
            token_type: "Bearer".into(),
            expires_in: None,
            scope: None,
        });
        assert!(!bundle.is_expired(300));
        assert!(bundle.seconds_until_expiry().is_none());
    }

    #[test]
    fn bundle_serde_roundtrip_preserves_fields() {
        let bundle = bundle_with_expiry(600);
        let json = serde_json::to_string(&bundle).unwrap();
        let parsed: TokenBundle = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, bundle);
    }

    #[test]
    fn empty_access_token_is_unusable() {
        let mut bundle = bundle_with_expiry(600);
        bundle.access_token.clear();
        assert!(!bundle.is_usable());
    }

    #[test]
    fn userinfo_keeps_unknown_claims() {
        let claims: UserInfo = serde_json::from_value(serde_json::json!({
            "sub": "user-1",
            "email": "user@example.com",
            "locale": "en-US",
        }))
        .unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.extra.get("locale").and_then(|v| v.as_str()), Some("en-US"));
    }
}
