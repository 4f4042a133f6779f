//! The PKCE authorization handshake, bound to a session.
//!
//! The flow is a one-way state machine per login attempt:
//!
//! ```text
//! IDLE -> AWAITING_CALLBACK   build_authorization_url (context stored)
//! AWAITING_CALLBACK -> EXCHANGED   handle_callback (context consumed)
//! EXCHANGED -> DONE   resolve_identity (sub extracted, userinfo fetched)
//! ```
//!
//! Every violation fails closed: a callback without a stored verifier, a
//! state that does not round-trip, or an ID token without a subject all
//! abort the attempt. There is no fallback to a plain (non-PKCE) exchange.

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tracing::debug;
use url::Url;

use crate::error::AuthError;
use crate::oauth::client::OidcClient;
use crate::oauth::pkce::PkceContext;
use crate::oauth::types::{TokenBundle, UserInfo};
use crate::session::Session;

/// Session-bound PKCE authorization flow.
#[derive(Debug, Clone)]
pub struct PkceFlow {
    client: Arc<OidcClient>,
}

impl PkceFlow {
    #[must_use]
    pub fn new(client: Arc<OidcClient>) -> Self {
        Self { client }
    }

    /// Start a login: generate verifier/challenge/state, persist the PKCE
    /// context on the session, and return the authorization URL to redirect
    /// the browser to.
    ///
    /// The caller decides the scope (defaults to the configured scopes) and
    /// may supply an externally generated `state`.
    pub async fn build_authorization_url(
        &self,
        session: &mut Session,
        scope: Option<&str>,
        state: Option<String>,
    ) -> Result<String, AuthError> {
        let context = PkceContext::generate(state);
        let challenge = context.challenge();

        let scope = match scope {
            Some(scope) => scope.to_string(),
            None => self.client.config().scope_string(),
        };

        let url = self.client.authorization_url(&challenge, &context.state, &scope).await?;

        // Stored only now, so a discovery failure leaves no dangling context.
        session.pkce = Some(context);
        debug!(session_id = %session.id, "authorization URL built, PKCE context stored");

        Ok(url)
    }

    /// Complete the round-trip: read `code` and `state` from the callback
    /// URL, validate them against the stored context, and exchange the code
    /// for tokens.
    ///
    /// The stored context is consumed exactly once — it is removed from the
    /// session before the exchange, whatever the outcome, so a replayed
    /// callback fails with [`AuthError::MissingVerifier`].
    pub async fn handle_callback(
        &self,
        session: &mut Session,
        current_url: &Url,
    ) -> Result<TokenBundle, AuthError> {
        let context = session.pkce.take().ok_or(AuthError::MissingVerifier)?;

        let code = query_param(current_url, "code").ok_or(AuthError::MissingCode)?;
        let returned_state = query_param(current_url, "state").unwrap_or_default();

        if returned_state != context.state {
            return Err(AuthError::StateMismatch {
                expected: context.state,
                received: returned_state,
            });
        }

        let bundle = self.client.exchange_code(&code, &context.code_verifier).await?;
        debug!(session_id = %session.id, "authorization code exchanged");

        Ok(bundle)
    }

    /// Extract the subject from the bundle's ID token and fetch the
    /// matching userinfo claims. A bundle without a resolvable `sub` never
    /// marks a principal authenticated.
    pub async fn resolve_identity(&self, bundle: &TokenBundle) -> Result<UserInfo, AuthError> {
        let id_token = bundle
            .id_token
            .as_deref()
            .ok_or_else(|| AuthError::InvalidIdToken("no ID token issued".into()))?;

        let sub = id_token_subject(id_token)?;
        self.client.fetch_userinfo(&bundle.access_token, &sub).await
    }
}

/// Decode the `sub` claim from a JWT's payload segment without verifying
/// the signature — verification belongs to the provider-facing calls; this
/// value is only used to key lookups and is cross-checked against userinfo.
pub fn id_token_subject(id_token: &str) -> Result<String, AuthError> {
    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| AuthError::InvalidIdToken("token is not a JWT".into()))?;

    let decoded = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|e| AuthError::InvalidIdToken(format!("payload is not base64url: {e}")))?;

    let claims: serde_json::Value = serde_json::from_slice(&decoded)
        .map_err(|e| AuthError::InvalidIdToken(format!("payload is not JSON: {e}")))?;

    claims
        .get("sub")
        .and_then(|v| v.as_str())
        .filter(|sub| !sub.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AuthError::InvalidIdToken("no subject (sub) claim".into()))
}

fn query_param(url: &Url, name: &str) -> Option<String> {
    url.query_pairs().find(|(k, _)| k == name).map(|(_, v)| v.into_owned())
}
