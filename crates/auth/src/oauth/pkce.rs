//! PKCE (RFC 7636) primitives: code verifier, S256 challenge, and the CSRF
//! state value.
//!
//! The verifier/state pair is bound to the caller's session for exactly one
//! authorization round-trip; [`PkceContext`] is the serialized form that
//! lives inside the pending session.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Ephemeral PKCE parameters held by a session while a login is pending.
///
/// Created when the authorization URL is built, consumed exactly once when
/// the callback is handled, then deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PkceContext {
    /// Secret verifier, revealed to the provider only at token exchange.
    pub code_verifier: String,

    /// CSRF state that must survive the authorization round-trip.
    pub state: String,
}

/// Generate a cryptographically random code verifier.
///
/// 32 random bytes encode to 43 base64url characters, the RFC 7636 minimum.
#[must_use]
pub fn generate_code_verifier() -> String {
    random_urlsafe(32)
}

/// Derive the S256 code challenge: `base64url(SHA-256(verifier))` without
/// padding.
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Generate a random state token for CSRF protection.
#[must_use]
pub fn generate_state() -> String {
    random_urlsafe(16)
}

/// The only challenge method this crate emits.
pub const CHALLENGE_METHOD: &str = "S256";

fn random_urlsafe(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

impl PkceContext {
    /// Generate a fresh verifier/state pair. The state may be supplied by
    /// the caller when an external value has to round-trip.
    #[must_use]
    pub fn generate(state: Option<String>) -> Self {
        Self {
            code_verifier: generate_code_verifier(),
            state: state.unwrap_or_else(generate_state),
        }
    }

    /// Challenge derived from the stored verifier.
    #[must_use]
    pub fn challenge(&self) -> String {
        generate_code_challenge(&self.code_verifier)
    }
}
