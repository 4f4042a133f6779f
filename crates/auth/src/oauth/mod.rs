//! OAuth2/OIDC: wire types, PKCE primitives, the provider-facing HTTP
//! client, and the session-bound authorization flow.

pub mod client;
pub mod flow;
pub mod pkce;
pub mod types;

pub use client::OidcClient;
pub use flow::{id_token_subject, PkceFlow};
pub use pkce::PkceContext;
pub use types::{ProviderMetadata, TokenBundle, UserInfo};
