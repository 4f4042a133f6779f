//! Token lifecycle management for OAuth2/OIDC relying parties.
//!
//! This crate owns the authenticated session of a browser-facing client
//! application fronting an external identity provider: it performs the PKCE
//! authorization handshake, persists tokens against a user session,
//! transparently refreshes them before expiry, revokes and blacklists them
//! on logout, and degrades gracefully when the backing cache is down.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │   AuthRuntime    │  Explicitly constructed assembly (one per client)
//! └────────┬─────────┘
//!          │
//!          ├──► PkceFlow          (authorization URL, callback exchange)
//!          │         └──► OidcClient    (discovery, grants, userinfo)
//!          ├──► SessionStore      (sess:{id}, 24 h TTL)
//!          ├──► TokenVault        (token:{user}, blacklist:{hash})
//!          │         └──► CacheStore    (Redis + in-memory failover)
//!          └──► ServiceProvider   (per-request lifecycle + domain clients)
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use tokengate_auth::{AuthConfig, AuthRuntime, CacheConfig, Session};
//!
//! # async fn example() -> Result<(), tokengate_auth::AuthError> {
//! let config = AuthConfig::new(
//!     "http://localhost:4444",
//!     "client-app",
//!     "client-secret",
//!     "http://localhost:5555/oauth2/callback",
//!     "http://localhost:8000",
//! );
//! let runtime =
//!     AuthRuntime::connect(config, CacheConfig::from_env("client")).await?;
//!
//! // Login: redirect the browser to the authorization URL.
//! let mut session = Session::new();
//! let auth_url = runtime.begin_login(&mut session, Some("/".into())).await?;
//!
//! // ... browser authorizes, provider redirects back ...
//! let callback = url::Url::parse("http://localhost:5555/oauth2/callback?code=...&state=...")
//!     .map_err(|e| tokengate_auth::AuthError::Config(e.to_string()))?;
//! let user = runtime.complete_login(&mut session, &callback).await?;
//! println!("logged in as {}", user.sub);
//!
//! // Later requests: attach, and tokens refresh themselves when needed.
//! let request = runtime.begin_request(Some(&session.id)).await;
//! let blogs = request.get_blog_service().await?.list().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]

pub mod cache;
pub mod config;
pub mod error;
pub mod oauth;
pub mod provider;
pub mod runtime;
pub mod services;
pub mod session;
pub mod vault;

pub use cache::{cache_key, CacheStore, MemoryStore};
pub use config::{AuthConfig, CacheConfig};
pub use error::AuthError;
pub use oauth::{id_token_subject, OidcClient, PkceContext, PkceFlow, TokenBundle, UserInfo};
pub use provider::{RefreshGate, ServiceProvider};
pub use runtime::AuthRuntime;
pub use services::{ApiClient, BlogPost, BlogService, UserRecord, UserService};
pub use session::{Session, SessionStore};
pub use vault::TokenVault;
