//! Deterministic, namespaced cache key construction.
//!
//! Several services share one cache; collision-free namespacing comes from
//! building every key through the same pure function. Keys are monotonic and
//! human-readable for debugging but are never parsed back — treat them as
//! opaque once built.

/// Compose a namespaced cache key: `service:entity[:subtype][:id]`.
///
/// Pure and total: the same inputs always yield the same string.
#[must_use]
pub fn cache_key(
    service: &str,
    entity: &str,
    id: Option<&str>,
    subtype: Option<&str>,
) -> String {
    let mut key = format!("{service}:{entity}");

    if let Some(subtype) = subtype {
        key.push(':');
        key.push_str(subtype);
    }

    if let Some(id) = id {
        key.push(':');
        key.push_str(id);
    }

    key
}

/// Fixed keys of the persisted token/session layout.
///
/// These are deliberately not service-namespaced: token bundles, the
/// revocation blacklist, and sessions are owned by the relying party alone.
pub mod layout {
    const TOKEN_PREFIX: &str = "token:";
    const BLACKLIST_PREFIX: &str = "blacklist:";
    const SESSION_PREFIX: &str = "sess:";

    /// `token:{userId}` — one bundle per authenticated principal.
    #[must_use]
    pub fn token(user_id: &str) -> String {
        format!("{TOKEN_PREFIX}{user_id}")
    }

    /// `blacklist:{hash}` — revoked refresh tokens by digest.
    #[must_use]
    pub fn blacklist(token_hash: &str) -> String {
        format!("{BLACKLIST_PREFIX}{token_hash}")
    }

    /// `sess:{sessionId}` — serialized session JSON.
    #[must_use]
    pub fn session(session_id: &str) -> String {
        format!("{SESSION_PREFIX}{session_id}")
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn service_and_entity_only() {
        assert_eq!(cache_key("backend", "blog", None, None), "backend:blog");
    }

    #[test]
    fn subtype_precedes_id() {
        assert_eq!(cache_key("backend", "blog", None, Some("all")), "backend:blog:all");
        assert_eq!(cache_key("backend", "blog", Some("42"), None), "backend:blog:42");
        assert_eq!(
            cache_key("backend", "user", Some("7"), Some("auth")),
            "backend:user:auth:7"
        );
    }

    #[test]
    fn layout_keys() {
        assert_eq!(layout::token("user-123"), "token:user-123");
        assert_eq!(layout::blacklist("abcdef"), "blacklist:abcdef");
        assert_eq!(layout::session("sid-1"), "sess:sid-1");
    }

    proptest! {
        /// Same inputs always produce the same key string, and distinct
        /// services never collide.
        #[test]
        fn key_construction_is_deterministic(
            service in "[a-z][a-z0-9_-]{0,16}",
            entity in "[a-z][a-z0-9_-]{0,16}",
            id in proptest::option::of("[a-zA-Z0-9_-]{1,24}"),
            subtype in proptest::option::of("[a-z][a-z0-9_-]{0,12}"),
        ) {
            let first = cache_key(&service, &entity, id.as_deref(), subtype.as_deref());
            let second = cache_key(&service, &entity, id.as_deref(), subtype.as_deref());
            prop_assert_eq!(&first, &second);
            let prefix = format!("{}:{}", service, entity);
            prop_assert!(first.starts_with(&prefix));
        }

        #[test]
        fn distinct_services_share_no_keys(
            entity in "[a-z][a-z0-9_-]{0,16}",
            id in proptest::option::of("[a-zA-Z0-9_-]{1,24}"),
        ) {
            let a = cache_key("backend", &entity, id.as_deref(), None);
            let b = cache_key("provider", &entity, id.as_deref(), None);
            prop_assert_ne!(a, b);
        }
    }
}
