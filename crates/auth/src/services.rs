//! Domain API clients bound to an access token.
//!
//! These are the dependent clients the lifecycle manager rebinds after a
//! refresh: each one holds the bearer token it was built with, so a stale
//! client must never outlive a token rotation. Reads go through the shared
//! cache with namespaced keys; writes invalidate what they touch.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cache::{cache_key, CacheStore};
use crate::error::AuthError;

/// TTL for cached entity reads.
const ENTITY_TTL: Duration = Duration::from_secs(300);

/// Thin bearer-authenticated HTTP client for the resource API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    access_token: String,
}

impl ApiClient {
    /// Build a client for `base_url` bound to `access_token`.
    pub fn new(base_url: &str, access_token: &str) -> Result<Self, AuthError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AuthError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.to_string(),
        })
    }

    /// The token this client was built with.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AuthError> {
        let response = self
            .http
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        decode(response).await
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AuthError> {
        let response = self
            .http
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;
        decode(response).await
    }

    async fn put_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, AuthError> {
        let response = self
            .http
            .put(format!("{}{path}", self.base_url))
            .bearer_auth(&self.access_token)
            .json(body)
            .send()
            .await?;
        decode(response).await
    }

    async fn delete(&self, path: &str) -> Result<(), AuthError> {
        let response = self
            .http
            .delete(format!("{}{path}", self.base_url))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AuthError::Api { status: status.as_u16(), message });
        }
        Ok(())
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, AuthError> {
    let status = response.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(AuthError::NotAuthenticated);
    }
    if !status.is_success() {
        let message = response.text().await.unwrap_or_default();
        return Err(AuthError::Api { status: status.as_u16(), message });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| AuthError::Malformed(format!("resource API response: {e}")))
}

/// A blog post as the resource API serves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlogPost {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_id: Option<i64>,
}

/// A user record as the resource API serves it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Blog CRUD client with cache-aside reads.
#[derive(Debug, Clone)]
pub struct BlogService {
    api: ApiClient,
    cache: Arc<CacheStore>,
}

impl BlogService {
    pub fn new(
        base_url: &str,
        access_token: &str,
        cache: Arc<CacheStore>,
    ) -> Result<Self, AuthError> {
        Ok(Self { api: ApiClient::new(base_url, access_token)?, cache })
    }

    /// Swap in a new access token, rebuilding the underlying client. A
    /// no-op when the token is unchanged.
    pub fn rebind(&mut self, access_token: &str) -> Result<(), AuthError> {
        if self.api.access_token() == access_token {
            debug!("access token unchanged, keeping existing API client");
            return Ok(());
        }
        self.api = ApiClient::new(&self.api.base_url, access_token)?;
        debug!("blog service rebound to refreshed access token");
        Ok(())
    }

    /// List all posts, serving the namespaced cache when warm.
    pub async fn list(&self) -> Result<Vec<BlogPost>, AuthError> {
        let key = cache_key(self.cache.service(), "blog", None, Some("all"));
        if let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_str(&cached) {
                Ok(posts) => return Ok(posts),
                Err(err) => warn!(error = %err, "discarding undecodable cached blog list"),
            }
        }

        let posts: Vec<BlogPost> = self.api.get_json("/blogs").await?;
        if let Ok(json) = serde_json::to_string(&posts) {
            self.cache.set(&key, &json, Some(ENTITY_TTL)).await;
        }
        Ok(posts)
    }

    /// Fetch one post by id, cache-aside.
    pub async fn get(&self, id: i64) -> Result<BlogPost, AuthError> {
        let id_string = id.to_string();
        let key = cache_key(self.cache.service(), "blog", Some(&id_string), None);
        if let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_str(&cached) {
                Ok(post) => return Ok(post),
                Err(err) => warn!(error = %err, "discarding undecodable cached blog post"),
            }
        }

        let post: BlogPost = self.api.get_json(&format!("/blogs/{id}")).await?;
        if let Ok(json) = serde_json::to_string(&post) {
            self.cache.set(&key, &json, Some(ENTITY_TTL)).await;
        }
        Ok(post)
    }

    /// Create a post and drop the stale collection entry.
    pub async fn create(&self, post: &BlogPost) -> Result<BlogPost, AuthError> {
        let created = self.api.post_json("/blogs", post).await?;
        self.cache
            .delete(&cache_key(self.cache.service(), "blog", None, Some("all")))
            .await;
        Ok(created)
    }

    /// Update a post and drop the entries it invalidates.
    pub async fn update(&self, id: i64, post: &BlogPost) -> Result<BlogPost, AuthError> {
        let updated = self.api.put_json(&format!("/blogs/{id}"), post).await?;
        let id_string = id.to_string();
        self.cache
            .delete(&cache_key(self.cache.service(), "blog", Some(&id_string), None))
            .await;
        self.cache
            .delete(&cache_key(self.cache.service(), "blog", None, Some("all")))
            .await;
        Ok(updated)
    }

    /// Delete a post and drop the entries it invalidates.
    pub async fn delete(&self, id: i64) -> Result<(), AuthError> {
        self.api.delete(&format!("/blogs/{id}")).await?;
        let id_string = id.to_string();
        self.cache
            .delete(&cache_key(self.cache.service(), "blog", Some(&id_string), None))
            .await;
        self.cache
            .delete(&cache_key(self.cache.service(), "blog", None, Some("all")))
            .await;
        Ok(())
    }
}

/// User CRUD client.
#[derive(Debug, Clone)]
pub struct UserService {
    api: ApiClient,
    cache: Arc<CacheStore>,
}

impl UserService {
    pub fn new(
        base_url: &str,
        access_token: &str,
        cache: Arc<CacheStore>,
    ) -> Result<Self, AuthError> {
        Ok(Self { api: ApiClient::new(base_url, access_token)?, cache })
    }

    /// Swap in a new access token, rebuilding the underlying client.
    pub fn rebind(&mut self, access_token: &str) -> Result<(), AuthError> {
        if self.api.access_token() == access_token {
            return Ok(());
        }
        self.api = ApiClient::new(&self.api.base_url, access_token)?;
        debug!("user service rebound to refreshed access token");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<UserRecord>, AuthError> {
        self.api.get_json("/users").await
    }

    /// Fetch one user by id, cache-aside.
    pub async fn get(&self, id: i64) -> Result<UserRecord, AuthError> {
        let id_string = id.to_string();
        let key = cache_key(self.cache.service(), "user", Some(&id_string), None);
        if let Some(cached) = self.cache.get(&key).await {
            match serde_json::from_str(&cached) {
                Ok(user) => return Ok(user),
                Err(err) => warn!(error = %err, "discarding undecodable cached user"),
            }
        }

        let user: UserRecord = self.api.get_json(&format!("/users/{id}")).await?;
        if let Ok(json) = serde_json::to_string(&user) {
            self.cache.set(&key, &json, Some(ENTITY_TTL)).await;
        }
        Ok(user)
    }

    pub async fn update(&self, id: i64, user: &UserRecord) -> Result<UserRecord, AuthError> {
        let updated = self.api.put_json(&format!("/users/{id}"), user).await?;
        let id_string = id.to_string();
        self.cache
            .delete(&cache_key(self.cache.service(), "user", Some(&id_string), None))
            .await;
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::CacheConfig;

    fn cache() -> Arc<CacheStore> {
        Arc::new(CacheStore::detached(CacheConfig::new("redis://unused", "client")))
    }

    #[test]
    fn rebind_is_noop_for_same_token() {
        let mut service = BlogService::new("http://localhost:8000", "token-a", cache()).unwrap();
        service.rebind("token-a").unwrap();
        assert_eq!(service.api.access_token(), "token-a");
    }

    #[test]
    fn rebind_swaps_token() {
        let mut service = BlogService::new("http://localhost:8000", "token-a", cache()).unwrap();
        service.rebind("token-b").unwrap();
        assert_eq!(service.api.access_token(), "token-b");
    }

    #[test]
    fn base_url_trailing_slash_is_normalized() {
        let client = ApiClient::new("http://localhost:8000/", "token").unwrap();
        assert_eq!(client.base_url, "http://localhost:8000");
    }

    #[test]
    fn blog_post_serde_uses_camel_case() {
        let post = BlogPost {
            id: Some(1),
            title: "Title".into(),
            content: "Body".into(),
            author_id: Some(7),
        };
        let json = serde_json::to_string(&post).unwrap();
        assert!(json.contains("\"authorId\":7"));
    }
}
