//! Durable-ish key/value store with automatic reconnect and in-memory
//! failover.
//!
//! The public operations never return an error: failures are absorbed and
//! logged, reads return `None` instead of erroring, and every call fails
//! over to the [`MemoryStore`] fallback within the same call. Connection
//! retries happen only in the background reconnect loop — individual
//! get/set/delete calls are never retried synchronously.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::cache::memory::MemoryStore;
use crate::config::CacheConfig;
use crate::error::AuthError;

/// Shared cache handle. Cloning is cheap and clones observe the same
/// connection state and fallback contents.
#[derive(Clone)]
pub struct CacheStore {
    remote: Arc<RwLock<Option<ConnectionManager>>>,
    fallback: MemoryStore,
    config: Arc<CacheConfig>,
}

impl CacheStore {
    /// Connect to the configured backend. Construction itself never fails:
    /// when the initial attempt errors, a background task retries with
    /// exponential backoff (doubling from `backoff_base` up to
    /// `backoff_cap`, at most `max_retries` times) and the store serves the
    /// in-memory fallback in the meantime. Once the retry budget is spent
    /// the store stays on the fallback until the process restarts.
    pub async fn connect(config: CacheConfig) -> Self {
        let store = Self {
            remote: Arc::new(RwLock::new(None)),
            fallback: MemoryStore::new(),
            config: Arc::new(config),
        };

        match open_connection(&store.config).await {
            Ok(conn) => {
                *store.remote.write().await = Some(conn);
                info!(url = %store.config.url, "cache connected");
            }
            Err(err) => {
                warn!(error = %err, "initial cache connection failed, scheduling reconnect");
                store.spawn_reconnect();
            }
        }

        store
    }

    /// A store with no remote backend at all; everything lives in the
    /// fallback map. Useful for tests and for running without Redis.
    #[must_use]
    pub fn detached(config: CacheConfig) -> Self {
        Self {
            remote: Arc::new(RwLock::new(None)),
            fallback: MemoryStore::new(),
            config: Arc::new(config),
        }
    }

    /// Service name this store namespaces shared keys under.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.config.service
    }

    /// Session TTL configured for this deployment.
    #[must_use]
    pub fn session_ttl(&self) -> Duration {
        self.config.session_ttl
    }

    /// Whether a remote connection is currently established.
    pub async fn is_remote_connected(&self) -> bool {
        self.remote.read().await.is_some()
    }

    /// Read a value. Never errors; a failed remote read is logged and the
    /// fallback is consulted instead.
    pub async fn get(&self, key: &str) -> Option<String> {
        let conn = self.remote.read().await.clone();
        if let Some(mut conn) = conn {
            match conn.get::<_, Option<String>>(key).await {
                Ok(value) => return value,
                Err(err) => {
                    debug!(key, error = %err, "cache get failed, using fallback");
                }
            }
        }
        self.fallback.get(key)
    }

    /// Write a value with an optional TTL. Never errors; a failed remote
    /// write lands in the fallback instead.
    pub async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) {
        let conn = self.remote.read().await.clone();
        if let Some(mut conn) = conn {
            let outcome = match ttl {
                Some(ttl) => conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await,
                None => conn.set::<_, _, ()>(key, value).await,
            };
            match outcome {
                Ok(()) => return,
                Err(err) => {
                    debug!(key, error = %err, "cache set failed, using fallback");
                }
            }
        }
        self.fallback.set(key, value, ttl);
    }

    /// Delete a key. Never errors. The fallback is always cleared as well
    /// so a key deleted during an outage window does not resurface.
    pub async fn delete(&self, key: &str) {
        let conn = self.remote.read().await.clone();
        if let Some(mut conn) = conn {
            if let Err(err) = conn.del::<_, ()>(key).await {
                debug!(key, error = %err, "cache delete failed on remote");
            }
        }
        self.fallback.delete(key);
    }

    /// Read a value, distinguishing a live remote failure from a miss.
    ///
    /// This is the one seam where callers may care about degraded reads:
    /// the blacklist check uses it to apply its fail-open/fail-closed
    /// policy. When the store is parked on the fallback (no remote), the
    /// fallback answer is authoritative and no error is reported.
    pub(crate) async fn try_get(&self, key: &str) -> Result<Option<String>, AuthError> {
        let conn = self.remote.read().await.clone();
        match conn {
            Some(mut conn) => match conn.get::<_, Option<String>>(key).await {
                Ok(value) => Ok(value),
                Err(err) => Err(AuthError::CacheUnavailable(err.to_string())),
            },
            None => Ok(self.fallback.get(key)),
        }
    }

    fn spawn_reconnect(&self) {
        let remote = Arc::clone(&self.remote);
        let config = Arc::clone(&self.config);

        tokio::spawn(async move {
            let mut delay = config.backoff_base;
            for attempt in 1..=config.max_retries {
                tokio::time::sleep(delay).await;
                match open_connection(&config).await {
                    Ok(conn) => {
                        *remote.write().await = Some(conn);
                        info!(attempt, "cache reconnected");
                        return;
                    }
                    Err(err) => {
                        warn!(attempt, error = %err, "cache reconnect failed");
                        delay = (delay * 2).min(config.backoff_cap);
                    }
                }
            }
            warn!(
                retries = config.max_retries,
                "cache unreachable, switching to in-memory fallback until restart"
            );
        });
    }
}

async fn open_connection(config: &CacheConfig) -> Result<ConnectionManager, redis::RedisError> {
    let client = redis::Client::open(config.url.as_str())?;
    // Reconnect scheduling is owned by the store's own backoff loop, so the
    // manager gets a single attempt per call.
    let manager_config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(config.connect_timeout);
    ConnectionManager::new_with_config(client, manager_config).await
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("service", &self.config.service)
            .field("url", &self.config.url)
            .finish()
    }
}
