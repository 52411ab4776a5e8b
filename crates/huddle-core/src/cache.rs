//! Read-through cache for aggregated conversation reads.
//!
//! Values are stored as JSON text behind a pluggable [`CacheBackend`]. A
//! backend failure never reaches the caller: reads fall through to the live
//! computation and writes are skipped.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::Expiry;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::error::CoreError;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

#[derive(Clone)]
struct CachedPayload {
    body: Arc<str>,
    ttl: Duration,
}

/// Each entry expires after the TTL it was written with.
struct PerEntryTtl;

impl Expiry<String, CachedPayload> for PerEntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &CachedPayload,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedPayload,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process backend used when no Redis URL is configured.
pub struct MemoryBackend {
    entries: moka::future::Cache<String, CachedPayload>,
}

impl MemoryBackend {
    pub fn new(max_capacity: u64) -> Self {
        Self {
            entries: moka::future::Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(PerEntryTtl)
                .build(),
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.get(key).await.map(|p| p.body.to_string()))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let payload = CachedPayload {
            body: Arc::from(value),
            ttl,
        };
        self.entries.insert(key.to_string(), payload).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.invalidate(key).await;
        Ok(())
    }
}

pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("connected to redis cache backend");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1)).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct ReadThroughCache {
    backend: Arc<dyn CacheBackend>,
    /// Bumped by every invalidation in this process.
    generation: Arc<AtomicU64>,
}

impl ReadThroughCache {
    pub fn new(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn in_memory(max_capacity: u64) -> Self {
        Self::new(Arc::new(MemoryBackend::new(max_capacity)))
    }

    /// Return the cached value for `key`, or run `compute`, store its result
    /// for `ttl` and return it. Errors from `compute` are propagated and
    /// nothing is stored.
    ///
    /// If an invalidation in this process lands while `compute` runs, the
    /// stored value is dropped again so a write is never masked by an older
    /// read. Invalidations issued by other processes sharing a Redis backend
    /// are not tracked; there a stale entry can survive until its TTL.
    pub async fn get_or_compute<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<T, CoreError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        match self.backend.get(key).await {
            Ok(Some(raw)) => match serde_json::from_str::<T>(&raw) {
                Ok(value) => {
                    tracing::debug!(key, "cache hit");
                    return Ok(value);
                }
                Err(err) => {
                    tracing::warn!(key, error = %err, "discarding undecodable cache entry");
                    if let Err(err) = self.backend.delete(key).await {
                        tracing::warn!(key, error = %err, "failed to drop undecodable cache entry");
                    }
                }
            },
            Ok(None) => tracing::debug!(key, "cache miss"),
            Err(err) => {
                tracing::warn!(key, error = %err, "cache backend unavailable, reading through");
                return compute().await;
            }
        }

        let started = self.generation.load(Ordering::SeqCst);
        let value = compute().await?;
        match serde_json::to_string(&value) {
            Ok(payload) => {
                if let Err(err) = self.backend.set(key, payload, ttl).await {
                    tracing::warn!(key, error = %err, "failed to populate cache");
                } else if self.generation.load(Ordering::SeqCst) != started {
                    tracing::debug!(key, "invalidated while computing, dropping entry");
                    if let Err(err) = self.backend.delete(key).await {
                        tracing::warn!(key, error = %err, "failed to drop raced cache entry");
                    }
                }
            }
            Err(err) => tracing::warn!(key, error = %err, "failed to serialize cache value"),
        }
        Ok(value)
    }

    /// Delete every key. Keys that were never populated are ignored.
    ///
    /// The generation is bumped before deleting, so a concurrent
    /// `get_or_compute` either sees the bump or has its entry deleted here.
    pub async fn invalidate<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        self.generation.fetch_add(1, Ordering::SeqCst);
        for key in keys {
            let key = key.as_ref();
            match self.backend.delete(key).await {
                Ok(()) => tracing::debug!(key, "cache invalidated"),
                Err(err) => tracing::warn!(key, error = %err, "failed to invalidate cache key"),
            }
        }
    }
}

/// Key for the direct thread between two users, independent of who reads.
pub fn direct_thread_key(user_a: i64, user_b: i64) -> String {
    let (low, high) = if user_a <= user_b {
        (user_a, user_b)
    } else {
        (user_b, user_a)
    };
    format!("direct:{low}:{high}")
}

/// Keys a direct-message write must clear: the pair in both orderings.
pub fn direct_thread_invalidation_keys(user_a: i64, user_b: i64) -> Vec<String> {
    let mut keys = vec![format!("direct:{user_a}:{user_b}")];
    if user_a != user_b {
        keys.push(format!("direct:{user_b}:{user_a}"));
    }
    keys
}

pub fn group_thread_key(group_id: i64) -> String {
    format!("group:{group_id}")
}
