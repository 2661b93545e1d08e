//! # Redis Cache Store
//!
//! Entries are stored as JSON under a key prefix, with expiry delegated to Redis (`SET EX`).
//! The connection is opened on first use, so the store can be built while Redis is down.
//! Connectivity failures while reading count as misses and writes are skipped, so an
//! unreachable Redis degrades to an uncached gateway.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{CacheEntry, CacheStore};
use crate::caching::{CacheError, CacheResult};

const KEY_PREFIX: &str = "gopen:cache:";

/// Upper bound on one connection attempt
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause between connection attempts after a failure
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Redis cache implementation
pub struct RedisCache {
    url: String,
    client: Client,

    /// Opened lazily; reconnects on its own once established
    connection_manager: OnceCell<ConnectionManager>,

    /// Milliseconds after `created` before the next connection attempt
    retry_after_ms: AtomicU64,
    created: Instant,

    closed: AtomicBool,
    connection_errors: AtomicU64,
}

impl RedisCache {
    /// Prepare a store for the Redis server at `url`; only the url is checked here
    pub fn new(url: &str) -> CacheResult<Self> {
        let client = Client::open(url)?;
        info!("Redis cache configured for {}", url);

        Ok(Self {
            url: url.to_string(),
            client,
            connection_manager: OnceCell::new(),
            retry_after_ms: AtomicU64::new(0),
            created: Instant::now(),
            closed: AtomicBool::new(false),
            connection_errors: AtomicU64::new(0),
        })
    }

    pub fn connection_errors(&self) -> u64 {
        self.connection_errors.load(Ordering::Relaxed)
    }

    /// Get the full cache key with prefix
    fn full_key(key: &str) -> String {
        format!("{}{}", KEY_PREFIX, key)
    }

    fn is_connectivity_error(error: &RedisError) -> bool {
        error.is_io_error()
            || error.is_connection_dropped()
            || error.is_connection_refusal()
            || error.is_timeout()
    }

    fn elapsed_ms(&self) -> u64 {
        self.created.elapsed().as_millis() as u64
    }

    fn record_connection_error(&self) {
        self.connection_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Shared connection, opening it on first use.
    ///
    /// `Unavailable` when the store is closed, when connecting fails, or while waiting out
    /// the delay after a failed attempt.
    async fn connection(&self) -> CacheResult<ConnectionManager> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Unavailable);
        }
        if let Some(manager) = self.connection_manager.get() {
            return Ok(manager.clone());
        }
        if self.elapsed_ms() < self.retry_after_ms.load(Ordering::Acquire) {
            return Err(CacheError::Unavailable);
        }

        let connected = self
            .connection_manager
            .get_or_try_init(|| async {
                let connect = ConnectionManager::new_with_backoff(self.client.clone(), 2, 100, 1);
                match tokio::time::timeout(CONNECT_TIMEOUT, connect).await {
                    Ok(Ok(manager)) => Ok(manager),
                    Ok(Err(e)) => Err(CacheError::Redis(e)),
                    Err(_) => Err(CacheError::Unavailable),
                }
            })
            .await;

        match connected {
            Ok(manager) => {
                info!("Redis cache connected to {}", self.url);
                Ok(manager.clone())
            }
            Err(e) => {
                self.record_connection_error();
                self.retry_after_ms.store(
                    self.elapsed_ms() + RECONNECT_DELAY.as_millis() as u64,
                    Ordering::Release,
                );
                warn!(url = %self.url, error = %e, "Cannot connect to Redis, caching suspended");
                Err(CacheError::Unavailable)
            }
        }
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Unavailable);
        }
        let Ok(mut conn) = self.connection().await else {
            debug!(key = %key, "Redis unavailable, treating as cache miss");
            return Ok(None);
        };

        let stored = match conn.get::<_, Option<Vec<u8>>>(Self::full_key(key)).await {
            Ok(stored) => stored,
            Err(e) if Self::is_connectivity_error(&e) => {
                self.record_connection_error();
                warn!(key = %key, error = %e, "Redis unreachable, treating as cache miss");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        match stored {
            Some(bytes) => {
                debug!("Redis cache hit for key: {}", key);
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            None => {
                debug!("Redis cache miss for key: {}", key);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> CacheResult<()> {
        let mut conn = self.connection().await?;
        let value = serde_json::to_vec(entry)?;
        // SET EX rejects zero
        let ttl_seconds = ttl.as_secs().max(1);

        if let Err(e) = conn
            .set_ex::<_, _, ()>(Self::full_key(key), value, ttl_seconds)
            .await
        {
            if Self::is_connectivity_error(&e) {
                self.record_connection_error();
            }
            return Err(e.into());
        }

        debug!("Set Redis cache key: {} with TTL: {:?}", key, ttl);
        Ok(())
    }

    async fn close(&self) -> CacheResult<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("Closed Redis cache at {}", self.url);
        }
        Ok(())
    }
}
