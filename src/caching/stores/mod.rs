//! # Cache Stores Module
//!
//! This module provides the cache store implementations: an in-process map and Redis.
//! Both persist the same [`CacheEntry`] shape.

pub mod memory;
pub mod redis_store;

pub use memory::InMemoryCache;
pub use redis_store::RedisCache;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::CacheResult;
use crate::core::config::StoreConfig;
use crate::core::types::GatewayResponse;
use crate::core::values::Header;

/// A stored response with its expiry metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,

    pub status_code: u16,

    pub header: Header,

    #[serde(with = "base64_body")]
    pub body: Vec<u8>,

    /// When the entry was written
    pub stored_at: DateTime<Utc>,

    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, response: &GatewayResponse, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            status_code: response.status.as_u16(),
            header: response.header.clone(),
            body: response.body.to_vec(),
            stored_at: Utc::now(),
            ttl,
        }
    }

    /// Time since the entry was written
    pub fn age(&self) -> Duration {
        (Utc::now() - self.stored_at).to_std().unwrap_or_default()
    }

    /// Time left before the entry expires
    pub fn remaining_ttl(&self) -> Duration {
        self.ttl.saturating_sub(self.age())
    }

    pub fn is_expired(&self) -> bool {
        self.age() >= self.ttl
    }

    /// Rebuild the stored response
    pub fn to_response(&self) -> GatewayResponse {
        GatewayResponse::new(
            StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::OK),
            self.header.clone(),
            self.body.clone(),
        )
    }
}

/// Trait for cache store implementations
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Get an entry; expired entries are never returned
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>>;

    /// Store an entry for `ttl`, replacing any previous one
    async fn set(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> CacheResult<()>;

    /// Release background tasks and connections
    async fn close(&self) -> CacheResult<()>;
}

/// Build the store selected by configuration
pub async fn create_store(config: &StoreConfig) -> CacheResult<Arc<dyn CacheStore>> {
    match config {
        StoreConfig::Memory(memory) => Ok(Arc::new(InMemoryCache::new(memory.clone()))),
        StoreConfig::Redis(redis) => Ok(Arc::new(RedisCache::new(&redis.url)?)),
    }
}

mod base64_body {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(body: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(body))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
