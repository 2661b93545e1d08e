//! # In-Memory Cache Store
//!
//! This module provides the in-process cache on a `DashMap`, with TTL support, an optional
//! entry bound and automatic cleanup of expired entries.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, info};

use super::{CacheEntry, CacheStore};
use crate::caching::{CacheError, CacheResult};
use crate::core::config::MemoryStoreConfig;

/// Snapshot of the store counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InMemoryCacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expired_cleanups: u64,
}

/// In-memory cache implementation
pub struct InMemoryCache {
    config: MemoryStoreConfig,

    /// Cache entries storage
    entries: Arc<DashMap<String, CacheEntry>>,

    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expired_cleanups: Arc<AtomicU64>,

    closed: AtomicBool,

    /// Cleanup task handle
    cleanup_task: JoinHandle<()>,
}

impl InMemoryCache {
    /// Create a new in-memory cache and start its cleanup task
    pub fn new(config: MemoryStoreConfig) -> Self {
        let entries = Arc::new(DashMap::new());
        let expired_cleanups = Arc::new(AtomicU64::new(0));

        let cleanup_task = {
            let entries = Arc::clone(&entries);
            let expired_cleanups = Arc::clone(&expired_cleanups);
            let cleanup_interval = config.cleanup_interval;

            tokio::spawn(async move {
                let mut interval = interval(cleanup_interval);
                loop {
                    interval.tick().await;
                    Self::cleanup_expired_entries(&entries, &expired_cleanups);
                }
            })
        };

        Self {
            config,
            entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expired_cleanups,
            closed: AtomicBool::new(false),
            cleanup_task,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> InMemoryCacheStats {
        InMemoryCacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expired_cleanups: self.expired_cleanups.load(Ordering::Relaxed),
        }
    }

    /// Drop every expired entry
    fn cleanup_expired_entries(entries: &DashMap<String, CacheEntry>, expired_cleanups: &AtomicU64) {
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired());
        let cleaned = before.saturating_sub(entries.len());

        if cleaned > 0 {
            expired_cleanups.fetch_add(cleaned as u64, Ordering::Relaxed);
            debug!("Cleaned up {} expired cache entries", cleaned);
        }
    }

    /// Make room for `key` when the store is at its bound, oldest entries first
    fn evict_if_needed(&self, key: &str) {
        let Some(max_entries) = self.config.max_entries else {
            return;
        };
        if self.entries.contains_key(key) {
            return;
        }

        while self.entries.len() >= max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().stored_at)
                .map(|entry| entry.key().clone());

            let Some(oldest) = oldest else {
                break;
            };
            if self.entries.remove(&oldest).is_some() {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                debug!(key = %oldest, "Evicted oldest cache entry");
            }
        }
    }

    fn ensure_open(&self) -> CacheResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Unavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for InMemoryCache {
    async fn get(&self, key: &str) -> CacheResult<Option<CacheEntry>> {
        self.ensure_open()?;

        let found = self.entries.get(key).map(|entry| entry.value().clone());
        match found {
            Some(entry) if entry.is_expired() => {
                self.entries.remove_if(key, |_, stored| stored.is_expired());
                self.expired_cleanups.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
            Some(entry) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(entry))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, entry: &CacheEntry, ttl: Duration) -> CacheResult<()> {
        self.ensure_open()?;
        self.evict_if_needed(key);

        let mut entry = entry.clone();
        entry.key = key.to_string();
        entry.ttl = ttl;
        entry.stored_at = Utc::now();
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn close(&self) -> CacheResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.cleanup_task.abort();
        let dropped = self.entries.len();
        self.entries.clear();
        info!("Closed in-memory cache, dropped {} entries", dropped);
        Ok(())
    }
}

impl Drop for InMemoryCache {
    fn drop(&mut self) {
        self.cleanup_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::GatewayResponse;
    use crate::core::values::Header;
    use axum::http::StatusCode;
    use tokio::time::sleep;

    fn create_test_entry(key: &str, body: &str) -> CacheEntry {
        let response = GatewayResponse::new(
            StatusCode::OK,
            Header::from_pairs([("X-Source", "test")]),
            body.as_bytes().to_vec(),
        );
        CacheEntry::new(key, &response, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_basic_operations() {
        let cache = InMemoryCache::new(MemoryStoreConfig::default());
        let entry = create_test_entry("GET:/a", "hello");

        cache.set("GET:/a", &entry, Duration::from_secs(60)).await.unwrap();
        let stored = cache.get("GET:/a").await.unwrap().unwrap();

        assert_eq!(stored.body, b"hello".to_vec());
        assert_eq!(stored.header, entry.header);
        assert_eq!(stored.status_code, 200);
        assert!(cache.get("GET:/b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ttl_expiration() {
        let cache = InMemoryCache::new(MemoryStoreConfig::default());
        let entry = create_test_entry("GET:/a", "short");

        cache.set("GET:/a", &entry, Duration::from_millis(100)).await.unwrap();
        assert!(cache.get("GET:/a").await.unwrap().is_some());

        sleep(Duration::from_millis(150)).await;

        assert!(cache.get("GET:/a").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_last_writer_wins() {
        let cache = InMemoryCache::new(MemoryStoreConfig::default());
        cache
            .set("k", &create_test_entry("k", "first"), Duration::from_secs(60))
            .await
            .unwrap();
        cache
            .set("k", &create_test_entry("k", "second"), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(cache.get("k").await.unwrap().unwrap().body, b"second".to_vec());
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_eviction_drops_oldest_entry() {
        let cache = InMemoryCache::new(MemoryStoreConfig {
            max_entries: Some(2),
            ..Default::default()
        });

        for key in ["a", "b", "c"] {
            cache
                .set(key, &create_test_entry(key, key), Duration::from_secs(60))
                .await
                .unwrap();
            sleep(Duration::from_millis(5)).await;
        }

        assert!(cache.get("a").await.unwrap().is_none());
        assert!(cache.get("b").await.unwrap().is_some());
        assert!(cache.get("c").await.unwrap().is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[tokio::test]
    async fn test_cleanup_task_sweeps_expired_entries() {
        let cache = InMemoryCache::new(MemoryStoreConfig {
            cleanup_interval: Duration::from_millis(20),
            ..Default::default()
        });
        cache
            .set("k", &create_test_entry("k", "v"), Duration::from_millis(10))
            .await
            .unwrap();

        sleep(Duration::from_millis(100)).await;

        assert!(cache.is_empty());
        assert!(cache.stats().expired_cleanups >= 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let cache = InMemoryCache::new(MemoryStoreConfig::default());
        cache
            .set("key1", &create_test_entry("key1", "v"), Duration::from_secs(60))
            .await
            .unwrap();
        cache.get("key1").await.unwrap(); // Hit
        cache.get("key2").await.unwrap(); // Miss

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.entries, 1);
    }

    #[tokio::test]
    async fn test_close_makes_store_unavailable() {
        let cache = InMemoryCache::new(MemoryStoreConfig::default());
        cache.close().await.unwrap();

        assert!(matches!(cache.get("k").await, Err(CacheError::Unavailable)));
        assert!(cache.close().await.is_ok());
    }
}
