//! Short-TTL lease cache.
//!
//! An optional accelerator that mirrors lease and data operations as
//! TTL-bounded keys. The record store stays authoritative; every cache
//! failure falls back to it.
//!
//! # Key Format
//!
//! ```text
//! <prefix>:player:<id>:lock   -> owner id      (ttl = lease ttl)
//! <prefix>:player:<id>:data   -> state blob    (ttl = data ttl)
//! ```

mod memory;
mod redis_backend;
mod traits;

pub use memory::InMemoryLeaseCache;
pub use redis_backend::RedisLeaseCache;
pub use traits::LeaseCache;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use syncbridge_core::{config::parse_bool, EntityId};

// ============================================================================
// SETTINGS
// ============================================================================

/// Hybrid cache connection settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSettings {
    /// Whether the hybrid cache is used at all.
    pub enabled: bool,
    /// Redis connection URL.
    pub url: String,
    /// TTL for cached state blobs.
    pub data_ttl: Duration,
    /// Prefix for every key.
    pub key_prefix: String,
    /// Per-command timeout.
    pub timeout: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "redis://127.0.0.1:6379".to_string(),
            data_ttl: Duration::from_secs(300),
            key_prefix: "syncbridge".to_string(),
            timeout: Duration::from_millis(2_000),
        }
    }
}

impl CacheSettings {
    /// Create settings from environment variables.
    ///
    /// # Environment Variables
    /// - `SYNCBRIDGE_CACHE_ENABLED`: enable the hybrid cache (default: false)
    /// - `SYNCBRIDGE_CACHE_URL`: Redis URL (default: `redis://127.0.0.1:6379`)
    /// - `SYNCBRIDGE_CACHE_DATA_TTL_SECS`: blob ttl (default: 300)
    /// - `SYNCBRIDGE_CACHE_PREFIX`: key prefix (default: `syncbridge`)
    /// - `SYNCBRIDGE_CACHE_TIMEOUT_MS`: command timeout (default: 2000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: std::env::var("SYNCBRIDGE_CACHE_ENABLED")
                .ok()
                .and_then(|s| parse_bool(&s))
                .unwrap_or(defaults.enabled),
            url: std::env::var("SYNCBRIDGE_CACHE_URL").unwrap_or(defaults.url),
            data_ttl: std::env::var("SYNCBRIDGE_CACHE_DATA_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.data_ttl),
            key_prefix: std::env::var("SYNCBRIDGE_CACHE_PREFIX").unwrap_or(defaults.key_prefix),
            timeout: std::env::var("SYNCBRIDGE_CACHE_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.timeout),
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn with_data_ttl(mut self, ttl: Duration) -> Self {
        self.data_ttl = ttl;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn lock_key(&self, id: EntityId) -> String {
        format!("{}:player:{}:lock", self.key_prefix, id)
    }

    pub fn data_key(&self, id: EntityId) -> String {
        format!("{}:player:{}:data", self.key_prefix, id)
    }
}

// ============================================================================
// STATS
// ============================================================================

/// Counters for hybrid cache effectiveness.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub errors: AtomicU64,
    /// Loads served by the record store after a cache miss or error.
    pub fallbacks: AtomicU64,
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub errors: u64,
    pub fallbacks: u64,
}

impl CacheStatsSnapshot {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let settings = CacheSettings::default().with_key_prefix("hmt");
        let id = EntityId::nil();
        assert_eq!(
            settings.lock_key(id),
            "hmt:player:00000000-0000-0000-0000-000000000000:lock"
        );
        assert!(settings.data_key(id).ends_with(":data"));
    }

    #[test]
    fn test_disabled_by_default() {
        assert!(!CacheSettings::default().enabled);
    }

    #[test]
    fn test_hit_rate() {
        let stats = CacheStats::default();
        assert_eq!(stats.snapshot().hit_rate(), 0.0);
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert!((stats.snapshot().hit_rate() - 0.75).abs() < f64::EPSILON);
    }
}
