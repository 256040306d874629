use std::env;
use std::time::Duration;

/// Tunables for terms lookups, loaded from `FLAPJACK_LOOKUP_*` environment
/// variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupConfig {
    /// Connection cap for each SQL pool.
    pub pool_max_connections: u32,
    /// How long a SQL fetch waits for a pooled connection (seconds).
    pub pool_acquire_timeout_secs: u64,
    /// Default HTTP timeout when a lookup does not set one (milliseconds).
    pub http_timeout_ms: u64,
    /// Built filters kept by a lookup service before the least recently used
    /// is evicted.
    pub filter_cache_max_entries: usize,
}

impl Default for LookupConfig {
    fn default() -> Self {
        LookupConfig {
            pool_max_connections: 20,
            pool_acquire_timeout_secs: 30,
            http_timeout_ms: 300,
            filter_cache_max_entries: 1024,
        }
    }
}

impl LookupConfig {
    pub fn from_env() -> Self {
        let defaults = LookupConfig::default();
        LookupConfig {
            pool_max_connections: env::var("FLAPJACK_LOOKUP_POOL_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.pool_max_connections),
            pool_acquire_timeout_secs: env::var("FLAPJACK_LOOKUP_POOL_ACQUIRE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.pool_acquire_timeout_secs),
            http_timeout_ms: env::var("FLAPJACK_LOOKUP_HTTP_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.http_timeout_ms),
            filter_cache_max_entries: env::var("FLAPJACK_LOOKUP_FILTER_CACHE_MAX")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.filter_cache_max_entries),
        }
    }

    pub fn pool_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_acquire_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}
