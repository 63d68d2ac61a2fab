//! Asset cache statistics
//!
//! Display: "N cached, H hits / M misses (R% hit rate), P preloaded, F failed, I in flight"

use serde::{Deserialize, Serialize};

/// Running counters owned by the cache
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Counters {
    pub hits: u64,
    pub misses: u64,
    pub preloaded: u64,
    pub failed: u64,
}

/// Read-only snapshot of cache activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Requests answered from a ready entry
    pub hits: u64,
    /// Requests that started a new load (prefetch loads count as `preloaded` only)
    pub misses: u64,
    /// Assets loaded by prefetch
    pub preloaded: u64,
    /// Loads that exhausted their retries
    pub failed: u64,
    /// Ready entries
    pub cache_size: usize,
    /// Keys with a load in flight
    pub in_flight_count: usize,
    /// `hits / (hits + misses)`, 0 before any lookup
    pub hit_rate: f64,
}

impl CacheStats {
    pub(crate) fn from_counters(counters: &Counters, cache_size: usize, in_flight_count: usize) -> Self {
        let lookups = counters.hits + counters.misses;
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            counters.hits as f64 / lookups as f64
        };

        Self {
            hits: counters.hits,
            misses: counters.misses,
            preloaded: counters.preloaded,
            failed: counters.failed,
            cache_size,
            in_flight_count,
            hit_rate,
        }
    }

    pub fn display_string(&self) -> String {
        format!(
            "{} cached, {} hits / {} misses ({:.1}% hit rate), {} preloaded, {} failed, {} in flight",
            self.cache_size,
            self.hits,
            self.misses,
            self.hit_rate * 100.0,
            self.preloaded,
            self.failed,
            self.in_flight_count
        )
    }
}
