//! Resilient asset cache
//!
//! Maps `(view, slice)` to a loaded image handle and owns every network
//! retrieval behind it:
//! - at most one load per key at any time (late requesters attach to it)
//! - at most `max_concurrent` network attempts across all keys
//! - bounded retries with shrinking timeouts and capped exponential backoff
//! - URLs that exhaust their retries are blacklisted until explicitly cleared
//!
//! All bookkeeping lives behind one mutex that is never held across an
//! `.await`, so every check-then-act sequence is atomic.

pub mod entry;
pub mod fetcher;
pub mod prefetch;
pub mod retry;
pub mod stats;

pub use entry::{AssetHandle, CacheKey, EntryState};
pub use fetcher::{AssetFetcher, FetchedAsset, HttpFetcher};
pub use prefetch::{priority_slices, PhaseReport, PrefetchReport};
pub use retry::RetryPolicy;
pub use stats::CacheStats;

use crate::error::AssetError;
use fetcher::ensure_image;
use futures::future::{BoxFuture, FutureExt, Shared};
use osv_common::events::{EventBus, ViewerEvent};
use osv_common::{CacheSettings, ConfigError, View};
use stats::Counters;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

type LoadResult = Result<AssetHandle, AssetError>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

/// One in-flight load; `id` tells a load apart from a later one for the same key
struct InFlight {
    id: u64,
    load: SharedLoad,
}

/// Prefetch run guard
#[derive(Debug, Default)]
struct PrefetchRun {
    active: bool,
    generation: u64,
}

#[derive(Default)]
struct CacheState {
    /// Bumped by `clear`; loads started under an older epoch do not write back
    epoch: u64,
    ready: HashMap<CacheKey, AssetHandle>,
    loading: HashMap<CacheKey, InFlight>,
    /// URL → reason of the last failure
    blacklist: HashMap<String, String>,
    permanent_failures: HashMap<CacheKey, String>,
    retry_delays: HashMap<String, Duration>,
    counters: Counters,
    prefetch: PrefetchRun,
}

struct CacheInner {
    fetcher: Arc<dyn AssetFetcher>,
    settings: CacheSettings,
    policy: RetryPolicy,
    permits: Semaphore,
    state: Mutex<CacheState>,
    next_load_id: AtomicU64,
    events: OnceLock<EventBus>,
}

/// Outcome of the synchronous part of a request
enum Lookup {
    Hit(AssetHandle),
    Rejected(AssetError),
    Pending { load: SharedLoad, started: bool },
}

/// Deduplicating, rate-limited, self-healing asset cache
///
/// Cheap to clone; clones share one cache.
#[derive(Clone)]
pub struct AssetCache {
    inner: Arc<CacheInner>,
}

impl AssetCache {
    pub fn new(fetcher: Arc<dyn AssetFetcher>, settings: CacheSettings) -> Result<Self, ConfigError> {
        settings.validate()?;

        Ok(Self {
            inner: Arc::new(CacheInner {
                fetcher,
                policy: RetryPolicy::from_settings(&settings),
                permits: Semaphore::new(settings.max_concurrent),
                settings,
                state: Mutex::new(CacheState::default()),
                next_load_id: AtomicU64::new(1),
                events: OnceLock::new(),
            }),
        })
    }

    /// Publish load failures and prefetch progress on `bus`
    ///
    /// Only the first bus set on a cache is used.
    pub fn with_event_bus(self, bus: EventBus) -> Self {
        if self.inner.events.set(bus).is_err() {
            warn!("Asset cache already has an event bus; keeping the first one");
        }
        self
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.inner.settings
    }

    /// Asset for a slice, loading it if needed
    ///
    /// Ready entries return immediately. A key already loading is joined
    /// rather than fetched twice. Blacklisted URLs fail without touching the
    /// network.
    pub async fn request(&self, view: View, slice: usize, url: &str) -> LoadResult {
        match self.lookup(CacheKey::new(view, slice), url, true) {
            Lookup::Hit(handle) => Ok(handle),
            Lookup::Rejected(err) => Err(err),
            Lookup::Pending { load, .. } => load.await,
        }
    }

    /// `counted` is false for prefetch lookups, which are tallied as `preloaded` instead
    fn lookup(&self, key: CacheKey, url: &str, counted: bool) -> Lookup {
        let mut state = self.inner.lock_state();

        if let Some(handle) = state.ready.get(&key).cloned() {
            if counted {
                state.counters.hits += 1;
            }
            debug!(key = %key, "Cache hit");
            return Lookup::Hit(handle);
        }

        if let Some(reason) = state.blacklist.get(url).cloned() {
            debug!(key = %key, url = %url, "Rejecting blacklisted URL");
            return Lookup::Rejected(AssetError::PermanentlyBlacklisted {
                url: url.to_string(),
                reason,
            });
        }

        if let Some(in_flight) = state.loading.get(&key) {
            debug!(key = %key, "Attaching to in-flight load");
            return Lookup::Pending {
                load: in_flight.load.clone(),
                started: false,
            };
        }

        if counted {
            state.counters.misses += 1;
        }
        let load = self.start_load(&mut state, key, url);
        Lookup::Pending { load, started: true }
    }

    /// Register and spawn a new load; caller holds the state lock
    fn start_load(&self, state: &mut CacheState, key: CacheKey, url: &str) -> SharedLoad {
        let id = self.inner.next_load_id.fetch_add(1, Ordering::Relaxed);
        let epoch = state.epoch;
        let inner = Arc::clone(&self.inner);
        let url = url.to_string();

        debug!(key = %key, url = %url, load_id = id, "Cache miss, starting load");

        let load = async move { inner.load_with_retry(key, url, id, epoch).await }
            .boxed()
            .shared();

        state.loading.insert(
            key,
            InFlight {
                id,
                load: load.clone(),
            },
        );

        // Drive the load to completion even if every requester goes away
        tokio::spawn(load.clone());

        load
    }

    /// Ready asset for a key, without loading or counting a lookup
    pub fn get(&self, view: View, slice: usize) -> Option<AssetHandle> {
        self.inner
            .lock_state()
            .ready
            .get(&CacheKey::new(view, slice))
            .cloned()
    }

    /// Lifecycle state of a key
    pub fn entry_state(&self, view: View, slice: usize) -> EntryState {
        let key = CacheKey::new(view, slice);
        let state = self.inner.lock_state();

        if state.ready.contains_key(&key) {
            EntryState::Ready
        } else if state.loading.contains_key(&key) {
            EntryState::Loading
        } else if let Some(reason) = state.permanent_failures.get(&key) {
            EntryState::FailedPermanent {
                reason: reason.clone(),
            }
        } else {
            EntryState::Empty
        }
    }

    pub fn is_blacklisted(&self, url: &str) -> bool {
        self.inner.lock_state().blacklist.contains_key(url)
    }

    pub fn blacklist_len(&self) -> usize {
        self.inner.lock_state().blacklist.len()
    }

    /// Backoff currently scheduled for a URL
    pub fn retry_delay(&self, url: &str) -> Option<Duration> {
        self.inner.lock_state().retry_delays.get(url).copied()
    }

    /// Full reset: drops every cached handle, in-flight record, blacklist
    /// entry, scheduled delay and statistic
    ///
    /// Loads already running still answer their waiters but no longer write
    /// into the cache.
    pub fn clear(&self) {
        let released = {
            let mut state = self.inner.lock_state();
            let released = state.ready.len();
            state.epoch += 1;
            state.ready.clear();
            state.loading.clear();
            state.blacklist.clear();
            state.permanent_failures.clear();
            state.retry_delays.clear();
            state.counters = Counters::default();
            released
        };

        info!(released, "Asset cache cleared");
        self.inner.emit(ViewerEvent::CacheCleared {
            timestamp: chrono::Utc::now(),
        });
    }

    /// Forget permanent failures so those URLs may be retried; ready entries stay
    pub fn clear_blacklist(&self) {
        let cleared = {
            let mut state = self.inner.lock_state();
            let cleared = state.blacklist.len();
            state.blacklist.clear();
            state.permanent_failures.clear();
            state.retry_delays.clear();
            cleared
        };

        info!(cleared, "Asset blacklist cleared");
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.lock_state();
        CacheStats::from_counters(&state.counters, state.ready.len(), state.loading.len())
    }
}

impl CacheInner {
    fn lock_state(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: ViewerEvent) {
        if let Some(bus) = self.events.get() {
            bus.emit_lossy(event);
        }
    }

    /// Bounded retry loop for one key
    async fn load_with_retry(self: Arc<Self>, key: CacheKey, url: String, id: u64, epoch: u64) -> LoadResult {
        let mut attempts_used = 0u32;

        loop {
            let timeout = self.policy.attempt_timeout(attempts_used);
            let outcome = self.attempt(&url, timeout).await;
            attempts_used += 1;

            let err = match outcome {
                Ok(handle) => {
                    self.finish_success(key, &url, id, epoch, &handle);
                    if attempts_used > 1 {
                        info!(key = %key, url = %url, attempts = attempts_used, "Asset loaded after retry");
                    }
                    return Ok(handle);
                }
                Err(err) => err,
            };

            if !self.policy.should_retry(attempts_used) {
                return Err(self.finish_failure(key, &url, id, epoch, &err, attempts_used));
            }

            let delay = self.policy.sample_backoff(attempts_used);
            warn!(
                key = %key,
                url = %url,
                attempt = attempts_used,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Asset load failed, will retry after backoff"
            );

            {
                let mut state = self.lock_state();
                if state.epoch == epoch {
                    state.retry_delays.insert(url.clone(), delay);
                }
            }

            tokio::time::sleep(delay).await;
        }
    }

    /// One network attempt, holding a concurrency permit, raced against `timeout`
    ///
    /// On timeout the fetch future is dropped, so a late response is never seen.
    async fn attempt(&self, url: &str, timeout: Duration) -> LoadResult {
        let _permit = self.permits.acquire().await.map_err(|e| AssetError::Http {
            url: url.to_string(),
            status: None,
            message: e.to_string(),
        })?;

        let fetched = match tokio::time::timeout(timeout, self.fetcher.fetch(url)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(AssetError::Timeout {
                    url: url.to_string(),
                    after: timeout,
                })
            }
        };

        ensure_image(url, &fetched)?;
        Ok(AssetHandle::new(url, fetched.content_type, fetched.bytes))
    }

    fn finish_success(&self, key: CacheKey, url: &str, id: u64, epoch: u64, handle: &AssetHandle) {
        let mut state = self.lock_state();

        if state.epoch == epoch {
            state.retry_delays.remove(url);
            state.ready.insert(key, handle.clone());
        }
        if state.loading.get(&key).map(|f| f.id) == Some(id) {
            state.loading.remove(&key);
        }
    }

    fn finish_failure(
        &self,
        key: CacheKey,
        url: &str,
        id: u64,
        epoch: u64,
        err: &AssetError,
        attempts: u32,
    ) -> AssetError {
        let reason = err.to_string();

        {
            let mut state = self.lock_state();
            if state.epoch == epoch {
                state.blacklist.insert(url.to_string(), reason.clone());
                state.permanent_failures.insert(key, reason.clone());
                state.retry_delays.remove(url);
                state.counters.failed += 1;
            }
            if state.loading.get(&key).map(|f| f.id) == Some(id) {
                state.loading.remove(&key);
            }
        }

        error!(key = %key, url = %url, attempts, reason = %reason, "Asset blacklisted after exhausting retries");

        self.emit(ViewerEvent::AssetFailed {
            view: key.view,
            slice: key.slice,
            url: url.to_string(),
            reason: reason.clone(),
            timestamp: chrono::Utc::now(),
        });

        AssetError::PermanentlyBlacklisted {
            url: url.to_string(),
            reason,
        }
    }
}

impl std::fmt::Debug for AssetCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetCache")
            .field("settings", &self.inner.settings)
            .field("stats", &self.stats())
            .finish()
    }
}
