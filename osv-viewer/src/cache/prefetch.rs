//! Two-phase prioritized prefetch
//!
//! Phase 1 loads the priority slices of every view; phase 2 loads everything
//! else. Both run in batches of `max_concurrent` with settle-all execution,
//! so one failing key never aborts its siblings. Between batches the pacer
//! waits longer the more of the phase's recent loads failed.

use super::{AssetCache, CacheKey, Lookup};
use futures::future::join_all;
use osv_common::events::{PrefetchPhase, ViewerEvent};
use osv_common::{CacheSettings, ImageManifest, View};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tracing::{debug, info};

/// Per-phase counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PhaseReport {
    pub phase: PrefetchPhase,
    /// Keys a load was awaited for
    pub attempted: usize,
    /// Keys that ended up ready
    pub loaded: usize,
    /// Keys that failed permanently
    pub failed: usize,
    /// Keys already ready or blacklisted when their batch came up
    pub skipped: usize,
}

impl PhaseReport {
    fn new(phase: PrefetchPhase) -> Self {
        Self {
            phase,
            attempted: 0,
            loaded: 0,
            failed: 0,
            skipped: 0,
        }
    }
}

/// Result of one `preload` call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrefetchReport {
    /// Completed (or interrupted) phases, in order
    pub phases: Vec<PhaseReport>,
    /// A restart took over before this run finished
    pub superseded: bool,
    /// Another run was active, so this call did nothing
    pub skipped_already_running: bool,
}

impl PrefetchReport {
    pub fn loaded(&self) -> usize {
        self.phases.iter().map(|p| p.loaded).sum()
    }

    pub fn failed(&self) -> usize {
        self.phases.iter().map(|p| p.failed).sum()
    }
}

/// Center slice followed by its neighbors out to `radius`, alternating below/above
pub fn priority_slices(slice_count: usize, radius: usize) -> Vec<usize> {
    if slice_count == 0 {
        return Vec::new();
    }

    let center = slice_count / 2;
    let mut slices = vec![center];
    for distance in 1..=radius {
        if let Some(below) = center.checked_sub(distance) {
            slices.push(below);
        }
        if center + distance < slice_count {
            slices.push(center + distance);
        }
    }
    slices
}

/// Marks a run finished when dropped, including when the `preload` future
/// is cancelled; a no-op once a restart has moved to a newer generation
struct RunGuard<'a> {
    cache: &'a AssetCache,
    generation: u64,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.cache.end_prefetch(self.generation);
    }
}

#[derive(Debug, Clone)]
struct PrefetchItem {
    key: CacheKey,
    url: String,
}

enum ItemOutcome {
    Loaded,
    Failed,
    Skipped,
}

/// Adaptive inter-batch pause
#[derive(Debug)]
struct Pacer {
    base: Duration,
    max: Duration,
    window: usize,
    /// `true` marks a failure
    recent: VecDeque<bool>,
}

impl Pacer {
    fn new(settings: &CacheSettings) -> Self {
        Self {
            base: settings.batch_pause(),
            max: settings.max_batch_pause(),
            window: settings.pacing_window.max(1),
            recent: VecDeque::new(),
        }
    }

    fn record(&mut self, failed: bool) {
        if self.recent.len() == self.window {
            self.recent.pop_front();
        }
        self.recent.push_back(failed);
    }

    fn failure_ratio(&self) -> f64 {
        if self.recent.is_empty() {
            return 0.0;
        }
        self.recent.iter().filter(|f| **f).count() as f64 / self.recent.len() as f64
    }

    fn pause(&self) -> Duration {
        let spread = self.max.saturating_sub(self.base);
        self.base + spread.mul_f64(self.failure_ratio())
    }
}

impl AssetCache {
    /// Load priority slices of every view, then everything else
    ///
    /// Returns immediately if another prefetch run is active. A run replaced
    /// by [`AssetCache::restart`] stops at its next batch boundary.
    pub async fn preload(&self, manifest: &ImageManifest, priority: &[usize]) -> PrefetchReport {
        let Some(run) = self.begin_prefetch() else {
            info!("Prefetch already running, ignoring request");
            return PrefetchReport {
                skipped_already_running: true,
                ..Default::default()
            };
        };
        let generation = run.generation;

        let mut seen = HashSet::new();
        let priority: Vec<usize> = priority.iter().copied().filter(|s| seen.insert(*s)).collect();

        let priority_items: Vec<PrefetchItem> = View::ALL
            .into_iter()
            .flat_map(|view| {
                priority.iter().filter_map(move |&slice| {
                    manifest.url(view, slice).map(|url| PrefetchItem {
                        key: CacheKey::new(view, slice),
                        url: url.to_string(),
                    })
                })
            })
            .collect();

        let priority_keys: HashSet<CacheKey> = priority_items.iter().map(|i| i.key).collect();
        let remaining_items: Vec<PrefetchItem> = manifest
            .entries()
            .map(|(view, slice, url)| PrefetchItem {
                key: CacheKey::new(view, slice),
                url: url.to_string(),
            })
            .filter(|item| !priority_keys.contains(&item.key))
            .collect();

        info!(
            generation,
            priority = priority_items.len(),
            remaining = remaining_items.len(),
            "Starting prefetch"
        );

        let mut report = PrefetchReport::default();

        for (phase, items) in [
            (PrefetchPhase::Priority, priority_items),
            (PrefetchPhase::Remaining, remaining_items),
        ] {
            let (phase_report, superseded) = self.run_phase(phase, &items, generation).await;
            report.phases.push(phase_report);
            if superseded {
                info!(generation, ?phase, "Prefetch superseded by restart");
                report.superseded = true;
                return report;
            }
        }

        drop(run);
        info!(
            generation,
            loaded = report.loaded(),
            failed = report.failed(),
            "Prefetch complete"
        );
        report
    }

    /// Cancel an active (possibly stuck) prefetch and start a fresh one
    ///
    /// The active run's in-flight bookkeeping is dropped; its loads finish in
    /// the background and still populate the cache. Keys the fresh run reaches
    /// before those loads finish are fetched a second time.
    pub async fn restart(&self, manifest: &ImageManifest, priority: &[usize]) -> PrefetchReport {
        if self.cancel_prefetch() {
            let pause = self.inner.settings.restart_pause();
            info!(pause_ms = pause.as_millis() as u64, "Restarting prefetch");
            tokio::time::sleep(pause).await;
        }
        self.preload(manifest, priority).await
    }

    /// Whether a prefetch run is active
    pub fn prefetch_active(&self) -> bool {
        self.inner.lock_state().prefetch.active
    }

    fn begin_prefetch(&self) -> Option<RunGuard<'_>> {
        let mut state = self.inner.lock_state();
        if state.prefetch.active {
            return None;
        }
        state.prefetch.active = true;
        state.prefetch.generation += 1;
        Some(RunGuard {
            cache: self,
            generation: state.prefetch.generation,
        })
    }

    fn is_current_run(&self, generation: u64) -> bool {
        let state = self.inner.lock_state();
        state.prefetch.active && state.prefetch.generation == generation
    }

    fn end_prefetch(&self, generation: u64) {
        let mut state = self.inner.lock_state();
        if state.prefetch.generation == generation {
            state.prefetch.active = false;
        }
    }

    /// Returns whether a run was active
    fn cancel_prefetch(&self) -> bool {
        let mut state = self.inner.lock_state();
        if !state.prefetch.active {
            return false;
        }
        state.prefetch.active = false;
        state.prefetch.generation += 1;
        state.loading.clear();
        true
    }

    /// Returns the phase report and whether the run was superseded
    async fn run_phase(&self, phase: PrefetchPhase, items: &[PrefetchItem], generation: u64) -> (PhaseReport, bool) {
        let batch_size = self.inner.settings.max_concurrent.max(1);
        let mut pacer = Pacer::new(&self.inner.settings);
        let mut report = PhaseReport::new(phase);
        let mut batches = items.chunks(batch_size).peekable();

        while let Some(batch) = batches.next() {
            if !self.is_current_run(generation) {
                return (report, true);
            }

            let outcomes = join_all(batch.iter().map(|item| self.prefetch_one(item))).await;

            for outcome in outcomes {
                match outcome {
                    ItemOutcome::Loaded => {
                        report.attempted += 1;
                        report.loaded += 1;
                        pacer.record(false);
                    }
                    ItemOutcome::Failed => {
                        report.attempted += 1;
                        report.failed += 1;
                        pacer.record(true);
                    }
                    ItemOutcome::Skipped => report.skipped += 1,
                }
            }

            if batches.peek().is_some() {
                let pause = pacer.pause();
                debug!(
                    ?phase,
                    pause_ms = pause.as_millis() as u64,
                    failure_ratio = pacer.failure_ratio(),
                    "Pausing between prefetch batches"
                );
                tokio::time::sleep(pause).await;
            }
        }

        info!(
            ?phase,
            attempted = report.attempted,
            loaded = report.loaded,
            failed = report.failed,
            skipped = report.skipped,
            "Prefetch phase complete"
        );
        self.inner.emit(ViewerEvent::PrefetchPhaseCompleted {
            phase,
            attempted: report.attempted,
            loaded: report.loaded,
            failed: report.failed,
            timestamp: chrono::Utc::now(),
        });

        (report, false)
    }

    /// Load one key unless it is already ready or blacklisted
    async fn prefetch_one(&self, item: &PrefetchItem) -> ItemOutcome {
        let (load, started) = match self.lookup_for_prefetch(item) {
            Some(pending) => pending,
            None => return ItemOutcome::Skipped,
        };

        match load.await {
            Ok(_) => {
                if started {
                    self.inner.lock_state().counters.preloaded += 1;
                }
                ItemOutcome::Loaded
            }
            Err(_) => ItemOutcome::Failed,
        }
    }

    /// Skip keys settled since the batch was planned; counts neither hits nor misses
    fn lookup_for_prefetch(&self, item: &PrefetchItem) -> Option<(super::SharedLoad, bool)> {
        {
            let state = self.inner.lock_state();
            if state.ready.contains_key(&item.key) || state.blacklist.contains_key(&item.url) {
                return None;
            }
        }

        // Re-validated under the lock inside `lookup`
        match self.lookup(item.key, &item.url, false) {
            Lookup::Pending { load, started } => Some((load, started)),
            Lookup::Hit(_) | Lookup::Rejected(_) => None,
        }
    }
}
