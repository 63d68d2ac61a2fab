//! Integration tests for two-phase prefetch

mod helpers;

use helpers::{cache_with, fast_settings, manifest, slice_url, MockFetcher, Reply};
use osv_common::events::{EventBus, PrefetchPhase, ViewerEvent};
use osv_common::{CacheSettings, View};
use osv_viewer::AssetCache;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

const PRIORITY: [usize; 3] = [3, 2, 4];

fn priority_urls() -> HashSet<String> {
    View::ALL
        .into_iter()
        .flat_map(|view| PRIORITY.iter().map(move |&s| slice_url(view, s)))
        .collect()
}

// ============================================================================
// Phase ordering
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_priority_phase_runs_before_remaining() {
    let fetcher = Arc::new(MockFetcher::new());
    let cache = cache_with(&fetcher);
    let manifest = manifest([7, 7, 7]);

    let report = cache.preload(&manifest, &PRIORITY).await;

    assert!(!report.superseded);
    assert!(!report.skipped_already_running);
    assert_eq!(report.phases.len(), 2);
    assert_eq!(report.phases[0].phase, PrefetchPhase::Priority);
    assert_eq!(report.phases[0].loaded, 9);
    assert_eq!(report.phases[1].phase, PrefetchPhase::Remaining);
    assert_eq!(report.phases[1].loaded, 12);

    let first_nine: HashSet<String> = fetcher.call_order().into_iter().take(9).collect();
    assert_eq!(first_nine, priority_urls());

    let stats = cache.stats();
    assert_eq!(stats.preloaded, 21);
    assert_eq!(stats.cache_size, 21);
    assert!(!cache.prefetch_active());
}

#[tokio::test(start_paused = true)]
async fn test_prefetch_loads_do_not_skew_hit_rate() {
    let fetcher = Arc::new(MockFetcher::new());
    let cache = cache_with(&fetcher);
    let manifest = manifest([3, 3, 3]);

    cache.preload(&manifest, &[1]).await;

    let stats = cache.stats();
    assert_eq!(stats.preloaded, 9);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.hits, 0);

    let url = slice_url(View::Sagittal, 2);
    cache.request(View::Sagittal, 2, &url).await.unwrap();

    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.hit_rate, 1.0);
    assert_eq!(fetcher.calls(&url), 1);
}

#[tokio::test(start_paused = true)]
async fn test_priority_list_is_deduplicated_and_range_checked() {
    let fetcher = Arc::new(MockFetcher::new());
    let cache = cache_with(&fetcher);
    let manifest = manifest([7, 7, 7]);

    let report = cache.preload(&manifest, &[3, 3, 99]).await;

    assert_eq!(report.phases[0].attempted, 3);
    assert_eq!(report.phases[1].attempted, 18);
    assert_eq!(fetcher.total_calls(), 21);
}

#[tokio::test(start_paused = true)]
async fn test_healthy_batches_pause_at_base_interval() {
    let fetcher = Arc::new(MockFetcher::new());
    let cache = cache_with(&fetcher);
    let manifest = manifest([3, 3, 3]);

    let started = Instant::now();
    let report = cache.preload(&manifest, &[]).await;
    let elapsed = started.elapsed();

    // Nine keys, three batches, two 10ms pauses
    assert_eq!(report.loaded(), 9);
    assert!(elapsed >= Duration::from_millis(20), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(25), "{:?}", elapsed);
}

#[tokio::test(start_paused = true)]
async fn test_failing_batch_lengthens_next_pause() {
    let fetcher = Arc::new(MockFetcher::new());
    let settings = CacheSettings {
        retries: 0,
        ..fast_settings()
    };
    let cache = AssetCache::new(fetcher.clone(), settings).unwrap();
    let manifest = manifest([3, 3, 3]);
    for slice in 0..3 {
        fetcher.always(&slice_url(View::Axial, slice), Reply::Status(500));
    }

    let started = Instant::now();
    let report = cache.preload(&manifest, &[]).await;
    let elapsed = started.elapsed();

    assert_eq!(report.failed(), 3);
    assert_eq!(report.loaded(), 6);
    // 3/3 failed -> 50ms, then 3/6 failed -> 10 + 40 * 0.5 = 30ms
    assert!(elapsed >= Duration::from_millis(80), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(85), "{:?}", elapsed);
}

// ============================================================================
// Fault isolation and skipping
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_one_failing_key_does_not_abort_prefetch() {
    let fetcher = Arc::new(MockFetcher::new());
    let cache = cache_with(&fetcher);
    let manifest = manifest([7, 7, 7]);
    let broken = slice_url(View::Coronal, 3);
    fetcher.always(&broken, Reply::Status(500));

    let report = cache.preload(&manifest, &PRIORITY).await;

    assert_eq!(report.failed(), 1);
    assert_eq!(report.loaded(), 20);
    assert_eq!(report.phases[0].failed, 1);
    assert!(cache.is_blacklisted(&broken));
    assert_eq!(cache.stats().preloaded, 20);
}

#[tokio::test(start_paused = true)]
async fn test_ready_and_blacklisted_keys_are_skipped() {
    let fetcher = Arc::new(MockFetcher::new());
    let cache = cache_with(&fetcher);
    let manifest = manifest([7, 7, 7]);
    let ready = slice_url(View::Axial, 3);
    let dead = slice_url(View::Axial, 0);
    fetcher.always(&dead, Reply::Status(404));

    cache.request(View::Axial, 3, &ready).await.unwrap();
    assert!(cache.request(View::Axial, 0, &dead).await.is_err());

    let report = cache.preload(&manifest, &PRIORITY).await;

    assert_eq!(report.phases[0].skipped, 1);
    assert_eq!(report.phases[1].skipped, 1);
    assert_eq!(report.loaded(), 19);
    assert_eq!(fetcher.calls(&ready), 1);
    assert_eq!(fetcher.calls(&dead), 3);
    assert_eq!(cache.stats().preloaded, 19);
}

// ============================================================================
// Run guard and restart
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_second_preload_is_ignored_while_running() {
    let fetcher = Arc::new(MockFetcher::with_latency(Duration::from_millis(100)));
    let cache = cache_with(&fetcher);
    let manifest = Arc::new(manifest([5, 5, 5]));

    let mut join_set = JoinSet::new();
    {
        let cache = cache.clone();
        let manifest = Arc::clone(&manifest);
        join_set.spawn(async move { cache.preload(&manifest, &[2]).await });
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(cache.prefetch_active());

    let ignored = cache.preload(&manifest, &[2]).await;
    assert!(ignored.skipped_already_running);
    assert!(ignored.phases.is_empty());

    let first = join_set.join_next().await.unwrap().unwrap();
    assert!(!first.superseded);
    assert_eq!(first.loaded(), 15);
    assert_eq!(fetcher.total_calls(), 15);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_preload_releases_run_guard() {
    let fetcher = Arc::new(MockFetcher::with_latency(Duration::from_millis(100)));
    let cache = cache_with(&fetcher);
    let manifest = manifest([3, 3, 3]);

    let cancelled = tokio::time::timeout(Duration::from_millis(10), cache.preload(&manifest, &[1])).await;
    assert!(cancelled.is_err());
    assert!(!cache.prefetch_active());

    let report = cache.preload(&manifest, &[1]).await;
    assert!(!report.skipped_already_running);
    assert!(!report.superseded);
    assert_eq!(report.phases.len(), 2);
    let settled: usize = report.phases.iter().map(|p| p.loaded + p.skipped).sum();
    assert_eq!(settled, 9);
    assert_eq!(cache.stats().cache_size, 9);
}

#[tokio::test(start_paused = true)]
async fn test_restart_supersedes_running_prefetch() {
    let fetcher = Arc::new(MockFetcher::with_latency(Duration::from_millis(100)));
    let bus = EventBus::new(64);
    let mut rx = bus.subscribe();
    let cache = cache_with(&fetcher).with_event_bus(bus);
    let manifest = Arc::new(manifest([7, 7, 7]));

    let mut join_set = JoinSet::new();
    {
        let cache = cache.clone();
        let manifest = Arc::clone(&manifest);
        join_set.spawn(async move { cache.preload(&manifest, &PRIORITY).await });
    }

    tokio::time::sleep(Duration::from_millis(10)).await;
    let fresh = cache.restart(&manifest, &PRIORITY).await;
    let stale = join_set.join_next().await.unwrap().unwrap();

    assert!(stale.superseded);
    assert_eq!(stale.phases.len(), 1, "stale run stops inside the priority phase");

    assert!(!fresh.superseded);
    assert_eq!(fresh.phases.len(), 2);
    assert_eq!(fresh.failed(), 0);
    let settled: usize = fresh.phases.iter().map(|p| p.attempted + p.skipped).sum();
    assert_eq!(settled, 21);

    assert!(!cache.prefetch_active());
    assert_eq!(cache.stats().cache_size, 21);
    // The stale run's first batch (axial 3, 2, 4) is fetched again by the fresh run
    assert_eq!(fetcher.total_calls(), 24);

    // Only the fresh run reports completed phases
    let mut completed = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let ViewerEvent::PrefetchPhaseCompleted { phase, .. } = event {
            completed.push(phase);
        }
    }
    assert_eq!(completed, vec![PrefetchPhase::Priority, PrefetchPhase::Remaining]);
}

#[tokio::test(start_paused = true)]
async fn test_restart_without_active_run_just_preloads() {
    let fetcher = Arc::new(MockFetcher::new());
    let cache = cache_with(&fetcher);
    let manifest = manifest([3, 3, 3]);

    let started = Instant::now();
    let report = cache.restart(&manifest, &[1]).await;

    assert!(!report.superseded);
    assert_eq!(report.loaded(), 9);
    // No restart pause: only the 10ms pause between the two remaining batches
    assert!(started.elapsed() < Duration::from_millis(20));
}
