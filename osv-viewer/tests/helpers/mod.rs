//! Test Helper Utilities
//!
//! Scripted fetcher and fixtures shared by the osv-viewer integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use osv_common::{CacheSettings, Coefficients, ImageManifest, View, ViewPair, ViewerConfig};
use osv_viewer::cache::{AssetFetcher, FetchedAsset};
use osv_viewer::{AssetCache, AssetError};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// PNG signature followed by the start of an IHDR chunk
pub const PNG_BYTES: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
];

/// What the mock does for one fetch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `image/png` payload
    Image,
    /// `text/html` payload (an error page served with 200)
    Html,
    /// Non-2xx status
    Status(u16),
    /// Never answers
    Hang,
}

/// Scripted [`AssetFetcher`]
///
/// Replies come from the per-URL script first, then the per-URL fallback,
/// then [`Reply::Image`]. Every call is recorded in order, and the number
/// of fetches running at once is tracked.
pub struct MockFetcher {
    latency: Duration,
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    fallbacks: Mutex<HashMap<String, Reply>>,
    calls: Mutex<Vec<String>>,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::with_latency(Duration::ZERO)
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            scripts: Mutex::new(HashMap::new()),
            fallbacks: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    /// Queue replies for the next fetches of `url`
    pub fn script(&self, url: &str, replies: impl IntoIterator<Item = Reply>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(replies);
    }

    /// Reply used for `url` once its script is exhausted
    pub fn always(&self, url: &str, reply: Reply) {
        self.fallbacks.lock().unwrap().insert(url.to_string(), reply);
    }

    /// Fetches issued for `url`
    pub fn calls(&self, url: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|u| *u == url).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// URLs in the order they were fetched
    pub fn call_order(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of fetches observed running at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_reply(&self, url: &str) -> Reply {
        if let Some(reply) = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|queue| queue.pop_front())
        {
            return reply;
        }
        self.fallbacks
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(Reply::Image)
    }
}

/// Decrements the active count even when the fetch future is dropped by a timeout
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AssetFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedAsset, AssetError> {
        self.calls.lock().unwrap().push(url.to_string());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        let reply = self.next_reply(url);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match reply {
            Reply::Image => Ok(FetchedAsset {
                content_type: Some("image/png".to_string()),
                bytes: PNG_BYTES.to_vec(),
            }),
            Reply::Html => Ok(FetchedAsset {
                content_type: Some("text/html; charset=utf-8".to_string()),
                bytes: b"<html>not found</html>".to_vec(),
            }),
            Reply::Status(status) => Err(AssetError::Http {
                url: url.to_string(),
                status: Some(status),
                message: format!("HTTP {}", status),
            }),
            Reply::Hang => std::future::pending().await,
        }
    }
}

/// URL of a slice in [`manifest`]
pub fn slice_url(view: View, slice: usize) -> String {
    format!("https://img.test/{}/{:03}.png", view, slice)
}

/// Manifest with `counts[i]` slices for `View::ALL[i]`
pub fn manifest(counts: [usize; 3]) -> ImageManifest {
    let raw = View::ALL
        .into_iter()
        .zip(counts)
        .map(|(view, n)| (view, (0..n).map(|s| slice_url(view, s)).collect()))
        .collect();
    ImageManifest::new(raw).unwrap()
}

/// Short timings so paused-clock tests stay readable
pub fn fast_settings() -> CacheSettings {
    CacheSettings {
        attempt_timeouts_ms: vec![300, 200, 100],
        backoff_base_ms: 100,
        backoff_jitter_ms: 50,
        backoff_cap_ms: 400,
        batch_pause_ms: 10,
        max_batch_pause_ms: 50,
        restart_pause_ms: 20,
        ..Default::default()
    }
}

pub fn cache_with(fetcher: &Arc<MockFetcher>) -> AssetCache {
    AssetCache::new(fetcher.clone(), fast_settings()).unwrap()
}

/// Axial→coronal and axial→sagittal use the reference coefficient sets;
/// every other pair maps to the middle of the stack
pub fn reference_config() -> ViewerConfig {
    let mut config = ViewerConfig {
        cache: fast_settings(),
        ..Default::default()
    };

    for pair in ViewPair::all() {
        let coefficients = match (pair.source, pair.target) {
            (View::Axial, View::Coronal) => Coefficients::new(-11.68, 19.22, -4.08),
            (View::Axial, View::Sagittal) => Coefficients::new(-25.50, -13.81, -30.49),
            _ => Coefficients::new(0.0, 0.0, -10.0),
        };
        config
            .coefficients
            .entry(pair.source)
            .or_default()
            .insert(pair.target, coefficients);
    }
    config
}
