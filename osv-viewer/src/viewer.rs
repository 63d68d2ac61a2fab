//! Explicitly constructed viewer context
//!
//! Bundles the correlation engine, synchronized view state, image manifest
//! and asset cache of one viewer instance. Nothing is global: independent
//! viewers (or tests) each build their own.

use crate::cache::{priority_slices, AssetCache, AssetFetcher, AssetHandle, PrefetchReport};
use crate::correlation::CorrelationEngine;
use crate::error::AssetError;
use crate::sync::ViewSync;
use osv_common::events::EventBus;
use osv_common::{ConfigError, ImageManifest, View, ViewerConfig};
use std::sync::Arc;

/// One viewer instance
pub struct Viewer {
    sync: Arc<ViewSync>,
    cache: AssetCache,
    manifest: Arc<ImageManifest>,
    priority_radius: usize,
}

impl Viewer {
    /// Validate configuration and wire the components together
    ///
    /// Fails with a `ConfigError` on an incomplete coefficient table or
    /// invalid cache settings, before any interaction is processed.
    pub fn new(
        config: &ViewerConfig,
        manifest: ImageManifest,
        fetcher: Arc<dyn AssetFetcher>,
    ) -> Result<Self, ConfigError> {
        let table = config.coefficient_table()?;
        let engine = CorrelationEngine::new(table, manifest.slice_counts());
        let sync = ViewSync::new(engine).with_mirror(config.mirror_flags());
        let cache = AssetCache::new(fetcher, config.cache.clone())?;

        tracing::info!(
            axial = manifest.slice_count(View::Axial),
            coronal = manifest.slice_count(View::Coronal),
            sagittal = manifest.slice_count(View::Sagittal),
            "Viewer initialized"
        );

        Ok(Self {
            sync: Arc::new(sync),
            cache,
            manifest: Arc::new(manifest),
            priority_radius: config.prefetch.priority_radius,
        })
    }

    /// Publish slice changes and cache events on `bus`
    pub fn with_event_bus(mut self, bus: EventBus) -> Self {
        self.sync.forward_to(bus.clone());
        self.cache = self.cache.with_event_bus(bus);
        self
    }

    pub fn sync(&self) -> &Arc<ViewSync> {
        &self.sync
    }

    pub fn cache(&self) -> &AssetCache {
        &self.cache
    }

    pub fn engine(&self) -> &CorrelationEngine {
        self.sync.engine()
    }

    pub fn manifest(&self) -> &Arc<ImageManifest> {
        &self.manifest
    }

    pub fn url_for(&self, view: View, slice: usize) -> Option<&str> {
        self.manifest.url(view, slice)
    }

    /// Asset for the view's current slice
    pub async fn current_asset(&self, view: View) -> Result<AssetHandle, AssetError> {
        let slice = self.sync.get_slice(view);
        // The sync state clamps to the manifest's slice counts
        let url = self.manifest.urls(view)[slice].clone();
        self.cache.request(view, slice, &url).await
    }

    /// Priority slices for prefetch: each view's center neighborhood, merged
    pub fn priority_slices(&self) -> Vec<usize> {
        let mut slices = Vec::new();
        for view in View::ALL {
            for slice in priority_slices(self.manifest.slice_count(view), self.priority_radius) {
                if !slices.contains(&slice) {
                    slices.push(slice);
                }
            }
        }
        slices
    }

    /// Two-phase prefetch of the whole manifest
    pub async fn prefetch(&self) -> PrefetchReport {
        self.cache.preload(&self.manifest, &self.priority_slices()).await
    }

    /// Replace a stuck prefetch with a fresh one
    pub async fn restart_prefetch(&self) -> PrefetchReport {
        self.cache.restart(&self.manifest, &self.priority_slices()).await
    }
}

impl std::fmt::Debug for Viewer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Viewer")
            .field("sync", &self.sync)
            .field("cache", &self.cache)
            .finish()
    }
}
