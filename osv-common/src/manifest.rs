//! Image manifest: one ordered URL list per view
//!
//! Slice `i` of a view is the image at index `i` of that view's list, so the
//! list length is the view's slice count for the whole session.

use crate::error::{ConfigError, Error, Result};
use crate::view::{View, ViewMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Manifest as written on disk
pub type RawManifest = BTreeMap<View, Vec<String>>;

/// Validated image manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageManifest {
    urls: ViewMap<Vec<String>>,
}

impl ImageManifest {
    /// Validate per-view URL lists
    ///
    /// Every view must be present with at least one slice and no blank URL.
    pub fn new(raw: RawManifest) -> std::result::Result<Self, ConfigError> {
        let mut raw = raw;
        let mut urls: ViewMap<Vec<String>> = ViewMap::default();

        for view in View::ALL {
            let list = raw.remove(&view).ok_or(ConfigError::MissingManifest(view))?;
            if list.is_empty() {
                return Err(ConfigError::EmptyManifest(view));
            }
            if let Some(slice) = list.iter().position(|u| u.trim().is_empty()) {
                return Err(ConfigError::EmptyUrl { view, slice });
            }
            urls[view] = list;
        }

        Ok(Self { urls })
    }

    /// Parse and validate a JSON manifest
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawManifest = serde_json::from_str(json)?;
        Ok(Self::new(raw)?)
    }

    /// Load and validate a JSON manifest file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(ConfigError::Unreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        })?;

        let manifest = Self::from_json(&content)?;
        tracing::info!(
            path = %path.display(),
            axial = manifest.slice_count(View::Axial),
            coronal = manifest.slice_count(View::Coronal),
            sagittal = manifest.slice_count(View::Sagittal),
            "Loaded image manifest"
        );
        Ok(manifest)
    }

    /// Number of slices in a view
    pub fn slice_count(&self, view: View) -> usize {
        self.urls[view].len()
    }

    /// Slice counts for every view
    pub fn slice_counts(&self) -> ViewMap<usize> {
        self.urls.map(|_, list| list.len())
    }

    /// URL for a slice, `None` when out of range
    pub fn url(&self, view: View, slice: usize) -> Option<&str> {
        self.urls[view].get(slice).map(String::as_str)
    }

    /// All URLs of a view in slice order
    pub fn urls(&self, view: View) -> &[String] {
        &self.urls[view]
    }

    /// Every `(view, slice, url)` triple, views in stable order
    pub fn entries(&self) -> impl Iterator<Item = (View, usize, &str)> {
        self.urls.iter().flat_map(|(view, list)| {
            list.iter()
                .enumerate()
                .map(move |(slice, url)| (view, slice, url.as_str()))
        })
    }

    /// Total number of slices across views
    pub fn total_slices(&self) -> usize {
        View::ALL.iter().map(|v| self.slice_count(*v)).sum()
    }
}
