//! Cache keys, asset handles and per-key lifecycle states

use osv_common::View;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

/// Identity of one slice image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CacheKey {
    pub view: View,
    pub slice: usize,
}

impl CacheKey {
    pub fn new(view: View, slice: usize) -> Self {
        Self { view, slice }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.view, self.slice)
    }
}

/// Successfully loaded image payload
#[derive(Debug)]
struct AssetData {
    url: String,
    content_type: Option<String>,
    bytes: Vec<u8>,
    loaded_at: chrono::DateTime<chrono::Utc>,
}

/// Shared reference to a loaded image
///
/// Clones share one payload; the payload is freed when the cache and every
/// renderer holding a clone have dropped theirs.
#[derive(Debug, Clone)]
pub struct AssetHandle {
    data: Arc<AssetData>,
}

impl AssetHandle {
    pub fn new(url: impl Into<String>, content_type: Option<String>, bytes: Vec<u8>) -> Self {
        Self {
            data: Arc::new(AssetData {
                url: url.into(),
                content_type,
                bytes,
                loaded_at: chrono::Utc::now(),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.data.url
    }

    pub fn content_type(&self) -> Option<&str> {
        self.data.content_type.as_deref()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data.bytes
    }

    pub fn len(&self) -> usize {
        self.data.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.bytes.is_empty()
    }

    pub fn loaded_at(&self) -> chrono::DateTime<chrono::Utc> {
        self.data.loaded_at
    }

    /// Whether both handles refer to the same load
    pub fn same_asset(&self, other: &AssetHandle) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

/// Lifecycle of one cache key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EntryState {
    /// Never requested, or reset by `clear`
    Empty,
    /// A load is in flight (possibly between retries)
    Loading,
    /// Loaded; terminal until `clear`
    Ready,
    /// Retries exhausted; terminal until the blacklist is cleared
    FailedPermanent { reason: String },
}
