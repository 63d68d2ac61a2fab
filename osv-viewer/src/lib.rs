//! osv-viewer library interface
//!
//! Core of a three-view synchronized slice viewer:
//! - [`correlation`]: click position in one view → slice in another
//! - [`sync`]: current slice per view, clamped writes, ordered notifications
//! - [`cache`]: deduplicating, retrying, rate-limited asset cache with prefetch
//! - [`viewer`]: the context object tying them together

pub mod cache;
pub mod correlation;
pub mod error;
pub mod sync;
pub mod viewer;

pub use crate::cache::{AssetCache, AssetFetcher, AssetHandle, CacheKey, CacheStats, EntryState, HttpFetcher};
pub use crate::correlation::CorrelationEngine;
pub use crate::error::{AssetError, SyncError};
pub use crate::sync::{Step, SubscriptionId, ViewSync};
pub use crate::viewer::Viewer;
