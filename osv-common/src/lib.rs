//! # OSV Common Library
//!
//! Shared code for the orthogonal slice viewer crates:
//! - View identities and per-view containers
//! - Correlation coefficient table
//! - Image manifest loading and validation
//! - Configuration loading
//! - Notification payloads and the event bus

pub mod coefficients;
pub mod config;
pub mod error;
pub mod events;
pub mod manifest;
pub mod view;

pub use coefficients::{CoefficientTable, Coefficients};
pub use config::{CacheSettings, PrefetchSettings, ViewerConfig};
pub use error::{ConfigError, Error, Result};
pub use events::{EventBus, SliceChange, SliceSnapshot, ViewerEvent};
pub use manifest::ImageManifest;
pub use view::{View, ViewMap, ViewPair};
