//! Error types for osv-viewer
//!
//! Load failures are `Clone` because every requester attached to a shared
//! in-flight load receives its own copy of the outcome.

use osv_common::ConfigError;
use std::time::Duration;
use thiserror::Error;

/// Asset load failure
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssetError {
    /// An attempt did not finish within its timeout
    #[error("Timed out after {after:?} loading {url}")]
    Timeout { url: String, after: Duration },

    /// Non-2xx response or transport failure (`status` is `None` for the latter)
    #[error("HTTP error loading {url}: {message}")]
    Http {
        url: String,
        status: Option<u16>,
        message: String,
    },

    /// Response was not an image
    #[error("Invalid content type {content_type:?} for {url}")]
    InvalidContentType {
        url: String,
        content_type: Option<String>,
    },

    /// URL exhausted its retries and is rejected until the blacklist is cleared
    #[error("Permanently failed {url}: {reason}")]
    PermanentlyBlacklisted { url: String, reason: String },
}

impl AssetError {
    /// Whether another attempt could succeed
    pub fn is_transient(&self) -> bool {
        !matches!(self, AssetError::PermanentlyBlacklisted { .. })
    }

    /// URL the failure refers to
    pub fn url(&self) -> &str {
        match self {
            AssetError::Timeout { url, .. }
            | AssetError::Http { url, .. }
            | AssetError::InvalidContentType { url, .. }
            | AssetError::PermanentlyBlacklisted { url, .. } => url,
        }
    }
}

/// View synchronization failure
#[derive(Debug, Clone, Error, PartialEq)]
pub enum SyncError {
    /// Coefficient table could not answer a pair
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Click arrived for a surface with no area
    #[error("Rendered surface has no area ({width} x {height})")]
    InvalidSurface { width: f64, height: f64 },
}
