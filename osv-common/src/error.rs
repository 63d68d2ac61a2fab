//! Common error types for the slice viewer

use crate::view::{View, ViewPair};
use std::path::PathBuf;
use thiserror::Error;

/// Common result type for configuration and loading operations
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration problems detected while loading coefficients, manifests or settings
///
/// All of these are load-time failures. A validated configuration never
/// produces them during interaction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// An ordered view pair has no correlation coefficients
    #[error("Missing correlation coefficients for {0}")]
    MissingCoefficients(ViewPair),

    /// Coefficients were given for a view paired with itself
    #[error("Coefficients for {0} paired with itself are not allowed")]
    SelfPair(View),

    /// A coefficient is NaN or infinite
    #[error("Coefficient '{name}' for {pair} is not a finite number")]
    NonFiniteCoefficient { pair: ViewPair, name: &'static str },

    /// The image manifest has no entry for a view
    #[error("Image manifest has no URL list for view '{0}'")]
    MissingManifest(View),

    /// The image manifest lists zero slices for a view
    #[error("Image manifest URL list for view '{0}' is empty")]
    EmptyManifest(View),

    /// A manifest URL is blank
    #[error("Image manifest URL for view '{view}' slice {slice} is empty")]
    EmptyUrl { view: View, slice: usize },

    /// A setting is outside its allowed range
    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: &'static str, reason: String },

    /// A configuration file could not be located
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// A configuration file could not be read or parsed
    #[error("Could not load {path:?}: {reason}")]
    Unreadable { path: PathBuf, reason: String },
}

/// Common error types across the viewer crates
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// JSON parse error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
