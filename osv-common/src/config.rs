//! Viewer configuration loading and config-file resolution
//!
//! The config file is TOML. Coefficients and the manifest path are required
//! for a working viewer; every cache and prefetch setting has a built-in
//! default.
//!
//! ```toml
//! manifest = "manifest.json"
//! mirror = ["sagittal"]
//!
//! [coefficients.axial.coronal]
//! a = -11.68
//! b = 19.22
//! c = -4.08
//!
//! [cache]
//! max_concurrent = 3
//! retries = 2
//!
//! [prefetch]
//! priority_radius = 2
//! ```

use crate::coefficients::{CoefficientTable, RawCoefficients};
use crate::error::{ConfigError, Error, Result};
use crate::manifest::ImageManifest;
use crate::view::{View, ViewMap};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "OSV_CONFIG";

/// Upper bound for `cache.retries`
pub const MAX_RETRIES: u32 = 10;

/// Top-level viewer configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ViewerConfig {
    /// Path to the image manifest JSON (relative paths resolve against the config file)
    #[serde(default)]
    pub manifest: Option<PathBuf>,

    /// Correlation coefficients, `[coefficients.<source>.<target>]`
    #[serde(default)]
    pub coefficients: RawCoefficients,

    /// Views whose click x coordinate is mirrored before correlation
    #[serde(default)]
    pub mirror: Vec<View>,

    #[serde(default)]
    pub cache: CacheSettings,

    #[serde(default)]
    pub prefetch: PrefetchSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Asset cache tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Maximum simultaneous network operations across all keys
    pub max_concurrent: usize,
    /// Retries after the first attempt
    pub retries: u32,
    /// Per-attempt timeouts; the last value is reused for later attempts
    pub attempt_timeouts_ms: Vec<u64>,
    pub backoff_base_ms: u64,
    pub backoff_jitter_ms: u64,
    pub backoff_cap_ms: u64,
    /// Pause between prefetch batches when nothing is failing
    pub batch_pause_ms: u64,
    /// Pause between prefetch batches when everything is failing
    pub max_batch_pause_ms: u64,
    /// Recent outcomes considered when computing the failure ratio
    pub pacing_window: usize,
    /// Pause between cancelling a stuck prefetch and starting a fresh one
    pub restart_pause_ms: u64,
    /// Origin-wide request rate limit (unlimited when absent)
    pub requests_per_second: Option<u32>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            retries: 2,
            attempt_timeouts_ms: vec![15_000, 10_000, 5_000],
            backoff_base_ms: 1_000,
            backoff_jitter_ms: 1_000,
            backoff_cap_ms: 8_000,
            batch_pause_ms: 250,
            max_batch_pause_ms: 4_000,
            pacing_window: 12,
            restart_pause_ms: 500,
            requests_per_second: None,
        }
    }
}

impl CacheSettings {
    /// Check ranges and relationships between settings
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(invalid("cache.max_concurrent", "must be at least 1"));
        }
        if self.retries > MAX_RETRIES {
            return Err(invalid("cache.retries", format!("must be at most {}", MAX_RETRIES)));
        }
        if self.attempt_timeouts_ms.is_empty() {
            return Err(invalid("cache.attempt_timeouts_ms", "needs at least one timeout"));
        }
        if self.attempt_timeouts_ms.contains(&0) {
            return Err(invalid("cache.attempt_timeouts_ms", "timeouts must be positive"));
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(invalid(
                "cache.backoff_cap_ms",
                format!("must be >= backoff_base_ms ({})", self.backoff_base_ms),
            ));
        }
        if self.max_batch_pause_ms < self.batch_pause_ms {
            return Err(invalid(
                "cache.max_batch_pause_ms",
                format!("must be >= batch_pause_ms ({})", self.batch_pause_ms),
            ));
        }
        if self.pacing_window == 0 {
            return Err(invalid("cache.pacing_window", "must be at least 1"));
        }
        if self.requests_per_second == Some(0) {
            return Err(invalid("cache.requests_per_second", "must be positive when set"));
        }
        Ok(())
    }

    /// Total attempts per load (first try plus retries)
    pub fn total_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }

    /// Timeout for the zero-based attempt number
    pub fn attempt_timeout(&self, attempt: u32) -> Duration {
        let ms = self
            .attempt_timeouts_ms
            .get(attempt as usize)
            .or(self.attempt_timeouts_ms.last())
            .copied()
            .unwrap_or(15_000);
        Duration::from_millis(ms)
    }

    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }

    pub fn max_batch_pause(&self) -> Duration {
        Duration::from_millis(self.max_batch_pause_ms)
    }

    pub fn restart_pause(&self) -> Duration {
        Duration::from_millis(self.restart_pause_ms)
    }
}

/// Prefetch tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchSettings {
    /// Neighbors on each side of the center slice loaded in the priority phase
    pub priority_radius: usize,
}

impl Default for PrefetchSettings {
    fn default() -> Self {
        Self { priority_radius: 2 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn invalid(key: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidSetting { key, reason: reason.into() }
}

impl ViewerConfig {
    /// Parse a TOML document and validate its cache settings
    ///
    /// Coefficient completeness is checked by [`ViewerConfig::coefficient_table`],
    /// so a partial file can still be inspected.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ViewerConfig = toml::from_str(content)?;
        config.cache.validate()?;
        Ok(config)
    }

    /// Load a config file, resolving a relative manifest path against its directory
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(ConfigError::Unreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        })?;

        let mut config = Self::from_toml_str(&content)?;

        if let Some(manifest) = config.manifest.take() {
            let resolved = if manifest.is_relative() {
                path.parent()
                    .map(|dir| dir.join(&manifest))
                    .unwrap_or(manifest)
            } else {
                manifest
            };
            config.manifest = Some(resolved);
        }

        tracing::debug!(
            path = %path.display(),
            coefficient_sources = config.coefficients.len(),
            max_concurrent = config.cache.max_concurrent,
            "Loaded viewer configuration"
        );
        Ok(config)
    }

    /// Validated, complete coefficient table
    pub fn coefficient_table(&self) -> std::result::Result<CoefficientTable, ConfigError> {
        CoefficientTable::from_raw(&self.coefficients)
    }

    /// Load the manifest named by the config
    pub fn load_manifest(&self) -> Result<ImageManifest> {
        let path = self
            .manifest
            .as_deref()
            .ok_or_else(|| ConfigError::NotFound("no 'manifest' path in configuration".to_string()))?;
        ImageManifest::load(path)
    }

    /// Per-view mirror flags
    pub fn mirror_flags(&self) -> ViewMap<bool> {
        ViewMap::from_fn(|v| self.mirror.contains(&v))
    }
}

/// Config file resolution, highest priority first:
/// 1. Command-line argument
/// 2. `OSV_CONFIG` environment variable
/// 3. `<platform config dir>/osv/viewer.toml`, when it exists
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    let default = default_config_path()?;
    if default.exists() {
        Ok(default)
    } else {
        Err(Error::Config(ConfigError::NotFound(format!(
            "pass --config, set {}, or create {}",
            CONFIG_ENV_VAR,
            default.display()
        ))))
    }
}

/// Platform default config file location
pub fn default_config_path() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|d| d.join("osv").join("viewer.toml"))
        .ok_or_else(|| {
            Error::Config(ConfigError::NotFound(
                "could not determine platform config directory".to_string(),
            ))
        })
}
