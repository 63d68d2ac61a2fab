//! osv-viewer - command-line front end
//!
//! Loads a viewer configuration and image manifest, then validates them,
//! answers correlation queries, or warms the asset cache over HTTP.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use osv_common::config::{resolve_config_path, ViewerConfig};
use osv_common::View;
use osv_viewer::{HttpFetcher, Viewer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for osv-viewer
#[derive(Parser, Debug)]
#[command(name = "osv-viewer")]
#[command(about = "Synchronized three-view slice viewer core")]
#[command(version)]
struct Args {
    /// Viewer configuration file (TOML)
    #[arg(short, long, env = "OSV_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate configuration and manifest
    Validate,

    /// Print the slice each sibling view jumps to for a click
    Correlate {
        /// View that was clicked (axial, coronal, sagittal)
        #[arg(long)]
        source: View,

        /// Normalized x (0 = left edge)
        #[arg(long)]
        x: f64,

        /// Normalized y (0 = bottom edge)
        #[arg(long)]
        y: f64,
    },

    /// Prefetch every slice image and print cache statistics as JSON
    Prefetch {
        /// Neighbors on each side of the center slice loaded first
        #[arg(long)]
        radius: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref())
        .context("Failed to locate viewer configuration")?;
    let mut config = ViewerConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("osv_viewer={0},osv_common={0}", config.logging.level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting osv-viewer v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    // Config is read before the subscriber exists, so its summary is logged here
    info!(
        path = %config_path.display(),
        coefficient_sources = config.coefficients.len(),
        max_concurrent = config.cache.max_concurrent,
        retries = config.cache.retries,
        "Loaded viewer configuration"
    );

    if let Command::Prefetch { radius: Some(radius) } = &args.command {
        config.prefetch.priority_radius = *radius;
    }

    let manifest = config.load_manifest().context("Failed to load image manifest")?;
    let fetcher = HttpFetcher::new(config.cache.requests_per_second)
        .context("Failed to build HTTP client")?;
    let viewer = Viewer::new(&config, manifest, Arc::new(fetcher))
        .context("Invalid viewer configuration")?;

    match args.command {
        Command::Validate => {
            for view in View::ALL {
                println!("{:<9} {} slices", view, viewer.manifest().slice_count(view));
            }
            println!("configuration OK");
        }
        Command::Correlate { source, x, y } => {
            for (target, slice) in viewer.engine().compute_siblings(source, x, y)? {
                println!("{} -> {}: slice {}", source, target, slice);
            }
        }
        Command::Prefetch { .. } => {
            let report = viewer.prefetch().await;
            let stats = viewer.cache().stats();
            info!("{}", stats.display_string());
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "report": report,
                    "stats": stats,
                }))?
            );
        }
    }

    Ok(())
}
