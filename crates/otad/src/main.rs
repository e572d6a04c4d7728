//! otad - OTA bundle server
//!
//! Serves update bundles and the active manifest to devices, and a dashboard
//! for uploading and activating bundles.

use anyhow::Result;
use clap::Parser;
use ota_common::ServerConfig;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "otad", version, about = "OTA update bundle server")]
struct Args {
    /// Path to config.toml (defaults to $OTA_CONFIG or /etc/ota/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    info!("otad v{} starting", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::load(args.config.as_deref())?;
    info!(
        "Data dir {}, compatible {}",
        config.data_dir.display(),
        config.compatible
    );

    otad::server::run(config).await
}
