use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use esphap::Config;
use esphap::PLATFORM_NAME;
use esphap::PLUGIN_NAME;
use esphap::Platform;
use esphap_hap::LocalRegistry;
use tracing_subscriber::filter::LevelFilter;

/// Bridge ESPHome devices to HomeKit-style accessories.
#[derive(Debug, Parser)]
#[command(name = "esphap", version)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "esphap.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = Config::from_file(&args.config)?;

    tracing_subscriber::fmt()
        .with_max_level(LevelFilter::from(config.logging.level))
        .init();

    tracing::info!("esphap starting");
    tracing::info!("loaded config from {}", args.config.display());

    let registry = Arc::new(LocalRegistry::new(PLUGIN_NAME, PLATFORM_NAME));
    let platform = Arc::new(Platform::new(config, registry));

    let runner = tokio::spawn(platform.clone().run());

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("received shutdown signal"),
        Err(e) => tracing::error!("failed to listen for shutdown signal: {}", e),
    }

    platform.shutdown().await;
    runner.abort();
    tracing::info!("esphap shutdown complete");

    Ok(())
}
