//! CLI Entry Point for sapera-bridge
//!
//! # Usage
//!
//! List acquisition servers:
//! ```bash
//! sapera-bridge servers
//! ```
//!
//! Stream 100 frames to three concurrent consumers:
//! ```bash
//! sapera-bridge acquire --config config/bridge.toml --frames 100 --subscribers 3
//! ```
//!
//! Both commands run against the simulated frame grabber.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use driver_sapera::mock::MockSdk;
use sapera_bridge::bridge::{self, FrameSummary};
use sapera_bridge::config::{BridgeConfig, DEFAULT_CONFIG_PATH};
use sapera_bridge::logging::{self, LoggingConfig, OutputFormat};
use sapera_bridge::AcquisitionDevice;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "sapera-bridge")]
#[command(about = "Shared frame stream from a Sapera acquisition device", long_about = None)]
struct Cli {
    /// Log output format (pretty, compact, json)
    #[arg(long, global = true, default_value = "pretty")]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List servers exposing an acquisition device
    Servers,

    /// Stream frames to concurrent consumers, then detach
    Acquire {
        /// Bridge configuration file
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Frames each consumer reads before detaching
        #[arg(long, default_value = "10")]
        frames: usize,

        /// Number of concurrent consumers
        #[arg(long, default_value = "1")]
        subscribers: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Servers => list_servers(cli.log_format),
        Commands::Acquire {
            config,
            frames,
            subscribers,
        } => run_acquire(config, frames, subscribers, cli.log_format).await,
    }
}

fn list_servers(format: OutputFormat) -> Result<()> {
    logging::init(LoggingConfig::default().with_format(format)).map_err(|e| anyhow!(e))?;

    let sdk = MockSdk::new();
    let servers = AcquisitionDevice::available_servers(&sdk)?;
    if servers.is_empty() {
        println!("No acquisition device servers found");
    }
    for server in servers {
        println!("{server}");
    }
    Ok(())
}

async fn run_acquire(
    config_path: PathBuf,
    frames: usize,
    subscribers: usize,
    format: OutputFormat,
) -> Result<()> {
    anyhow::ensure!(subscribers > 0, "--subscribers must be at least 1");

    let config = BridgeConfig::load_from(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    config.validate().map_err(|e| anyhow!(e))?;

    let logging_config = LoggingConfig::from_bridge_config(&config)
        .map_err(|e| anyhow!(e))?
        .with_format(format);
    logging::init(logging_config).map_err(|e| anyhow!(e))?;

    tracing::info!(
        app = %config.application.name,
        device = %config.device.identity(),
        "Starting acquisition"
    );

    let sdk = bridge::simulated_sdk(&config);
    let device = Arc::new(AcquisitionDevice::new(
        Arc::new(sdk.clone()),
        config.device.identity(),
    ));

    let results = bridge::acquire(device.clone(), frames, subscribers, |summary: &FrameSummary| {
        println!("{summary}");
    })
    .await?;

    bridge::wait_for_release(sdk.clone()).await?;

    let stats = sdk.stats();
    let received: usize = results.iter().map(Vec::len).sum();
    println!();
    println!(
        "{} frames delivered to {} consumers ({} captured, {} session(s))",
        received,
        subscribers,
        device.frames_emitted(),
        stats.devices_opened
    );
    Ok(())
}
