//! Host broker entry point.
//!
//! Usage:
//!   weave-host --config /etc/weave/host.toml
//!   weave-host --config host.toml --log-level debug

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use weave_host::HostConfig;

#[derive(Parser, Debug)]
#[command(name = "weave-host")]
#[command(about = "Weave fabric host broker")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    // The process-wide rustls provider; ignore the error if something
    // installed one already.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = match &args.config {
        Some(path) => fabric::load_toml::<HostConfig>(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HostConfig::default(),
    };

    info!("starting weave host");
    let running = weave_host::start(config).await.context("starting host")?;
    info!(
        node = %running.node_addr,
        api = %running.api_addr,
        "host is up"
    );

    tokio::signal::ctrl_c()
        .await
        .context("installing CTRL+C handler")?;
    info!("received shutdown signal");
    running.shutdown().await;

    Ok(())
}

fn init_logging(level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(level).init();
}
