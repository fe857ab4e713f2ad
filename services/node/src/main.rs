//! Node worker entry point.
//!
//! Usage:
//!   weave-node --config /etc/weave/node.toml
//!   weave-node --host 10.0.0.5 --auth-key secret

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing::info;
use weave_node::{NodeConfig, Service, Upstream};

#[derive(Parser, Debug)]
#[command(name = "weave-node")]
#[command(about = "Weave fabric worker node")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Upstream host, overriding the config file
    #[arg(long)]
    host: Option<String>,

    /// Upstream port, overriding the config file
    #[arg(long)]
    port: Option<u16>,

    /// Authentication key, overriding the config file
    #[arg(long)]
    auth_key: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut config = match &args.config {
        Some(path) => fabric::load_toml::<NodeConfig>(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => NodeConfig::default(),
    };
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(auth_key) = args.auth_key {
        config.auth_key = auth_key;
    }

    // Built-in diagnostics method so a fresh node is immediately callable.
    let service = Service::new().provide("ping", |args: Option<Value>| {
        Ok(args.unwrap_or(Value::Null))
    });

    info!(host = %config.host, port = config.port, "starting weave node");
    let upstream = Upstream::new(config, service).context("building upstream")?;
    upstream.run().await.context("running upstream")?;
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
