//! Api client demo binary: authenticate, invoke one method, print the result.
//!
//! Usage:
//!   weave-api --host 127.0.0.1 --auth-key secret --trust ca.pem ping '[1,2,3]'

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde_json::Value;
use weave_api::{ApiClient, ApiSettings};

#[derive(Parser, Debug)]
#[command(name = "weave-api")]
#[command(about = "Weave fabric api client")]
#[command(version)]
struct Args {
    /// Host to dial
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Api-plane port on the host
    #[arg(long, default_value_t = fabric::config::DEFAULT_API_PORT)]
    port: u16,

    /// Authentication key
    #[arg(long)]
    auth_key: String,

    /// PEM trust anchor bundle for the host certificate
    #[arg(long)]
    trust: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Method to invoke
    method: String,

    /// JSON arguments for the method
    args: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let _ = rustls::crypto::ring::default_provider().install_default();

    let call_args: Option<Value> = match &args.args {
        Some(raw) => Some(serde_json::from_str(raw).context("parsing call arguments")?),
        None => None,
    };

    let client = ApiClient::connect(ApiSettings {
        host: args.host,
        port: args.port,
        auth_key: args.auth_key.clone(),
        trust: args.trust,
        ..Default::default()
    })
    .await
    .context("connecting to host")?;

    if !client.authenticate(&args.auth_key).await? {
        bail!("authentication refused by host");
    }

    let result = client.call(&args.method, call_args).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    client.close().await;
    Ok(())
}

fn init_logging(level: &str) {
    let level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::WARN,
    };
    tracing_subscriber::fmt().with_max_level(level).init();
}
