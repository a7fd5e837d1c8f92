//! QFlip Gateway Binary
//!
//! # Usage
//! ```bash
//! qflip-gateway [--port 8976] [--host 127.0.0.1] [--config gateway.json] [--verbose]
//! ```

use clap::Parser;
use qflip_core::SaltSource;
use qflip_gateway::{Gateway, GatewayConfig};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// QFlip Gateway - coin flips with quantum delegation and local fallback
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Port to listen on (overrides PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides HOST)
    #[arg(long)]
    host: Option<String>,

    /// JSON configuration file, used instead of environment variables
    #[arg(short, long)]
    config: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize logging
    if args.verbose {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_target(false)
            .init();
    }

    let mut config = match args.config.as_deref() {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::from_env()?,
    };
    if let Some(host) = args.host {
        config = config.with_host(host);
    }
    if let Some(port) = args.port {
        config = config.with_port(port);
    }

    log_startup(&config);

    let gateway = Arc::new(Gateway::new(config)?);

    let signal_gateway = gateway.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_gateway.shutdown();
        }
    });

    gateway.start().await?;
    Ok(())
}

fn log_startup(config: &GatewayConfig) {
    tracing::info!("Server running on port {}", config.port);
    tracing::info!("Environment: {}", config.agent.environment);
    tracing::info!(
        "Frontend URL: {}",
        config
            .frontend_url
            .as_deref()
            .unwrap_or("http://localhost:5173")
    );
    tracing::info!("Quantum service: {}", config.agent.service_url);
    tracing::info!(
        "Privacy salt: {}",
        match config.agent.salt_source {
            SaltSource::Configured => "configured",
            SaltSource::UsingDefault => "using_default",
        }
    );
    if config.api_tokens.is_empty() {
        tracing::warn!("No API tokens configured, authenticated routes will reject every request");
    }
}
