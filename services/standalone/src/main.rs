//! Standalone holon bootstrap - runs one active holon until Ctrl-C
//!
//! Usage:
//!   holon-standalone --name printer
//!   holon-standalone --config config/holon.toml --log-level debug

use anyhow::{Context, Result};
use clap::Parser;
use holon::{Holon, HolonConfig, LocalRegistry, Message};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "holon-standalone")]
#[command(about = "Runs a single holon against the in-process registry")]
#[command(version)]
struct Args {
    /// Holon name, generated when omitted
    #[arg(short, long)]
    name: Option<String>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = HolonConfig::load(args.config.as_deref())
        .context("Failed to load holon configuration")?;

    let level = args.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(level, args.json_logs)?;

    let mut builder = Holon::builder()
        .config(config)
        .handler(|holon: &Holon, msg: Arc<Message>| -> holon::Result<()> {
            info!(holon = %holon.name(), body = %msg.body(), "got message");
            Ok(())
        });
    if let Some(name) = args.name {
        builder = builder.name(name);
    }
    let holon = builder.build();

    let registry = LocalRegistry::new();
    registry.register(&holon);
    holon
        .set_registry(Arc::new(registry.clone()))
        .context("Failed to attach holon to registry")?;
    holon.start().context("Failed to start holon")?;

    info!(holon = %holon.name(), type_tag = %holon.type_tag(), "Holon running, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install Ctrl-C handler")?;
    info!("Received shutdown signal");

    holon.shutdown();
    if let Err(e) = holon.join() {
        warn!(holon = %holon.name(), error = %e, "Worker did not exit cleanly");
    }
    registry.deregister(holon.name());

    info!(holon = %holon.name(), "Holon stopped");
    Ok(())
}

fn init_logging(level: &str, json_logs: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("Invalid log level '{}'", level))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json_logs {
        builder.json().init();
    } else {
        builder.init();
    }

    Ok(())
}
