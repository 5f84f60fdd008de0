// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Atellica instrument simulator.
//!
//! Exposes a binary LAS interface and an ASCII LIS interface concurrently,
//! both backed by a shared simulation state store.
//!
//! # Usage
//!
//! ```bash
//! # Start with built-in defaults
//! atellica-sim
//!
//! # Load configuration from a file
//! atellica-sim --config sim.json
//! ```

use atellica_sim::config::Config;
use atellica_sim::server::Simulator;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Atellica instrument simulator - a dual-protocol clinical analyzer double
#[derive(Parser, Debug)]
#[command(name = "atellica-sim")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON format). Written out with defaults if it
    /// does not already exist.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// LAS TCP port (overrides config)
    #[arg(long)]
    las_port: Option<u16>,

    /// LIS TCP port (overrides config)
    #[arg(long)]
    lis_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = if let Some(path) = &args.config {
        if path.exists() {
            info!("Loading config from {:?}", path);
            Config::from_file(path)?
        } else {
            info!("Config {:?} not found, writing defaults", path);
            let config = Config::default();
            config.to_file(path)?;
            config
        }
    } else {
        Config::default()
    };

    if let Some(port) = args.las_port {
        config.las.port = port;
    }
    if let Some(port) = args.lis_port {
        config.lis.port = port;
    }

    info!("+----------------------------------------------------+");
    info!("|  Atellica instrument simulator v{}             |", env!("CARGO_PKG_VERSION"));
    info!("+----------------------------------------------------+");
    info!("|  LAS:  {}:{:<38} |", config.las.host, config.las.port);
    info!("|  LIS:  {}:{:<38} |", config.lis.host, config.lis.port);
    info!("+----------------------------------------------------+");

    let simulator = Simulator::new(config)?;
    let shutdown = simulator.shutdown_handle();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received, stopping simulator...");
        shutdown.shutdown();
    });

    simulator.run().await?;
    info!("Simulator stopped");
    Ok(())
}
