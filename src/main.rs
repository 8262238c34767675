// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/glowbarn-rs

//! MeshSense - sensor sampling and broadcast daemon
//!
//! Loads the sensor configuration, then samples, logs and broadcasts until
//! interrupted with Ctrl+C.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn, error, Level};
use tracing_subscriber::FmtSubscriber;

use meshsense::{
    build_info,
    streaming::{DryRunTransport, MqttTransport, Transport},
    Config, Engine, ReaderTable, VERSION,
};

/// MeshSense - sensor sampling and broadcast daemon
#[derive(Parser, Debug)]
#[command(name = "meshsense")]
#[command(author = "MeshSense Project")]
#[command(version = VERSION)]
#[command(about = "Periodic sensor sampling, logging and mesh broadcast")]
struct Args {
    /// Configuration file path (JSON, or TOML with a .toml extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the sensor log file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Override the broadcast interval, in seconds
    #[arg(short, long)]
    interval: Option<u64>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// MQTT broker address
    #[arg(long)]
    mqtt_broker: Option<String>,

    /// Log outgoing messages instead of transmitting them
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let build = build_info();
    info!("MeshSense v{} ({}-{})", build.version, build.os, build.target);

    // Load or create configuration
    let config_path = Config::resolve_path(args.config);
    let mut config = Config::load_or_create(&config_path)?;

    // Override with command line args
    if let Some(log_file) = args.log_file {
        config.settings.log_file = log_file;
    }
    if let Some(interval) = args.interval {
        config.settings.broadcast_interval = interval;
    }
    if let Some(broker) = args.mqtt_broker {
        config.transport.mqtt_enabled = true;
        config.transport.mqtt_broker = broker;
    }
    config.validate()?;

    info!("Configuration loaded from {:?}", config_path);
    info!(
        "Node {} ({}), broadcasting every {}s, logging to {:?}",
        config.settings.node_id(),
        config.settings.node_name,
        config.settings.broadcast_interval,
        config.settings.log_file
    );

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    rt.block_on(run(config, config_path, args.dry_run))
}

async fn run(config: Config, config_path: PathBuf, dry_run: bool) -> Result<()> {
    let (shutdown_tx, _) = broadcast::channel::<()>(4);
    let (inbound_tx, inbound_rx) = mpsc::channel(100);

    let transport: Arc<dyn Transport> = if dry_run {
        info!("Dry run: messages are logged, not transmitted");
        Arc::new(DryRunTransport::new())
    } else if config.transport.mqtt_enabled {
        let node_id = config.settings.node_id();
        Arc::new(MqttTransport::connect(
            &config.transport,
            &node_id,
            inbound_tx,
            shutdown_tx.subscribe(),
        )?)
    } else {
        warn!("No transport configured; falling back to dry run. Use --mqtt-broker to transmit.");
        drop(inbound_tx);
        Arc::new(DryRunTransport::new())
    };

    let mut engine = Engine::new(config, ReaderTable::builtin(), Some(config_path))?;
    let tasks = engine.start(transport, inbound_rx, &shutdown_tx).await;

    {
        let shutdown_tx = shutdown_tx.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received, cleaning up..."),
                Err(e) => error!("Unable to listen for Ctrl+C: {}", e),
            }
            let _ = shutdown_tx.send(());
        });
    }

    info!("MeshSense running. Press Ctrl+C to shutdown");
    engine.join(tasks).await?;

    let state = engine.state().await;
    info!(
        "MeshSense shutdown complete: {} ticks, {} sent, {} dropped, {} unsent",
        state.ticks, state.messages_sent, state.messages_dropped, state.queued
    );
    Ok(())
}
