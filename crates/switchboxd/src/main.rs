use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use switchboxd::Config;
use switchboxd::Device;
use switchboxd::Engine;
use switchboxd::LogLevel;
use switchboxd::api;
use switchboxd::notify;
use switchboxd::transport::HttpTransport;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Bridge between a two-relay switchbox and a home-automation host
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "switchboxd.toml")]
    config: PathBuf,

    /// Override the configured default log level
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,
}

/// A running HTTP server and the sender that stops it
struct Server {
    name: &'static str,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<anyhow::Result<()>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Initialize tracing/logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(config.logging.filter(args.log_level))
        .init();

    tracing::info!("switchboxd starting");
    tracing::info!("Loaded config from: {}", args.config.display());
    tracing::info!(
        "Device: {} at {} (relays: {})",
        config.device.name,
        config.device.ip,
        config.device.names.join(", ")
    );

    // Claim both ports up front so a taken port stops startup
    let notify_listener = match &config.notifications {
        Some(notifications) => Some(
            notify::bind(&notifications.listen, notifications.port)
                .await
                .with_context(|| {
                    format!(
                        "Failed to bind notification listener on {}:{}",
                        notifications.listen, notifications.port
                    )
                })?,
        ),
        None => None,
    };
    let api_listener = match &config.api {
        Some(api_config) => Some(
            api::bind(&api_config.listen, api_config.port)
                .await
                .with_context(|| {
                    format!(
                        "Failed to bind HTTP API on {}:{}",
                        api_config.listen, api_config.port
                    )
                })?,
        ),
        None => None,
    };

    let transport = HttpTransport::new(config.engine.request_timeout())
        .context("Failed to create HTTP client")?;
    let engine = Engine::spawn(
        Device::new(config.device.ip.clone()),
        Arc::new(transport),
        config.engine_config(),
    );

    let mut servers = Vec::new();

    if let Some(listener) = notify_listener {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(notify::serve(listener, engine.clone(), shutdown_rx));
        servers.push(Server {
            name: "notification listener",
            shutdown_tx,
            handle,
        });
    }

    if let Some(listener) = api_listener {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(api::serve(
            listener,
            engine.clone(),
            config.device.name.clone(),
            config.device.names.clone(),
            shutdown_rx,
        ));
        servers.push(Server {
            name: "HTTP API",
            shutdown_tx,
            handle,
        });
    }

    // Report every relay change, like a host adapter would
    let mut updates = engine.subscribe();
    let names = config.device.names.clone();
    let reporter = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let Some(record) = updates.borrow_and_update().clone() else {
                continue;
            };
            for relay in record.relays() {
                let name = names.get(relay.id).map(String::as_str).unwrap_or("?");
                tracing::debug!("{} (relay {}): on={}", name, relay.id, relay.on);
            }
        }
    });

    // Initial state, so the first host read is likely a cache hit
    engine.refresh(true);

    tracing::info!("switchboxd running in {} mode", engine.mode());
    tracing::info!("Press Ctrl+C to exit");

    // Wait for Ctrl+C
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received shutdown signal");
        }
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    for server in servers {
        let _ = server.shutdown_tx.send(());
        match server.handle.await {
            Ok(Ok(())) => tracing::info!("{} stopped", server.name),
            Ok(Err(e)) => tracing::error!("{} failed: {:#}", server.name, e),
            Err(e) => tracing::error!("{} task error: {}", server.name, e),
        }
    }

    drop(engine);
    reporter.abort();

    tracing::info!("switchboxd shutdown complete");

    Ok(())
}
