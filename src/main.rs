//! Connection dispatch server.
//!
//! # Architecture Overview
//!
//! ```text
//!   TCP client ──▶ TcpConnectionListener ──▶ Dispatcher accept loop
//!                                               │ (one task per connection)
//!                                               ▼
//!                       register ──▶ pipeline (echo) ──▶ complete streams
//!                                                          │
//!                       unregister ◀── teardown ◀── wait for transport close
//!
//!   Heartbeat ──▶ walks registry, closes idle transports
//!   Shutdown  ──▶ stops listener + heartbeat, drains registry
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use conn_dispatch::config::loader::{load_config, ConfigError};
use conn_dispatch::config::validation::validate_config;
use conn_dispatch::config::ServerConfig;
use conn_dispatch::dispatch::{Dispatcher, ServiceContext};
use conn_dispatch::lifecycle::shutdown::drain_connections;
use conn_dispatch::lifecycle::signals::shutdown_signal;
use conn_dispatch::lifecycle::{Heartbeat, Shutdown};
use conn_dispatch::net::TcpConnectionListener;
use conn_dispatch::observability::{logging, metrics};
use conn_dispatch::pipeline::echo::EchoPipeline;

#[derive(Parser)]
#[command(name = "conn-dispatch")]
#[command(about = "Connection dispatch server (echo pipeline)", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listener.bind_address.
    #[arg(short, long)]
    bind: Option<String>,

    /// Validate the configuration and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ServerConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.listener.bind_address = bind;
        validate_config(&config).map_err(ConfigError::Validation)?;
    }
    if cli.check {
        println!("configuration OK");
        return Ok(());
    }

    logging::init_logging(&config.observability);
    tracing::info!("conn-dispatch v0.1.0 starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(e) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                error = %e,
                "Failed to parse metrics address"
            ),
        }
    }

    let context = Arc::new(ServiceContext::from_config(&config));
    let shutdown = Shutdown::new();

    let listener = TcpConnectionListener::bind(&config.listener, &context, shutdown.subscribe()).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    if config.heartbeat.enabled {
        let heartbeat = Heartbeat::from_config(context.registry.clone(), &config.heartbeat);
        tokio::spawn(heartbeat.run(shutdown.subscribe()));
    }

    let dispatcher = Arc::new(Dispatcher::new(Arc::clone(&context), Arc::new(EchoPipeline)));
    let mut accept_loop = dispatcher.start_accepting_connections(listener);

    tokio::select! {
        _ = shutdown_signal() => {
            shutdown.trigger();
            accept_loop.await?;
        }
        result = &mut accept_loop => {
            result?;
            tracing::warn!("Accept loop ended, shutting down");
            shutdown.trigger();
        }
    }

    let grace = Duration::from_secs(config.shutdown.drain_timeout_secs);
    tracing::info!(active = context.registry.len(), grace = ?grace, "Draining connections");
    let forced = drain_connections(&context.registry, grace).await;

    tracing::info!(forced, "Shutdown complete");
    Ok(())
}
