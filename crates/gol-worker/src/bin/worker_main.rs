//! Worker Binary Entry Point
//!
//! Standalone worker process: binds its RPC port, subscribes itself with the
//! broker and then computes whatever row partitions the broker sends.
//!
//! # Usage
//!
//! ```bash
//! # Worker on the default port, broker on localhost
//! cargo run --bin gol-worker
//!
//! # Second worker on the same host
//! cargo run --bin gol-worker -- --port 8081 --broker tcp://127.0.0.1:8030
//!
//! # Worker on another machine, advertising its outbound interface
//! cargo run --bin gol-worker -- --broker tcp://10.0.0.5:8030 --advertise-host auto
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use gol_protocol::DEFAULT_WORKER_PORT;
use gol_worker::worker::control_plane;
use gol_worker::{Worker, WorkerConfig, WorkerServer};

/// Game of Life Worker Process
#[derive(Parser, Debug)]
#[command(name = "gol-worker")]
#[command(version = "0.1.0")]
#[command(about = "Game of Life worker - computes row partitions for the broker")]
struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = DEFAULT_WORKER_PORT)]
    port: u16,

    /// Interface to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Broker endpoint to subscribe with
    #[arg(long, default_value = "tcp://127.0.0.1:8030")]
    broker: String,

    /// Host the broker should dial back ("auto" detects the outbound address)
    #[arg(long, default_value = "127.0.0.1")]
    advertise_host: String,

    /// Timeout for dialling the broker (milliseconds)
    #[arg(long, default_value_t = 5000)]
    connect_timeout_ms: u64,

    /// Timeout for requests to the broker (milliseconds)
    #[arg(long, default_value_t = 30000)]
    rpc_timeout_ms: u64,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              Game of Life Worker v0.1.0                    ║");
    println!("╠════════════════════════════════════════════════════════════╣");
    println!("║  Listen:      {:<44} ║", format!("{}:{}", args.bind, args.port));
    println!("║  Broker:      {:<44} ║", truncate_str(&args.broker, 44));
    println!("╚════════════════════════════════════════════════════════════╝");

    let config = WorkerConfig::default()
        .with_id(format!("worker@{}", args.port))
        .with_bind_host(args.bind)
        .with_port(args.port)
        .with_broker(args.broker)
        .with_advertise_host(args.advertise_host)
        .with_timeouts(
            Duration::from_millis(args.connect_timeout_ms),
            Duration::from_millis(args.rpc_timeout_ms),
        );

    let worker = Arc::new(Worker::new(config.clone()));
    let server = WorkerServer::bind(worker)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_endpoint()))?;

    let port = server.port().unwrap_or(config.port);
    let address = control_plane::advertised_address(&config, port)?;

    // The server must already be answering when the broker dials back.
    let serving = tokio::spawn(server.run_until(async {
        let _ = tokio::signal::ctrl_c().await;
    }));

    control_plane::subscribe(&config, &address).await?;

    let reason = serving.await.context("Worker server task panicked")??;
    tracing::info!("Worker exiting ({:?})", reason);
    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

/// Shorten to at most `max_len` characters, cutting on a char boundary
fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let keep = max_len.saturating_sub(3);
    let cut = s.char_indices().nth(keep).map_or(s.len(), |(i, _)| i);
    format!("{}...", &s[..cut])
}
