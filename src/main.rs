//! # Shard Router
//!
//! Stateless write router in front of a sharded store, with adaptive backoff
//! on repeated validation errors.
//!
//! ## Usage
//!
//! ```bash
//! # Route inserts for foo.bar, sharded on `shardKey`
//! shard-router --shard-collection foo.bar=shardKey
//!
//! # Compound shard key, JSON logs
//! LOG_FORMAT=json shard-router --shard-collection app.events=tenant,region --port 9090
//! ```

use anyhow::{bail, Context, Result};
use clap::Parser;
use shard_router_backoff::config::LogFormat;
use shard_router_backoff::constants::{
    DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS,
};
use shard_router_backoff::observability::{logging, metrics};
use shard_router_backoff::router::{CatalogExecutor, ShardCatalog, ShardedCollection};
use shard_router_backoff::server::{start_server, wait_until_listening, ServerState};
use shard_router_backoff::{BackoffController, RouterConfig};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

const LONG_VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("BUILD_GIT_HASH"),
    ", built ",
    env!("BUILD_DATETIME"),
    ")"
);

/// Shard router with adaptive error backoff
#[derive(Debug, Parser)]
#[command(name = "shard-router", version, long_version = LONG_VERSION)]
struct Args {
    /// HTTP port (overrides METRICS_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Sharded collection as `db.coll=field1,field2` (repeatable)
    #[arg(long = "shard-collection", value_name = "NS=FIELDS")]
    shard_collections: Vec<ShardedCollection>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Before config parsing, which may warn
    logging::init_tracing(LogFormat::from_env());

    let mut config = RouterConfig::from_env();
    if let Some(port) = args.port {
        config.port = port;
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("BUILD_GIT_HASH"),
        "Starting shard router"
    );

    metrics::register_metrics()?;

    let controller = Arc::new(
        BackoffController::new(&config.backoff).context("Invalid backoff configuration")?,
    );
    let policy = controller.policy();
    info!(
        base_delay = ?policy.base_delay,
        max_delay = ?policy.max_delay,
        max_exponent = policy.max_exponent,
        free_errors = policy.free_errors,
        reset_window = ?config.backoff.reset_window_duration(),
        scope = ?config.backoff.class_scope,
        "Backoff configured"
    );

    if args.shard_collections.is_empty() {
        warn!("No --shard-collection given; every insert will be rejected as unknown_namespace");
    }
    for collection in &args.shard_collections {
        info!(
            namespace = %collection.namespace,
            shard_key = ?collection.pattern.fields(),
            "Routing sharded collection"
        );
    }
    let executor = Arc::new(CatalogExecutor::new(ShardCatalog::from_collections(
        args.shard_collections,
    )));

    let janitor = config
        .backoff
        .janitor_interval_duration()
        .map(|interval| controller.spawn_janitor(interval));

    let state = Arc::new(ServerState::new(Arc::clone(&controller), executor));
    let mut server = tokio::spawn(start_server(config.port, Arc::clone(&state)));

    let listening = wait_until_listening(
        config.port,
        Duration::from_secs(DEFAULT_SERVER_STARTUP_TIMEOUT_SECS),
        Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS),
    )
    .await;
    if !listening {
        server.abort();
        bail!("HTTP server did not start listening on port {}", config.port);
    }
    state.is_ready.store(true, Ordering::Relaxed);
    info!("Router ready");

    let result = tokio::select! {
        joined = &mut server => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                error!("HTTP server error: {}", e);
                Err(e)
            }
            Err(e) => Err(anyhow::Error::new(e).context("HTTP server task panicked")),
        },
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
            server.abort();
            Ok(())
        }
    };

    if let Some(janitor) = janitor {
        janitor.abort();
    }
    result
}
