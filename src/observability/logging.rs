//! # Logging
//!
//! Tracing subscriber setup for the router binary.

use crate::config::LogFormat;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "shard_router_backoff=info,shard_router=info,tower_http=info";

/// Install the global tracing subscriber
///
/// `RUST_LOG` takes precedence over the built-in filter. Calling this twice
/// leaves the first subscriber in place.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_FILTER.into());
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    // A second call fails here and keeps the first subscriber
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
}
