//! # Constants
//!
//! Shared constants used throughout the router.
//!
//! These values represent reasonable defaults and can be overridden via
//! configuration or environment variables where applicable.

/// Default HTTP server port for the router, metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Delay applied to the first penalised error of a window (milliseconds)
pub const DEFAULT_BACKOFF_BASE_DELAY_MS: u64 = 10;

/// Largest power of two applied to the base delay
/// 10ms * 2^6 = 640ms
pub const DEFAULT_BACKOFF_MAX_EXPONENT: u32 = 6;

/// Upper bound on the artificial delay added to a single error (milliseconds)
pub const DEFAULT_BACKOFF_MAX_DELAY_MS: u64 = 640;

/// Idle time after which an error class forgets its history (milliseconds)
pub const DEFAULT_BACKOFF_RESET_WINDOW_MS: u64 = 3_000;

/// Number of errors per window that are returned without any delay
pub const DEFAULT_BACKOFF_FREE_ERRORS: u32 = 1;

/// How often idle error classes are purged from the ledger (seconds)
pub const DEFAULT_BACKOFF_JANITOR_INTERVAL_SECS: u64 = 30;

/// Shard key values larger than this (encoded JSON bytes) are rejected
pub const MAX_SHARD_KEY_BYTES: usize = 512;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;
