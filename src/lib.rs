//! # Shard Router Backoff
//!
//! Adaptive error backoff for a stateless router sitting in front of a sharded
//! data store.
//!
//! A client that keeps issuing malformed writes (for example inserts missing the
//! shard key) gets each error back a little later than the last one, while
//! successful requests and the occasional mistake pass through untouched.
//!
//! - [`backoff`]: classifier, ledger, delay policy and controller
//! - [`router`]: reference catalog and executor used by the `shard-router` binary
//! - [`server`]: HTTP front end, metrics and probes

pub mod backoff;
pub mod config;
pub mod constants;
pub mod observability;
pub mod router;
pub mod server;

pub use backoff::{BackoffController, Delivered, RequestExecutor};
pub use config::{BackoffConfig, RouterConfig};
