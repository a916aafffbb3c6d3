//! # Reference Router
//!
//! A minimal write path for hosting the backoff controller: an in-memory
//! shard catalog and an executor that rejects writes missing the shard key.

pub mod catalog;
pub mod executor;

pub use catalog::{ShardCatalog, ShardKeyPattern, ShardedCollection};
pub use executor::{CatalogExecutor, InsertAck, WriteRequest};
