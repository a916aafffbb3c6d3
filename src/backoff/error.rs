//! # Errors
//!
//! Error types for the backoff layer.
//!
//! [`ValidationError`] is the downstream failure whose delivery is being slowed
//! down; it passes through the controller untouched. [`BackoffFault`] covers
//! malfunctions inside the backoff machinery itself and never reaches a client.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Kind of write violation reported by the execution layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// Document is missing one or more fields of the collection's shard key
    MissingShardKey,
    /// Shard key value exceeds the maximum encoded size
    ShardKeyTooLarge,
    /// Namespace is not known to the catalog
    UnknownNamespace,
    /// Document is not a JSON object
    InvalidDocument,
}

impl ViolationKind {
    /// Stable string used for logs, metric labels and response bodies
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::MissingShardKey => "missing_shard_key",
            ViolationKind::ShardKeyTooLarge => "shard_key_too_large",
            ViolationKind::UnknownNamespace => "unknown_namespace",
            ViolationKind::InvalidDocument => "invalid_document",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by the downstream validation/execution collaborator
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} on {namespace}: {message}")]
pub struct ValidationError {
    pub namespace: String,
    pub kind: ViolationKind,
    pub message: String,
}

impl ValidationError {
    pub fn new(
        namespace: impl Into<String>,
        kind: ViolationKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            kind,
            message: message.into(),
        }
    }
}

/// Internal malfunction of the backoff machinery
///
/// Always absorbed by the controller: the delay is forced to zero and the
/// original [`ValidationError`] is still delivered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackoffFault {
    /// The supplied instant is earlier than the last recorded error of the class
    #[error("clock went backwards by {behind:?} for error class {class}")]
    ClockSkew { class: String, behind: Duration },
    /// A ledger lock was poisoned by a panicking holder
    #[error("backoff ledger lock poisoned ({scope})")]
    Poisoned { scope: &'static str },
}

impl BackoffFault {
    /// Label used for the faults counter
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            BackoffFault::ClockSkew { .. } => "clock_skew",
            BackoffFault::Poisoned { .. } => "poisoned",
        }
    }
}

/// Invalid backoff or router configuration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("base delay must be greater than zero")]
    ZeroBaseDelay,
    #[error("max delay {max:?} is smaller than base delay {base:?}")]
    MaxBelowBase { base: Duration, max: Duration },
    #[error("free errors per window must be 0 or 1, got {0}")]
    TooManyFreeErrors(u32),
    #[error("reset window must be greater than zero")]
    ZeroResetWindow,
    #[error("unknown error class scope '{0}' (expected 'namespace' or 'global')")]
    UnknownScope(String),
    #[error("invalid shard collection '{0}' (expected 'db.coll=field1,field2')")]
    InvalidShardCollection(String),
}
