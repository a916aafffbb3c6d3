//! # Error Classifier
//!
//! Maps a failed request outcome to a stable [`ErrorClass`] key.
//!
//! Two failures share a class when they are the same kind of violation on the
//! same target. Anything else about the request (document contents, the
//! human-readable message) is ignored, so a client hammering the router with
//! slightly different bad writes still lands in one class.

use crate::backoff::error::{ConfigError, ValidationError, ViolationKind};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Immutable lookup key for backoff state
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ErrorClass {
    namespace: Option<Arc<str>>,
    kind: ViolationKind,
}

impl ErrorClass {
    /// Class scoped to a single namespace
    pub fn new(namespace: &str, kind: ViolationKind) -> Self {
        Self {
            namespace: Some(Arc::from(namespace)),
            kind,
        }
    }

    /// Class shared by every namespace
    #[must_use]
    pub fn global(kind: ViolationKind) -> Self {
        Self {
            namespace: None,
            kind,
        }
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    #[must_use]
    pub fn kind(&self) -> ViolationKind {
        self.kind
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}:{}", ns, self.kind),
            None => write!(f, "*:{}", self.kind),
        }
    }
}

/// Granularity of error classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClassScope {
    /// One class per (namespace, violation kind)
    #[default]
    Namespace,
    /// One class per violation kind across all namespaces
    Global,
}

impl FromStr for ClassScope {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "namespace" | "ns" => Ok(ClassScope::Namespace),
            "global" => Ok(ClassScope::Global),
            other => Err(ConfigError::UnknownScope(other.to_string())),
        }
    }
}

/// Derives error classes from request outcomes
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier {
    scope: ClassScope,
}

impl ErrorClassifier {
    #[must_use]
    pub fn new(scope: ClassScope) -> Self {
        Self { scope }
    }

    /// Returns `None` for successful outcomes; they never participate in backoff.
    pub fn classify<T>(&self, outcome: &Result<T, ValidationError>) -> Option<ErrorClass> {
        outcome.as_ref().err().map(|e| self.classify_error(e))
    }

    /// Unknown namespaces are client-supplied and always share one global class.
    #[must_use]
    pub fn classify_error(&self, error: &ValidationError) -> ErrorClass {
        match (self.scope, error.kind) {
            (ClassScope::Global, kind) | (_, kind @ ViolationKind::UnknownNamespace) => {
                ErrorClass::global(kind)
            }
            (ClassScope::Namespace, kind) => ErrorClass::new(&error.namespace, kind),
        }
    }
}
