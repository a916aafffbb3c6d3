//! # Catalog Executor
//!
//! Validates writes against the [`ShardCatalog`] and acknowledges the valid
//! ones. Stands in for the real targeting and forwarding to partitions.

use crate::backoff::{RequestExecutor, ValidationError, ViolationKind};
use crate::constants::MAX_SHARD_KEY_BYTES;
use crate::router::catalog::ShardCatalog;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Single-document insert forwarded by the router
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub namespace: String,
    pub document: Value,
}

impl WriteRequest {
    pub fn new(namespace: impl Into<String>, document: Value) -> Self {
        Self {
            namespace: namespace.into(),
            document,
        }
    }
}

/// Acknowledgement of an accepted write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertAck {
    pub namespace: String,
    pub inserted: u64,
    pub shard_key: Map<String, Value>,
}

#[derive(Debug)]
pub struct CatalogExecutor {
    catalog: ShardCatalog,
    inserted: HashMap<String, AtomicU64>,
}

impl CatalogExecutor {
    pub fn new(catalog: ShardCatalog) -> Self {
        let inserted = catalog
            .namespaces()
            .map(|ns| (ns.to_string(), AtomicU64::new(0)))
            .collect();
        Self { catalog, inserted }
    }

    pub fn catalog(&self) -> &ShardCatalog {
        &self.catalog
    }

    /// Documents accepted so far for `namespace`
    pub fn inserted(&self, namespace: &str) -> u64 {
        self.inserted
            .get(namespace)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    fn validate(&self, request: &WriteRequest) -> Result<Map<String, Value>, ValidationError> {
        let ns = request.namespace.as_str();
        let pattern = self.catalog.lookup(ns).ok_or_else(|| {
            ValidationError::new(ns, ViolationKind::UnknownNamespace, "collection is not sharded")
        })?;

        let document = request.document.as_object().ok_or_else(|| {
            ValidationError::new(ns, ViolationKind::InvalidDocument, "document must be an object")
        })?;

        let shard_key = pattern.extract(document).map_err(|missing| {
            ValidationError::new(
                ns,
                ViolationKind::MissingShardKey,
                format!("document is missing shard key field(s): {}", missing.join(", ")),
            )
        })?;

        let encoded = serde_json::to_vec(&shard_key).map_or(usize::MAX, |bytes| bytes.len());
        if encoded > MAX_SHARD_KEY_BYTES {
            return Err(ValidationError::new(
                ns,
                ViolationKind::ShardKeyTooLarge,
                format!("shard key is {encoded} bytes, limit is {MAX_SHARD_KEY_BYTES}"),
            ));
        }

        Ok(shard_key)
    }
}

#[async_trait]
impl RequestExecutor for CatalogExecutor {
    type Request = WriteRequest;
    type Response = InsertAck;

    async fn validate_and_execute(
        &self,
        request: WriteRequest,
    ) -> Result<InsertAck, ValidationError> {
        let shard_key = self.validate(&request)?;
        if let Some(counter) = self.inserted.get(&request.namespace) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        Ok(InsertAck {
            namespace: request.namespace,
            inserted: 1,
            shard_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::catalog::ShardKeyPattern;
    use serde_json::json;

    fn executor() -> CatalogExecutor {
        CatalogExecutor::new(
            ShardCatalog::new().with_collection("foo.bar", ShardKeyPattern::new(["shardKey"])),
        )
    }

    #[tokio::test]
    async fn test_valid_insert_is_acknowledged() {
        let exec = executor();
        let ack = exec
            .validate_and_execute(WriteRequest::new("foo.bar", json!({ "shardKey": 1, "a": 2 })))
            .await
            .unwrap();
        assert_eq!(ack.inserted, 1);
        assert_eq!(Value::Object(ack.shard_key), json!({ "shardKey": 1 }));
        assert_eq!(exec.inserted("foo.bar"), 1);
    }

    #[tokio::test]
    async fn test_violation_kinds() {
        let exec = executor();
        let cases = [
            (
                WriteRequest::new("foo.bar", json!({ "hello": "world" })),
                ViolationKind::MissingShardKey,
            ),
            (
                WriteRequest::new("foo.baz", json!({ "shardKey": 1 })),
                ViolationKind::UnknownNamespace,
            ),
            (WriteRequest::new("foo.bar", json!([1, 2])), ViolationKind::InvalidDocument),
            (
                WriteRequest::new(
                    "foo.bar",
                    json!({ "shardKey": "x".repeat(MAX_SHARD_KEY_BYTES) }),
                ),
                ViolationKind::ShardKeyTooLarge,
            ),
        ];
        for (request, expected) in cases {
            let err = exec.validate_and_execute(request).await.unwrap_err();
            assert_eq!(err.kind, expected);
        }
        assert_eq!(exec.inserted("foo.bar"), 0);
    }
}
