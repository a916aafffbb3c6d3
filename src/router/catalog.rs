//! # Shard Catalog
//!
//! In-memory stand-in for the cluster's catalog service: which collections
//! are sharded and on which key.

use crate::backoff::ConfigError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::str::FromStr;

/// Ordered list of (possibly dotted) field paths making up a shard key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardKeyPattern {
    fields: Vec<String>,
}

impl ShardKeyPattern {
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Extract the shard key from `document`
    ///
    /// Returns the missing field paths if any part of the key is absent or null.
    pub fn extract(
        &self,
        document: &Map<String, Value>,
    ) -> Result<Map<String, Value>, Vec<String>> {
        let mut key = Map::new();
        let mut missing = Vec::new();
        for field in &self.fields {
            match lookup_path(document, field) {
                Some(value) if !value.is_null() => {
                    key.insert(field.clone(), value.clone());
                }
                _ => missing.push(field.clone()),
            }
        }
        if missing.is_empty() {
            Ok(key)
        } else {
            Err(missing)
        }
    }
}

fn lookup_path<'a>(document: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// A `db.coll=field1,field2` declaration, as given on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardedCollection {
    pub namespace: String,
    pub pattern: ShardKeyPattern,
}

impl FromStr for ShardedCollection {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidShardCollection(s.to_string());
        let (namespace, fields) = s.split_once('=').ok_or_else(invalid)?;
        let namespace = namespace.trim();
        if !is_valid_namespace(namespace) {
            return Err(invalid());
        }
        let fields: Vec<&str> = fields
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .collect();
        if fields.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            namespace: namespace.to_string(),
            pattern: ShardKeyPattern::new(fields),
        })
    }
}

/// `db.collection` with both parts non-empty
#[must_use]
pub fn is_valid_namespace(namespace: &str) -> bool {
    matches!(namespace.split_once('.'), Some((db, coll)) if !db.is_empty() && !coll.is_empty())
}

/// Map of sharded namespaces to their shard key
#[derive(Debug, Clone, Default)]
pub struct ShardCatalog {
    collections: HashMap<String, ShardKeyPattern>,
}

impl ShardCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_collection(
        mut self,
        namespace: impl Into<String>,
        pattern: ShardKeyPattern,
    ) -> Self {
        self.collections.insert(namespace.into(), pattern);
        self
    }

    pub fn from_collections(collections: impl IntoIterator<Item = ShardedCollection>) -> Self {
        Self {
            collections: collections
                .into_iter()
                .map(|c| (c.namespace, c.pattern))
                .collect(),
        }
    }

    pub fn lookup(&self, namespace: &str) -> Option<&ShardKeyPattern> {
        self.collections.get(namespace)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty()
    }
}
