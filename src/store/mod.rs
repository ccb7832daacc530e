// Storage seam - the broker talks to any engine through this trait
pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::clause::{FilterNode, Projection, SortKey};
use crate::row::Row;

pub use memory::{MemoryStore, RelationLink};

/// A fully validated, storage-shaped read. Produced by clause translation;
/// engines never see raw caller JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreQuery {
    pub filter: Option<FilterNode>,
    pub sort: Vec<SortKey>,
    pub skip: Option<u64>,
    pub take: Option<u64>,
    pub projection: Option<Projection>,
}

/// Validated aggregate request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregatePlan {
    pub filter: Option<FilterNode>,
    pub group_by: Vec<String>,
    pub ops: AggregateOps,
    pub having: Option<FilterNode>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateOps {
    /// count: true - number of rows
    pub count_all: bool,
    /// count: [fields] - non-null values per field
    pub count_fields: Vec<String>,
    pub sum: Vec<String>,
    pub avg: Vec<String>,
    pub min: Vec<String>,
    pub max: Vec<String>,
}

/// Per-row result of a bulk insert, in input order
#[derive(Debug, Clone, PartialEq)]
pub enum InsertOutcome {
    Created(Row),
    /// Skipped because a declared unique field already holds this value
    Duplicate { field: String, value: Value },
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("uniqueness violation on field '{field}' at row {index}")]
    UniquenessViolation {
        index: usize,
        field: String,
        value: Value,
    },
    #[error("store operation timed out: {0}")]
    Timeout(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store internal error: {0}")]
    Internal(String),
}

/// Verbs every backing engine must provide. Collections are keyed by the
/// descriptor's collection name; rows are untyped JSON objects.
#[async_trait]
pub trait Store: Send + Sync {
    async fn query(&self, collection: &str, query: &StoreQuery) -> Result<Vec<Row>, StoreError>;

    async fn count(
        &self,
        collection: &str,
        filter: Option<&FilterNode>,
    ) -> Result<u64, StoreError>;

    async fn aggregate(&self, collection: &str, plan: &AggregatePlan)
        -> Result<Value, StoreError>;

    /// Insert rows in order. With `skip_duplicates` a conflicting row becomes
    /// a `Duplicate` outcome; without it the first conflict aborts the call
    /// (rows inserted before it stay).
    async fn insert(
        &self,
        collection: &str,
        rows: Vec<Row>,
        skip_duplicates: bool,
    ) -> Result<Vec<InsertOutcome>, StoreError>;

    /// Merge `patch` into every row matching `filter`; returns the rows
    /// after the merge. `None` matches all rows.
    async fn update(
        &self,
        collection: &str,
        filter: Option<&FilterNode>,
        patch: &Row,
    ) -> Result<Vec<Row>, StoreError>;

    /// Remove every row matching `filter`; returns the removed rows
    async fn delete(
        &self,
        collection: &str,
        filter: Option<&FilterNode>,
    ) -> Result<Vec<Row>, StoreError>;
}
