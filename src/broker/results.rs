// Mutation result envelopes
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::row::Row;

/// Bulk update/delete report how many rows they touched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationCount {
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Created,
    Duplicate,
    Error,
}

/// Per-row result of createMany, one per input row in input order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowOutcome {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub status: RowStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictDetail>,
}

impl RowOutcome {
    pub fn created(index: usize, id: Option<String>) -> Self {
        Self {
            index,
            id,
            status: RowStatus::Created,
            error: None,
            conflict: None,
        }
    }

    pub fn duplicate(index: usize, field: String, value: Value) -> Self {
        Self {
            index,
            id: None,
            status: RowStatus::Duplicate,
            error: None,
            conflict: Some(ConflictDetail { field, value }),
        }
    }

    pub fn error(index: usize, message: impl Into<String>) -> Self {
        Self {
            index,
            id: None,
            status: RowStatus::Error,
            error: Some(message.into()),
            conflict: None,
        }
    }
}

/// Which unique value blocked a duplicate row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictDetail {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateManyResult {
    pub count: u64,
    pub outcomes: Vec<RowOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertBranch {
    Created,
    Updated,
}

/// Upsert reports which branch ran alongside the resulting row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertResult {
    pub branch: UpsertBranch,
    pub row: Row,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearCacheResult {
    pub success: bool,
}
