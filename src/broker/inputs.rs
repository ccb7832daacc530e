// Verb input envelopes - serde shapes callers hand to the dispatcher
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clause::ClauseSet;

/// List clauses plus page coordinates; skip/take are derived, not accepted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchPaginatedRequest {
    #[serde(flatten)]
    pub clauses: ClauseSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchByIdOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOneInput {
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Value>,
}

impl CreateOneInput {
    pub fn new(data: Value) -> Self {
        Self {
            data,
            select: None,
            include: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateManyInput {
    pub data: Vec<Value>,
    #[serde(rename = "skipDuplicates", default)]
    pub skip_duplicates: bool,
}

impl CreateManyInput {
    pub fn new(data: Vec<Value>) -> Self {
        Self {
            data,
            skip_duplicates: false,
        }
    }

    pub fn skip_duplicates(mut self) -> Self {
        self.skip_duplicates = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOneInput {
    pub id: String,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Value>,
}

impl UpdateOneInput {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
            select: None,
            include: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateManyInput {
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<Value>,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteOneInput {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<Value>,
}

impl DeleteOneInput {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            select: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteManyInput {
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertInput {
    #[serde(rename = "where")]
    pub where_clause: Value,
    pub create: Value,
    pub update: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub select: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateInput {
    #[serde(rename = "where", default, skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<Value>,
    #[serde(rename = "groupBy", default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,
    pub aggregate: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub having: Option<Value>,
}
