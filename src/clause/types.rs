use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BrokerError;

/// Raw clause envelope accepted by list reads. Transient per call; field
/// values stay untyped JSON until translation validates them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClauseSet {
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub where_clause: Option<Value>,
    #[serde(rename = "orderBy", skip_serializing_if = "Option::is_none")]
    pub order_by: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take: Option<i64>,
}

impl ClauseSet {
    /// Deserialize a caller-supplied clause object
    pub fn parse(value: Value) -> Result<Self, BrokerError> {
        serde_json::from_value(value)
            .map_err(|e| BrokerError::invalid_clause(format!("malformed clause set: {}", e)))
    }

    pub fn with_where(mut self, where_clause: Value) -> Self {
        self.where_clause = Some(where_clause);
        self
    }
}

/// Leaf filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "equals")]
    Equals,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "notIn")]
    NotIn,
    #[serde(rename = "lt")]
    Lt,
    #[serde(rename = "lte")]
    Lte,
    #[serde(rename = "gt")]
    Gt,
    #[serde(rename = "gte")]
    Gte,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "startsWith")]
    StartsWith,
    #[serde(rename = "endsWith")]
    EndsWith,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Equals => "equals",
            FilterOp::In => "in",
            FilterOp::NotIn => "notIn",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Contains => "contains",
            FilterOp::StartsWith => "startsWith",
            FilterOp::EndsWith => "endsWith",
        }
    }

    /// Operators that need an ordered field kind
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            FilterOp::Lt | FilterOp::Lte | FilterOp::Gt | FilterOp::Gte
        )
    }

    /// Operators that need a textual field kind
    pub fn is_text_match(&self) -> bool {
        matches!(
            self,
            FilterOp::Contains | FilterOp::StartsWith | FilterOp::EndsWith
        )
    }
}

/// Validated filter tree handed to the store. Leaves carry a descriptor
/// field name, negation and grouping are explicit nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "camelCase")]
pub enum FilterNode {
    Field {
        field: String,
        op: FilterOp,
        value: Value,
    },
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
    Not(Box<FilterNode>),
}

impl FilterNode {
    pub fn field(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        FilterNode::Field {
            field: field.into(),
            op,
            value,
        }
    }

    /// Point lookup on the id field
    pub fn id_equals(id: &str) -> Self {
        FilterNode::field(crate::row::ID_FIELD, FilterOp::Equals, Value::from(id))
    }

    /// Visit every leaf field name in the tree
    pub fn for_each_field(&self, visit: &mut impl FnMut(&str)) {
        match self {
            FilterNode::Field { field, .. } => visit(field),
            FilterNode::And(nodes) | FilterNode::Or(nodes) => {
                for node in nodes {
                    node.for_each_field(visit);
                }
            }
            FilterNode::Not(inner) => inner.for_each_field(visit),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl SortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "asc",
            SortDirection::Desc => "desc",
        }
    }
}

/// One orderBy entry; earlier keys sort before later ones
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Desc,
        }
    }
}

/// Shape of the rows a read should return. `fields: None` keeps every
/// scalar field; relations are resolved by the store through its declared
/// links and shaped by the nested projection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub fields: Option<Vec<String>>,
    pub relations: Vec<RelationProjection>,
}

impl Projection {
    pub fn is_empty(&self) -> bool {
        self.fields.is_none() && self.relations.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationProjection {
    /// Relation name on the parent model
    pub relation: String,
    /// Target model backing the relation
    pub model: String,
    pub many: bool,
    pub nested: Projection,
}
