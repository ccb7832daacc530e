// Broker Error Types
use serde_json::{json, Value};
use thiserror::Error;

use crate::registry::FieldKind;
use crate::store::StoreError;

/// Caller-facing error for every verb, with stable machine codes via `kind()`
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrokerError {
    // Registry lookups
    #[error("unknown model '{0}'")]
    UnknownModel(String),

    // Clause validation
    #[error("unknown field '{field}' on model '{model}'")]
    UnknownField { model: String, field: String },
    #[error("unknown filter operator '{0}'")]
    UnknownOperator(String),
    #[error("select and include cannot be combined in the same call")]
    ConflictingProjection,
    #[error("invalid clause: {0}")]
    InvalidClause(String),
    #[error("invalid range: {0}")]
    InvalidRange(String),

    // Payload validation
    #[error("missing required field '{0}'")]
    MissingRequiredField(String),
    #[error("invalid value for field '{field}': expected {expected}")]
    InvalidFieldValue { field: String, expected: String },
    #[error("missing id")]
    MissingId,

    // Verb execution
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unsupported aggregate: {op} on {kind} field '{field}'")]
    UnsupportedAggregate {
        op: String,
        field: String,
        kind: FieldKind,
    },
    #[error("uniqueness violation on field '{field}' at row {index}")]
    UniquenessViolation {
        index: usize,
        field: String,
        value: Value,
    },

    // Store health
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl BrokerError {
    /// Get error code for client handling
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::UnknownModel(_) => "UNKNOWN_MODEL",
            BrokerError::UnknownField { .. } => "UNKNOWN_FIELD",
            BrokerError::UnknownOperator(_) => "UNKNOWN_OPERATOR",
            BrokerError::ConflictingProjection => "CONFLICTING_PROJECTION",
            BrokerError::InvalidClause(_) => "INVALID_CLAUSE",
            BrokerError::InvalidRange(_) => "INVALID_RANGE",
            BrokerError::MissingRequiredField(_) => "MISSING_REQUIRED_FIELD",
            BrokerError::InvalidFieldValue { .. } => "INVALID_FIELD_VALUE",
            BrokerError::MissingId => "MISSING_ID",
            BrokerError::NotFound(_) => "NOT_FOUND",
            BrokerError::UnsupportedAggregate { .. } => "UNSUPPORTED_AGGREGATE",
            BrokerError::UniquenessViolation { .. } => "UNIQUENESS_VIOLATION",
            BrokerError::Timeout(_) => "TIMEOUT",
            BrokerError::StoreUnavailable(_) => "STORE_UNAVAILABLE",
        }
    }

    /// True when a retry against the same store may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BrokerError::Timeout(_) | BrokerError::StoreUnavailable(_)
        )
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        match self {
            BrokerError::UniquenessViolation {
                index,
                field,
                value,
            } => {
                json!({
                    "error": true,
                    "message": self.to_string(),
                    "code": self.kind(),
                    "conflict": { "index": index, "field": field, "value": value }
                })
            }
            _ => {
                json!({
                    "error": true,
                    "message": self.to_string(),
                    "code": self.kind()
                })
            }
        }
    }
}

// Shorthand constructors for the kinds built in many places
impl BrokerError {
    pub fn unknown_field(model: impl Into<String>, field: impl Into<String>) -> Self {
        BrokerError::UnknownField {
            model: model.into(),
            field: field.into(),
        }
    }

    pub fn invalid_clause(message: impl Into<String>) -> Self {
        BrokerError::InvalidClause(message.into())
    }

    pub fn invalid_range(message: impl Into<String>) -> Self {
        BrokerError::InvalidRange(message.into())
    }

    pub fn invalid_value(field: impl Into<String>, expected: impl Into<String>) -> Self {
        BrokerError::InvalidFieldValue {
            field: field.into(),
            expected: expected.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        BrokerError::NotFound(message.into())
    }
}

// Convert store failures into the caller-facing taxonomy
impl From<StoreError> for BrokerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UniquenessViolation {
                index,
                field,
                value,
            } => BrokerError::UniquenessViolation {
                index,
                field,
                value,
            },
            StoreError::Timeout(msg) => BrokerError::Timeout(msg),
            StoreError::Unavailable(msg) => BrokerError::StoreUnavailable(msg),
            StoreError::Internal(msg) => {
                // Don't expose engine internals to callers
                tracing::error!("store internal error: {}", msg);
                BrokerError::StoreUnavailable("backing store failed".to_string())
            }
        }
    }
}
