use serde_json::Value;

use super::types::{SortDirection, SortKey};
use crate::error::BrokerError;
use crate::registry::{FieldKind, ModelDescriptor};

/// Translates an `orderBy` clause into validated sort keys. Accepts an
/// object (`{"created_at": "desc"}`, keys in listed order), an array of
/// such objects, or the shorthand string form (`"created_at desc, title"`).
pub struct OrderByTranslator<'a> {
    model: &'a ModelDescriptor,
}

impl<'a> OrderByTranslator<'a> {
    pub fn new(model: &'a ModelDescriptor) -> Self {
        Self { model }
    }

    pub fn translate(&self, order_data: &Value) -> Result<Vec<SortKey>, BrokerError> {
        let mut keys = Vec::new();
        match order_data {
            Value::Null => {}
            Value::Object(obj) => {
                for (field, direction) in obj {
                    keys.push(self.sort_key(field, direction)?);
                }
            }
            Value::Array(items) => {
                for item in items {
                    let obj = item.as_object().ok_or_else(|| {
                        BrokerError::invalid_clause("orderBy entries must be objects")
                    })?;
                    for (field, direction) in obj {
                        keys.push(self.sort_key(field, direction)?);
                    }
                }
            }
            Value::String(spec) => {
                for part in spec.split(',') {
                    let part = part.trim();
                    if part.is_empty() {
                        continue;
                    }
                    let mut tokens = part.split_whitespace();
                    let field = tokens.next().unwrap_or_default();
                    let direction = tokens.next().unwrap_or("asc");
                    keys.push(self.sort_key(field, &Value::from(direction))?);
                }
            }
            _ => {
                return Err(BrokerError::invalid_clause(
                    "orderBy must be an object, array, or string",
                ))
            }
        }
        Ok(keys)
    }

    fn sort_key(&self, field: &str, direction: &Value) -> Result<SortKey, BrokerError> {
        let spec = self
            .model
            .field(field)
            .ok_or_else(|| BrokerError::unknown_field(&self.model.name, field))?;
        // Json values have no usable order
        if spec.kind == FieldKind::Json {
            return Err(BrokerError::invalid_value(field, "an orderable field kind"));
        }

        let token = direction.as_str().ok_or_else(|| {
            BrokerError::invalid_clause(format!("orderBy direction for '{}' must be a string", field))
        })?;
        let direction = match token.to_lowercase().as_str() {
            "asc" => SortDirection::Asc,
            "desc" => SortDirection::Desc,
            other => {
                return Err(BrokerError::invalid_clause(format!(
                    "invalid sort direction '{}' for '{}'",
                    other, field
                )))
            }
        };
        Ok(SortKey {
            field: field.to_string(),
            direction,
        })
    }
}
