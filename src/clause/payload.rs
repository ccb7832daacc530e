use serde_json::Value;

use crate::error::BrokerError;
use crate::registry::ModelDescriptor;
use crate::row::{Row, ID_FIELD};

/// Validates create/update payloads against a model descriptor: unknown
/// keys rejected, kinds enforced, defaults applied, required fields present.
pub struct PayloadValidator<'a> {
    model: &'a ModelDescriptor,
}

impl<'a> PayloadValidator<'a> {
    pub fn new(model: &'a ModelDescriptor) -> Self {
        Self { model }
    }

    /// Validate a create payload and return the row to insert. Output keys
    /// follow descriptor field order; absent optional fields with a declared
    /// default are filled in. A caller-supplied id is kept as-is.
    pub fn validate_create(&self, data: &Value) -> Result<Row, BrokerError> {
        let input = self.as_data_object(data)?;
        self.reject_unknown_keys(input)?;

        let mut row = Row::new();
        for field in &self.model.fields {
            let value = match input.get(&field.name) {
                Some(value) => value.clone(),
                None => match &field.default_value {
                    Some(default) => default.clone(),
                    None => Value::Null,
                },
            };

            if value.is_null() {
                if field.required {
                    return Err(BrokerError::MissingRequiredField(field.name.clone()));
                }
                // Ids are filled by the store; other absent fields stay out of the row
                continue;
            }
            self.check_kind(&field.name, &value)?;
            row.insert(field.name.clone(), value);
        }
        Ok(row)
    }

    /// Validate an update patch. Only the supplied fields are checked;
    /// nulling a required field or touching the id is rejected.
    pub fn validate_update(&self, data: &Value) -> Result<Row, BrokerError> {
        let input = self.as_data_object(data)?;
        self.reject_unknown_keys(input)?;

        let mut patch = Row::new();
        for (name, value) in input {
            if name == ID_FIELD {
                return Err(BrokerError::invalid_clause("field 'id' cannot be updated"));
            }
            let field = self.model.field(name).ok_or_else(|| {
                BrokerError::unknown_field(&self.model.name, name)
            })?;
            if value.is_null() {
                if field.required {
                    return Err(BrokerError::MissingRequiredField(field.name.clone()));
                }
                patch.insert(name.clone(), Value::Null);
                continue;
            }
            self.check_kind(name, value)?;
            patch.insert(name.clone(), value.clone());
        }
        Ok(patch)
    }

    fn as_data_object<'v>(&self, data: &'v Value) -> Result<&'v Row, BrokerError> {
        data.as_object()
            .ok_or_else(|| BrokerError::invalid_clause("data must be an object"))
    }

    fn reject_unknown_keys(&self, input: &Row) -> Result<(), BrokerError> {
        for key in input.keys() {
            if self.model.field(key).is_none() {
                return Err(BrokerError::unknown_field(&self.model.name, key));
            }
        }
        Ok(())
    }

    fn check_kind(&self, name: &str, value: &Value) -> Result<(), BrokerError> {
        // Field existence was checked by the caller
        if let Some(field) = self.model.field(name) {
            if !field.kind.accepts(value) {
                return Err(BrokerError::invalid_value(name, field.kind.expected()));
            }
        }
        Ok(())
    }
}
