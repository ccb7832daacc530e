use serde_json::{Map, Value};

use super::types::{Projection, RelationProjection};
use crate::error::BrokerError;
use crate::registry::{ModelDescriptor, RegistrySnapshot};

/// Builds a validated `Projection` from `select`/`include` clauses.
/// Nested objects recurse through the related model's descriptor, so a
/// registry snapshot is needed for anything beyond scalar selection.
pub struct ProjectionTranslator<'a> {
    snapshot: &'a RegistrySnapshot,
}

impl<'a> ProjectionTranslator<'a> {
    pub fn new(snapshot: &'a RegistrySnapshot) -> Self {
        Self { snapshot }
    }

    pub fn translate(
        &self,
        model: &ModelDescriptor,
        select: Option<&Value>,
        include: Option<&Value>,
    ) -> Result<Option<Projection>, BrokerError> {
        match (select, include) {
            (Some(_), Some(_)) => Err(BrokerError::ConflictingProjection),
            (None, None) => Ok(None),
            (Some(select), None) => Ok(Some(self.parse_select(model, select)?)),
            (None, Some(include)) => Ok(Some(self.parse_include(model, include)?)),
        }
    }

    /// select picks exact fields and may pull relations in alongside them
    fn parse_select(&self, model: &ModelDescriptor, select: &Value) -> Result<Projection, BrokerError> {
        let obj = as_clause_object(select, "select")?;
        let mut fields = Vec::new();
        let mut relations = Vec::new();

        for (key, value) in obj {
            if model.field(key).is_some() {
                expect_true(key, value, "select")?;
                fields.push(key.clone());
            } else if let Some(relation) = model.relation(key) {
                relations.push(self.relation_projection(relation, value)?);
            } else {
                return Err(BrokerError::unknown_field(&model.name, key));
            }
        }

        Ok(Projection {
            fields: Some(fields),
            relations,
        })
    }

    /// include keeps every scalar field and adds the named relations
    fn parse_include(&self, model: &ModelDescriptor, include: &Value) -> Result<Projection, BrokerError> {
        let obj = as_clause_object(include, "include")?;
        let mut relations = Vec::new();

        for (key, value) in obj {
            let relation = model
                .relation(key)
                .ok_or_else(|| BrokerError::unknown_field(&model.name, key))?;
            relations.push(self.relation_projection(relation, value)?);
        }

        Ok(Projection {
            fields: None,
            relations,
        })
    }

    fn relation_projection(
        &self,
        relation: &crate::registry::RelationSpec,
        value: &Value,
    ) -> Result<RelationProjection, BrokerError> {
        let target = self.snapshot.descriptor(&relation.model)?;
        let nested = match value {
            Value::Bool(true) => Projection::default(),
            Value::Object(obj) => self.parse_nested(target, obj, &relation.name)?,
            _ => {
                return Err(BrokerError::invalid_clause(format!(
                    "relation '{}' takes true or a nested object",
                    relation.name
                )))
            }
        };
        Ok(RelationProjection {
            relation: relation.name.clone(),
            model: relation.model.clone(),
            many: relation.many,
            nested,
        })
    }

    /// Nested objects carry their own select/include pair, same rules as the top level
    fn parse_nested(
        &self,
        target: &ModelDescriptor,
        obj: &Map<String, Value>,
        relation_name: &str,
    ) -> Result<Projection, BrokerError> {
        for key in obj.keys() {
            if key != "select" && key != "include" {
                return Err(BrokerError::invalid_clause(format!(
                    "nested projection for '{}' supports select/include only, got '{}'",
                    relation_name, key
                )));
            }
        }
        let projection = self.translate(target, obj.get("select"), obj.get("include"))?;
        Ok(projection.unwrap_or_default())
    }
}

fn as_clause_object<'v>(value: &'v Value, what: &str) -> Result<&'v Map<String, Value>, BrokerError> {
    value
        .as_object()
        .ok_or_else(|| BrokerError::invalid_clause(format!("{} must be an object", what)))
}

fn expect_true(key: &str, value: &Value, what: &str) -> Result<(), BrokerError> {
    if value == &Value::Bool(true) {
        Ok(())
    } else {
        Err(BrokerError::invalid_clause(format!(
            "{} value for '{}' must be true",
            what, key
        )))
    }
}
