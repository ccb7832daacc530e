use serde_json::{Map, Value};

use super::types::{FilterNode, FilterOp};
use crate::error::BrokerError;
use crate::registry::{FieldSpec, ModelDescriptor};

/// Translates a JSON `where` object into a validated `FilterNode` tree.
/// Every key is checked against the model descriptor before anything
/// reaches the store.
pub struct WhereTranslator<'a> {
    model: &'a ModelDescriptor,
    max_depth: u32,
}

impl<'a> WhereTranslator<'a> {
    pub fn new(model: &'a ModelDescriptor, max_depth: u32) -> Self {
        Self { model, max_depth }
    }

    /// `None` means match-all: absent, null, and `{}` are all accepted
    pub fn translate(&self, where_data: &Value) -> Result<Option<FilterNode>, BrokerError> {
        match where_data {
            Value::Null => Ok(None),
            Value::Object(obj) if obj.is_empty() => Ok(None),
            Value::Object(obj) => {
                let nodes = self.parse_object(obj, 0)?;
                Ok(Some(Self::combine_and(nodes)))
            }
            _ => Err(BrokerError::invalid_clause("where must be an object")),
        }
    }

    /// Conditions listed in one object all apply (implicit AND)
    fn parse_object(&self, obj: &Map<String, Value>, depth: u32) -> Result<Vec<FilterNode>, BrokerError> {
        if depth > self.max_depth {
            return Err(BrokerError::invalid_clause(format!(
                "where clause exceeds maximum nesting depth of {}",
                self.max_depth
            )));
        }

        let mut nodes = Vec::with_capacity(obj.len());
        for (key, value) in obj {
            match key.as_str() {
                "AND" | "OR" | "NOT" => nodes.push(self.parse_logical(key, value, depth)?),
                _ => {
                    let field = self.resolve_field(key)?;
                    nodes.push(self.parse_field_condition(field, value, depth)?);
                }
            }
        }
        Ok(nodes)
    }

    fn parse_logical(&self, op: &str, value: &Value, depth: u32) -> Result<FilterNode, BrokerError> {
        let children = self.parse_group(op, value, depth + 1)?;
        Ok(match op {
            "AND" => Self::combine_and(children),
            "OR" => FilterNode::Or(children),
            // NOT object: the condition must not hold; NOT list: none may hold
            _ => {
                let inner = if value.is_array() {
                    FilterNode::Or(children)
                } else {
                    Self::combine_and(children)
                };
                FilterNode::Not(Box::new(inner))
            }
        })
    }

    /// Combinators accept a single condition object or an array of them
    fn parse_group(&self, op: &str, value: &Value, depth: u32) -> Result<Vec<FilterNode>, BrokerError> {
        match value {
            Value::Object(obj) => self.parse_object(obj, depth),
            Value::Array(items) => {
                let mut children = Vec::with_capacity(items.len());
                for item in items {
                    let obj = item.as_object().ok_or_else(|| {
                        BrokerError::invalid_clause(format!("{} entries must be objects", op))
                    })?;
                    children.push(Self::combine_and(self.parse_object(obj, depth)?));
                }
                Ok(children)
            }
            _ => Err(BrokerError::invalid_clause(format!(
                "{} requires an object or an array of objects",
                op
            ))),
        }
    }

    fn parse_field_condition(
        &self,
        field: &FieldSpec,
        value: &Value,
        depth: u32,
    ) -> Result<FilterNode, BrokerError> {
        if let Value::Object(obj) = value {
            if obj.is_empty() {
                return Err(BrokerError::invalid_clause(format!(
                    "empty condition object for field '{}'",
                    field.name
                )));
            }
            let mut nodes = Vec::with_capacity(obj.len());
            for (op_key, op_value) in obj {
                nodes.push(self.parse_operator(field, op_key, op_value, depth)?);
            }
            Ok(Self::combine_and(nodes))
        } else {
            // Implicit equality: { field: value }
            self.leaf(field, FilterOp::Equals, value)
        }
    }

    fn parse_operator(
        &self,
        field: &FieldSpec,
        op_key: &str,
        value: &Value,
        depth: u32,
    ) -> Result<FilterNode, BrokerError> {
        if op_key == "not" {
            if depth + 1 > self.max_depth {
                return Err(BrokerError::invalid_clause(format!(
                    "where clause exceeds maximum nesting depth of {}",
                    self.max_depth
                )));
            }
            // not takes a scalar (negated equality) or a nested condition object
            let inner = self.parse_field_condition(field, value, depth + 1)?;
            return Ok(FilterNode::Not(Box::new(inner)));
        }

        let op = Self::map_operator(op_key)?;
        self.leaf(field, op, value)
    }

    fn map_operator(op_key: &str) -> Result<FilterOp, BrokerError> {
        Ok(match op_key {
            "equals" => FilterOp::Equals,
            "in" => FilterOp::In,
            "notIn" => FilterOp::NotIn,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "contains" => FilterOp::Contains,
            "startsWith" => FilterOp::StartsWith,
            "endsWith" => FilterOp::EndsWith,
            other => return Err(BrokerError::UnknownOperator(other.to_string())),
        })
    }

    fn leaf(&self, field: &FieldSpec, op: FilterOp, value: &Value) -> Result<FilterNode, BrokerError> {
        self.validate_leaf(field, op, value)?;
        Ok(FilterNode::field(&field.name, op, value.clone()))
    }

    fn validate_leaf(&self, field: &FieldSpec, op: FilterOp, value: &Value) -> Result<(), BrokerError> {
        if op.is_comparison() && !field.kind.is_ordered() {
            return Err(BrokerError::invalid_value(
                &field.name,
                format!("an ordered field kind for '{}'", op.as_str()),
            ));
        }
        if op.is_text_match() && !field.kind.is_textual() {
            return Err(BrokerError::invalid_value(
                &field.name,
                format!("a string field for '{}'", op.as_str()),
            ));
        }

        match op {
            // Null checks only make sense for equality
            FilterOp::Equals if value.is_null() => Ok(()),
            FilterOp::In | FilterOp::NotIn => {
                let items = value.as_array().ok_or_else(|| {
                    BrokerError::invalid_value(
                        &field.name,
                        format!("an array for '{}'", op.as_str()),
                    )
                })?;
                for item in items {
                    if item.is_null() || !field.kind.accepts(item) {
                        return Err(BrokerError::invalid_value(
                            &field.name,
                            format!("an array of {}", field.kind.expected()),
                        ));
                    }
                }
                Ok(())
            }
            FilterOp::Contains | FilterOp::StartsWith | FilterOp::EndsWith => {
                if value.is_string() {
                    Ok(())
                } else {
                    Err(BrokerError::invalid_value(&field.name, "a string pattern"))
                }
            }
            _ => {
                if value.is_null() {
                    Err(BrokerError::invalid_value(
                        &field.name,
                        format!("a non-null value for '{}'", op.as_str()),
                    ))
                } else if field.kind.accepts(value) {
                    Ok(())
                } else {
                    Err(BrokerError::invalid_value(&field.name, field.kind.expected()))
                }
            }
        }
    }

    fn resolve_field(&self, name: &str) -> Result<&FieldSpec, BrokerError> {
        self.model
            .field(name)
            .ok_or_else(|| BrokerError::unknown_field(&self.model.name, name))
    }

    /// Singleton lists collapse so simple filters stay simple trees
    fn combine_and(mut nodes: Vec<FilterNode>) -> FilterNode {
        if nodes.len() == 1 {
            nodes.remove(0)
        } else {
            FilterNode::And(nodes)
        }
    }
}
