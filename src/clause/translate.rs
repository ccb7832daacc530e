use serde_json::Value;

use super::order_by::OrderByTranslator;
use super::projection::ProjectionTranslator;
use super::types::ClauseSet;
use super::where_clause::WhereTranslator;
use crate::error::BrokerError;
use crate::registry::{FieldKind, ModelDescriptor, RegistrySnapshot};
use crate::store::{AggregateOps, AggregatePlan, StoreQuery};
use crate::types::Verb;

/// Composes the clause translators into one storage-shaped query. Pure and
/// lock-free: everything it needs comes from the registry snapshot.
pub struct Translator<'a> {
    snapshot: &'a RegistrySnapshot,
    max_where_depth: u32,
}

impl<'a> Translator<'a> {
    pub fn new(snapshot: &'a RegistrySnapshot, max_where_depth: u32) -> Self {
        Self {
            snapshot,
            max_where_depth,
        }
    }

    pub fn translate(
        &self,
        model: &ModelDescriptor,
        clauses: &ClauseSet,
        verb: Verb,
    ) -> Result<StoreQuery, BrokerError> {
        if verb == Verb::Count && (clauses.select.is_some() || clauses.include.is_some()) {
            return Err(BrokerError::invalid_clause(
                "select and include are not supported for count",
            ));
        }

        let filter = match &clauses.where_clause {
            Some(where_clause) => {
                WhereTranslator::new(model, self.max_where_depth).translate(where_clause)?
            }
            None => None,
        };
        let sort = match &clauses.order_by {
            Some(order_by) => OrderByTranslator::new(model).translate(order_by)?,
            None => Vec::new(),
        };
        let projection = ProjectionTranslator::new(self.snapshot).translate(
            model,
            clauses.select.as_ref(),
            clauses.include.as_ref(),
        )?;

        Ok(StoreQuery {
            filter,
            sort,
            skip: non_negative(clauses.skip, "skip")?,
            take: non_negative(clauses.take, "take")?,
            projection,
        })
    }

    /// Validates an aggregate request into a store plan. Op/field pairs are
    /// checked against field kinds; having may only reference group keys.
    pub fn translate_aggregate(
        &self,
        model: &ModelDescriptor,
        where_clause: Option<&Value>,
        group_by: &[String],
        aggregate: &Value,
        having: Option<&Value>,
    ) -> Result<AggregatePlan, BrokerError> {
        let filter = match where_clause {
            Some(where_clause) => {
                WhereTranslator::new(model, self.max_where_depth).translate(where_clause)?
            }
            None => None,
        };

        for field in group_by {
            let spec = model
                .field(field)
                .ok_or_else(|| BrokerError::unknown_field(&model.name, field))?;
            if spec.kind == FieldKind::Json {
                return Err(BrokerError::UnsupportedAggregate {
                    op: "groupBy".to_string(),
                    field: field.clone(),
                    kind: spec.kind,
                });
            }
        }

        let ops = self.parse_ops(model, aggregate)?;

        let having = match having {
            Some(having_clause) => {
                if group_by.is_empty() {
                    return Err(BrokerError::invalid_clause("having requires groupBy"));
                }
                let node = WhereTranslator::new(model, self.max_where_depth)
                    .translate(having_clause)?;
                if let Some(node) = &node {
                    let mut stray = None;
                    node.for_each_field(&mut |field| {
                        if stray.is_none() && !group_by.iter().any(|g| g == field) {
                            stray = Some(field.to_string());
                        }
                    });
                    if let Some(field) = stray {
                        return Err(BrokerError::invalid_clause(format!(
                            "having field '{}' must appear in groupBy",
                            field
                        )));
                    }
                }
                node
            }
            None => None,
        };

        Ok(AggregatePlan {
            filter,
            group_by: group_by.to_vec(),
            ops,
            having,
        })
    }

    fn parse_ops(&self, model: &ModelDescriptor, aggregate: &Value) -> Result<AggregateOps, BrokerError> {
        let obj = aggregate
            .as_object()
            .ok_or_else(|| BrokerError::invalid_clause("aggregate must be an object"))?;
        if obj.is_empty() {
            return Err(BrokerError::invalid_clause(
                "aggregate must name at least one operation",
            ));
        }

        let mut ops = AggregateOps::default();
        for (key, value) in obj {
            match key.as_str() {
                "count" => match value {
                    Value::Bool(true) => ops.count_all = true,
                    Value::Array(_) => {
                        // Counting non-null values works for every kind
                        ops.count_fields = self.field_list(model, key, value, |_| true)?;
                    }
                    _ => {
                        return Err(BrokerError::invalid_clause(
                            "count takes true or a list of fields",
                        ))
                    }
                },
                "sum" => {
                    ops.sum = self.field_list(model, key, value, |kind| kind == FieldKind::Number)?;
                }
                "avg" => {
                    ops.avg = self.field_list(model, key, value, |kind| kind == FieldKind::Number)?;
                }
                "min" => {
                    ops.min = self.field_list(model, key, value, supports_min_max)?;
                }
                "max" => {
                    ops.max = self.field_list(model, key, value, supports_min_max)?;
                }
                other => return Err(BrokerError::UnknownOperator(other.to_string())),
            }
        }
        Ok(ops)
    }

    fn field_list(
        &self,
        model: &ModelDescriptor,
        op: &str,
        value: &Value,
        kind_ok: impl Fn(FieldKind) -> bool,
    ) -> Result<Vec<String>, BrokerError> {
        let names: Vec<String> = match value {
            Value::String(name) => vec![name.clone()],
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        BrokerError::invalid_clause(format!("{} takes field names", op))
                    })
                })
                .collect::<Result<_, _>>()?,
            _ => {
                return Err(BrokerError::invalid_clause(format!(
                    "{} takes a field name or a list of them",
                    op
                )))
            }
        };

        for name in &names {
            let spec = model
                .field(name)
                .ok_or_else(|| BrokerError::unknown_field(&model.name, name))?;
            if !kind_ok(spec.kind) {
                return Err(BrokerError::UnsupportedAggregate {
                    op: op.to_string(),
                    field: name.clone(),
                    kind: spec.kind,
                });
            }
        }
        Ok(names)
    }
}

fn supports_min_max(kind: FieldKind) -> bool {
    matches!(
        kind,
        FieldKind::String | FieldKind::Number | FieldKind::Date
    )
}

fn non_negative(value: Option<i64>, what: &str) -> Result<Option<u64>, BrokerError> {
    match value {
        None => Ok(None),
        Some(v) if v < 0 => Err(BrokerError::invalid_range(format!(
            "{} must be >= 0, got {}",
            what, v
        ))),
        Some(v) => Ok(Some(v as u64)),
    }
}
