// Reference in-memory engine backing the test suite
use std::cmp::Ordering;
use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Number, Value};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{AggregateOps, AggregatePlan, InsertOutcome, Store, StoreError, StoreQuery};
use crate::clause::{FilterNode, FilterOp, Projection, SortDirection, SortKey};
use crate::row::{row_id, Row, ID_FIELD};

/// Join topology for one relation, declared per parent collection
#[derive(Debug, Clone)]
pub struct RelationLink {
    pub relation: String,
    pub target: String,
    pub many: bool,
    /// Column on the parent row holding the join value
    pub local_key: String,
    /// Column on the target row it must match
    pub foreign_key: String,
}

impl RelationLink {
    /// Parent id referenced by a column on the child collection
    pub fn has_many(
        relation: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        Self {
            relation: relation.into(),
            target: target.into(),
            many: true,
            local_key: ID_FIELD.to_string(),
            foreign_key: foreign_key.into(),
        }
    }

    /// Local column referencing the target collection's id
    pub fn belongs_to(
        relation: impl Into<String>,
        target: impl Into<String>,
        local_key: impl Into<String>,
    ) -> Self {
        Self {
            relation: relation.into(),
            target: target.into(),
            many: false,
            local_key: local_key.into(),
            foreign_key: ID_FIELD.to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct Collection {
    rows: Vec<Row>,
    unique_fields: Vec<String>,
    links: Vec<RelationLink>,
}

/// In-memory `Store`: collections auto-create on first write, ids are
/// uuid v4 strings, declared unique fields back uniqueness violations and
/// declared links back relation projection.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enforce uniqueness of `field` values within `collection`.
    /// The id field is implicitly unique and needs no declaration.
    pub async fn declare_unique(&self, collection: &str, field: &str) {
        let mut collections = self.collections.write().await;
        let col = collections.entry(collection.to_string()).or_default();
        if !col.unique_fields.iter().any(|f| f == field) {
            col.unique_fields.push(field.to_string());
        }
    }

    pub async fn declare_link(&self, collection: &str, link: RelationLink) {
        let mut collections = self.collections.write().await;
        collections
            .entry(collection.to_string())
            .or_default()
            .links
            .push(link);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn query(&self, collection: &str, query: &StoreQuery) -> Result<Vec<Row>, StoreError> {
        let collections = self.collections.read().await;
        let col = match collections.get(collection) {
            Some(col) => col,
            None => return Ok(Vec::new()),
        };

        let mut matched: Vec<&Row> = col
            .rows
            .iter()
            .filter(|row| matches_filter(row, query.filter.as_ref()))
            .collect();
        if !query.sort.is_empty() {
            sort_rows(&mut matched, &query.sort);
        }

        let iter = matched.into_iter().skip(query.skip.unwrap_or(0) as usize);
        let page: Vec<&Row> = match query.take {
            Some(take) => iter.take(take as usize).collect(),
            None => iter.collect(),
        };

        page.into_iter()
            .map(|row| match &query.projection {
                Some(projection) => project_row(&collections, col, row, projection),
                None => Ok(row.clone()),
            })
            .collect()
    }

    async fn count(
        &self,
        collection: &str,
        filter: Option<&FilterNode>,
    ) -> Result<u64, StoreError> {
        let collections = self.collections.read().await;
        let col = match collections.get(collection) {
            Some(col) => col,
            None => return Ok(0),
        };
        Ok(col
            .rows
            .iter()
            .filter(|row| matches_filter(row, filter))
            .count() as u64)
    }

    async fn aggregate(
        &self,
        collection: &str,
        plan: &AggregatePlan,
    ) -> Result<Value, StoreError> {
        let collections = self.collections.read().await;
        let rows: Vec<&Row> = match collections.get(collection) {
            Some(col) => col
                .rows
                .iter()
                .filter(|row| matches_filter(row, plan.filter.as_ref()))
                .collect(),
            None => Vec::new(),
        };

        if plan.group_by.is_empty() {
            return Ok(Value::Object(apply_ops(&rows, &plan.ops)));
        }

        // Groups keep first-seen order
        let mut groups: Vec<(Row, Vec<&Row>)> = Vec::new();
        for row in rows {
            let key: Row = plan
                .group_by
                .iter()
                .map(|field| {
                    (
                        field.clone(),
                        row.get(field).cloned().unwrap_or(Value::Null),
                    )
                })
                .collect();
            match groups.iter_mut().find(|(existing, _)| *existing == key) {
                Some((_, members)) => members.push(row),
                None => groups.push((key, vec![row])),
            }
        }

        let mut out = Vec::new();
        for (key, members) in groups {
            if !matches_filter(&key, plan.having.as_ref()) {
                continue;
            }
            let mut entry = Row::new();
            entry.insert("key".to_string(), Value::Object(key));
            entry.extend(apply_ops(&members, &plan.ops));
            out.push(Value::Object(entry));
        }
        Ok(json!({ "groups": out }))
    }

    async fn insert(
        &self,
        collection: &str,
        rows: Vec<Row>,
        skip_duplicates: bool,
    ) -> Result<Vec<InsertOutcome>, StoreError> {
        let mut collections = self.collections.write().await;
        let col = collections.entry(collection.to_string()).or_default();

        let mut outcomes = Vec::with_capacity(rows.len());
        for (index, mut row) in rows.into_iter().enumerate() {
            if row_id(&row).is_none() {
                row.insert(
                    ID_FIELD.to_string(),
                    Value::from(Uuid::new_v4().to_string()),
                );
            }
            match find_conflict(col, &row) {
                Some((field, value)) => {
                    if skip_duplicates {
                        outcomes.push(InsertOutcome::Duplicate { field, value });
                    } else {
                        return Err(StoreError::UniquenessViolation {
                            index,
                            field,
                            value,
                        });
                    }
                }
                None => {
                    outcomes.push(InsertOutcome::Created(row.clone()));
                    col.rows.push(row);
                }
            }
        }
        Ok(outcomes)
    }

    async fn update(
        &self,
        collection: &str,
        filter: Option<&FilterNode>,
        patch: &Row,
    ) -> Result<Vec<Row>, StoreError> {
        let mut collections = self.collections.write().await;
        let col = match collections.get_mut(collection) {
            Some(col) => col,
            None => return Ok(Vec::new()),
        };

        let matched: Vec<usize> = col
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| matches_filter(row, filter))
            .map(|(i, _)| i)
            .collect();
        if matched.is_empty() {
            return Ok(Vec::new());
        }

        // A patched unique value may not collide with rows outside the match set
        for field in unique_fields(col) {
            let value = match patch.get(field) {
                Some(value) => value,
                None => continue,
            };
            if value.is_null() {
                continue;
            }
            let collides = matched.len() > 1
                || col.rows.iter().enumerate().any(|(i, row)| {
                    !matched.contains(&i)
                        && value_eq(row.get(field).unwrap_or(&Value::Null), value)
                });
            if collides {
                return Err(StoreError::UniquenessViolation {
                    index: 0,
                    field: field.to_string(),
                    value: value.clone(),
                });
            }
        }

        let mut updated = Vec::with_capacity(matched.len());
        for i in matched {
            let row = &mut col.rows[i];
            for (key, value) in patch {
                row.insert(key.clone(), value.clone());
            }
            updated.push(row.clone());
        }
        Ok(updated)
    }

    async fn delete(
        &self,
        collection: &str,
        filter: Option<&FilterNode>,
    ) -> Result<Vec<Row>, StoreError> {
        let mut collections = self.collections.write().await;
        let col = match collections.get_mut(collection) {
            Some(col) => col,
            None => return Ok(Vec::new()),
        };

        let mut removed = Vec::new();
        col.rows.retain(|row| {
            if matches_filter(row, filter) {
                removed.push(row.clone());
                false
            } else {
                true
            }
        });
        Ok(removed)
    }
}

fn unique_fields(col: &Collection) -> impl Iterator<Item = &str> {
    std::iter::once(ID_FIELD).chain(col.unique_fields.iter().map(String::as_str))
}

fn find_conflict(col: &Collection, row: &Row) -> Option<(String, Value)> {
    for field in unique_fields(col) {
        let candidate = match row.get(field) {
            Some(candidate) => candidate,
            None => continue,
        };
        if candidate.is_null() {
            continue;
        }
        let taken = col
            .rows
            .iter()
            .any(|existing| value_eq(existing.get(field).unwrap_or(&Value::Null), candidate));
        if taken {
            return Some((field.to_string(), candidate.clone()));
        }
    }
    None
}

fn matches_filter(row: &Row, filter: Option<&FilterNode>) -> bool {
    filter.map_or(true, |node| eval_filter(row, node))
}

fn eval_filter(row: &Row, node: &FilterNode) -> bool {
    match node {
        FilterNode::And(nodes) => nodes.iter().all(|n| eval_filter(row, n)),
        FilterNode::Or(nodes) => nodes.iter().any(|n| eval_filter(row, n)),
        FilterNode::Not(inner) => !eval_filter(row, inner),
        FilterNode::Field { field, op, value } => {
            let actual = row.get(field).unwrap_or(&Value::Null);
            eval_leaf(actual, *op, value)
        }
    }
}

fn eval_leaf(actual: &Value, op: FilterOp, expected: &Value) -> bool {
    match op {
        FilterOp::Equals => value_eq(actual, expected),
        FilterOp::In => expected
            .as_array()
            .map(|items| items.iter().any(|item| value_eq(actual, item)))
            .unwrap_or(false),
        FilterOp::NotIn => expected
            .as_array()
            .map(|items| !items.iter().any(|item| value_eq(actual, item)))
            .unwrap_or(false),
        FilterOp::Lt => matches_ordering(actual, expected, |ord| ord == Ordering::Less),
        FilterOp::Lte => matches_ordering(actual, expected, |ord| ord != Ordering::Greater),
        FilterOp::Gt => matches_ordering(actual, expected, |ord| ord == Ordering::Greater),
        FilterOp::Gte => matches_ordering(actual, expected, |ord| ord != Ordering::Less),
        FilterOp::Contains => text_match(actual, expected, |s, pat| s.contains(pat)),
        FilterOp::StartsWith => text_match(actual, expected, |s, pat| s.starts_with(pat)),
        FilterOp::EndsWith => text_match(actual, expected, |s, pat| s.ends_with(pat)),
    }
}

fn matches_ordering(actual: &Value, expected: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    compare_values(actual, expected).map(accept).unwrap_or(false)
}

fn text_match(actual: &Value, expected: &Value, accept: impl Fn(&str, &str) -> bool) -> bool {
    match (actual.as_str(), expected.as_str()) {
        (Some(s), Some(pattern)) => accept(s, pattern),
        _ => false,
    }
}

/// Equality with numeric coercion so `1` and `1.0` compare equal
fn value_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Ordering across the kinds the translator lets through. String pairs that
/// both parse as RFC 3339 compare as instants, not as text.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => {
            match (
                chrono::DateTime::parse_from_rfc3339(x),
                chrono::DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(dx), Ok(dy)) => Some(dx.cmp(&dy)),
                _ => Some(x.cmp(y)),
            }
        }
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn sort_rows(rows: &mut [&Row], sort: &[SortKey]) {
    rows.sort_by(|a, b| {
        for key in sort {
            let av = a.get(&key.field).unwrap_or(&Value::Null);
            let bv = b.get(&key.field).unwrap_or(&Value::Null);
            let mut ord = cmp_for_sort(av, bv);
            if key.direction == SortDirection::Desc {
                ord = ord.reverse();
            }
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    });
}

/// Nulls sort before everything ascending
fn cmp_for_sort(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

fn project_row(
    collections: &HashMap<String, Collection>,
    col: &Collection,
    row: &Row,
    projection: &Projection,
) -> Result<Row, StoreError> {
    let mut shaped = match &projection.fields {
        Some(fields) => {
            let mut picked = Row::new();
            for field in fields {
                picked.insert(
                    field.clone(),
                    row.get(field).cloned().unwrap_or(Value::Null),
                );
            }
            picked
        }
        None => row.clone(),
    };

    for relation in &projection.relations {
        let link = col
            .links
            .iter()
            .find(|l| l.relation == relation.relation)
            .ok_or_else(|| {
                StoreError::Internal(format!(
                    "no relation link '{}' declared for this collection",
                    relation.relation
                ))
            })?;

        let local = row.get(&link.local_key).unwrap_or(&Value::Null);
        let mut related = Vec::new();
        if let Some(target) = collections.get(&link.target) {
            if !local.is_null() {
                for target_row in &target.rows {
                    let foreign = target_row.get(&link.foreign_key).unwrap_or(&Value::Null);
                    if value_eq(foreign, local) {
                        related.push(project_row(collections, target, target_row, &relation.nested)?);
                        if !link.many {
                            break;
                        }
                    }
                }
            }
        }

        let value = if link.many {
            Value::Array(related.into_iter().map(Value::Object).collect())
        } else {
            related
                .into_iter()
                .next()
                .map(Value::Object)
                .unwrap_or(Value::Null)
        };
        shaped.insert(relation.relation.clone(), value);
    }
    Ok(shaped)
}

fn apply_ops(rows: &[&Row], ops: &AggregateOps) -> Row {
    let mut out = Row::new();
    if ops.count_all {
        out.insert("count".to_string(), Value::from(rows.len() as u64));
    }
    if !ops.count_fields.is_empty() {
        let mut counts = Row::new();
        for field in &ops.count_fields {
            let n = rows
                .iter()
                .filter(|row| !row.get(field).unwrap_or(&Value::Null).is_null())
                .count();
            counts.insert(field.clone(), Value::from(n as u64));
        }
        out.insert("count".to_string(), Value::Object(counts));
    }
    if !ops.sum.is_empty() {
        out.insert("sum".to_string(), numeric_map(rows, &ops.sum, false));
    }
    if !ops.avg.is_empty() {
        out.insert("avg".to_string(), numeric_map(rows, &ops.avg, true));
    }
    if !ops.min.is_empty() {
        out.insert("min".to_string(), extreme_map(rows, &ops.min, false));
    }
    if !ops.max.is_empty() {
        out.insert("max".to_string(), extreme_map(rows, &ops.max, true));
    }
    out
}

/// Sum (or mean) per field; all-integer columns keep an integer sum.
/// No values at all yields null, matching SQL aggregates over empty sets.
fn numeric_map(rows: &[&Row], fields: &[String], mean: bool) -> Value {
    let mut out = Row::new();
    for field in fields {
        let numbers: Vec<&Number> = rows
            .iter()
            .filter_map(|row| row.get(field))
            .filter_map(Value::as_number)
            .collect();
        let value = if numbers.is_empty() {
            Value::Null
        } else if mean {
            let total: f64 = numbers.iter().filter_map(|n| n.as_f64()).sum();
            float_value(total / numbers.len() as f64)
        } else if let Some(ints) = numbers
            .iter()
            .map(|n| n.as_i64())
            .collect::<Option<Vec<i64>>>()
        {
            Value::from(ints.iter().sum::<i64>())
        } else {
            let total: f64 = numbers.iter().filter_map(|n| n.as_f64()).sum();
            float_value(total)
        };
        out.insert(field.clone(), value);
    }
    Value::Object(out)
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn extreme_map(rows: &[&Row], fields: &[String], want_max: bool) -> Value {
    let mut out = Row::new();
    for field in fields {
        let mut best: Option<&Value> = None;
        for row in rows {
            let value = row.get(field).unwrap_or(&Value::Null);
            if value.is_null() {
                continue;
            }
            best = match best {
                None => Some(value),
                Some(current) => match compare_values(value, current) {
                    Some(Ordering::Greater) if want_max => Some(value),
                    Some(Ordering::Less) if !want_max => Some(value),
                    _ => Some(current),
                },
            };
        }
        out.insert(field.clone(), best.cloned().unwrap_or(Value::Null));
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_numeric_equality_coerces() {
        assert!(value_eq(&json!(1), &json!(1.0)));
        assert!(!value_eq(&json!(1), &json!("1")));
    }

    #[test]
    fn test_date_strings_compare_as_instants() {
        // Same instant, different offsets: text comparison would get this wrong
        let a = json!("2024-06-01T12:00:00+02:00");
        let b = json!("2024-06-01T10:00:00Z");
        assert_eq!(compare_values(&a, &b), Some(Ordering::Equal));

        let earlier = json!("2024-06-01T09:59:00Z");
        assert_eq!(compare_values(&earlier, &b), Some(Ordering::Less));
    }

    #[test]
    fn test_eval_leaf_missing_field_is_null() {
        let row = Row::new();
        let node = FilterNode::field("status", FilterOp::Equals, Value::Null);
        assert!(eval_filter(&row, &node));

        let node = FilterNode::field("status", FilterOp::Equals, json!("OPEN"));
        assert!(!eval_filter(&row, &node));
    }
}
