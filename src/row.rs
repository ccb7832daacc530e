/// Dynamic row representation shared by the broker, the store seam, and clients
use serde_json::{Map, Value};

/// Field every stored row is addressed by
pub const ID_FIELD: &str = "id";

/// A storage row: field name -> JSON value, key order preserved
pub type Row = Map<String, Value>;

/// Extract the row id as a string, if present and non-empty
pub fn row_id(row: &Row) -> Option<&str> {
    match row.get(ID_FIELD) {
        Some(Value::String(id)) if !id.is_empty() => Some(id.as_str()),
        _ => None,
    }
}

/// Coerce a JSON value into a row, rejecting non-objects
pub fn into_row(value: Value) -> Option<Row> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}
