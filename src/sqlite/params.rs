use rusqlite::types::{Value, ValueRef};

use crate::types::SqlValue;

/// Bind engine values to `SQLite` storage classes.
///
/// `SQLite` has no boolean, date or JSON storage; those are stored as integers and text in the
/// formats the built-in type handlers parse back.
pub(crate) fn to_sqlite_value(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Int(i) => Value::Integer(i),
        SqlValue::Float(f) => Value::Real(f),
        SqlValue::Text(s) => Value::Text(s),
        SqlValue::Bool(b) => Value::Integer(i64::from(b)),
        SqlValue::Blob(bytes) => Value::Blob(bytes),
        SqlValue::Timestamp(dt) => Value::Text(dt.format("%F %T%.f").to_string()),
        SqlValue::Date(d) => Value::Text(d.format("%F").to_string()),
        SqlValue::Time(t) => Value::Text(t.format("%T%.f").to_string()),
        SqlValue::Json(json) => Value::Text(json.to_string()),
    }
}

pub(crate) fn from_value_ref(value: ValueRef<'_>) -> SqlValue {
    match value {
        ValueRef::Null => SqlValue::Null,
        ValueRef::Integer(i) => SqlValue::Int(i),
        ValueRef::Real(f) => SqlValue::Float(f),
        ValueRef::Text(bytes) => SqlValue::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
    }
}
