/*!
Runtime values flowing through a cycle.

[`ColumnValue`] is what the resolver hands out: whatever a context entry,
document node or default literal holds, uncoerced. [`SqlParam`] is what the
binder produces after applying a descriptor's type tag, and is the only form
a [`PreparedStatement`](crate::connection::PreparedStatement) ever sees.
*/

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Uncoerced value resolved for a descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnValue {
    Text(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    /// Structured node or whole document
    Document(JsonValue),
}

impl ColumnValue {
    /// Text spelled `null` is treated as SQL null
    pub fn is_sql_null(&self) -> bool {
        match self {
            ColumnValue::Text(s) => s.eq_ignore_ascii_case("null"),
            ColumnValue::Document(JsonValue::Null) => true,
            _ => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ColumnValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Name of the runtime variant, used in type errors
    pub fn type_name(&self) -> &'static str {
        match self {
            ColumnValue::Text(_) => "text",
            ColumnValue::Integer(_) => "integer",
            ColumnValue::Real(_) => "real",
            ColumnValue::Bool(_) => "bool",
            ColumnValue::Bytes(_) => "bytes",
            ColumnValue::Document(_) => "document",
        }
    }

    /// Convert a JSON node into the closest scalar value. JSON null yields `None`.
    pub fn from_json(node: &JsonValue) -> Option<Self> {
        match node {
            JsonValue::Null => None,
            JsonValue::Bool(b) => Some(ColumnValue::Bool(*b)),
            JsonValue::Number(n) => Some(match n.as_i64() {
                Some(i) => ColumnValue::Integer(i),
                None => ColumnValue::Real(n.as_f64().unwrap_or_default()),
            }),
            JsonValue::String(s) => Some(ColumnValue::Text(s.clone())),
            other => Some(ColumnValue::Document(other.clone())),
        }
    }

    /// Render as text the way a character column would receive it
    pub fn to_text(&self) -> String {
        match self {
            ColumnValue::Text(s) => s.clone(),
            ColumnValue::Integer(i) => i.to_string(),
            ColumnValue::Real(f) => f.to_string(),
            ColumnValue::Bool(b) => b.to_string(),
            ColumnValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            ColumnValue::Document(doc) => doc.to_string(),
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            other => f.write_str(&other.to_text()),
        }
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        ColumnValue::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        ColumnValue::Text(value)
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        ColumnValue::Integer(value)
    }
}

impl From<i32> for ColumnValue {
    fn from(value: i32) -> Self {
        ColumnValue::Integer(value as i64)
    }
}

impl From<f64> for ColumnValue {
    fn from(value: f64) -> Self {
        ColumnValue::Real(value)
    }
}

impl From<bool> for ColumnValue {
    fn from(value: bool) -> Self {
        ColumnValue::Bool(value)
    }
}

impl From<Vec<u8>> for ColumnValue {
    fn from(value: Vec<u8>) -> Self {
        ColumnValue::Bytes(value)
    }
}

impl From<JsonValue> for ColumnValue {
    fn from(value: JsonValue) -> Self {
        ColumnValue::Document(value)
    }
}

/// Coerced parameter ready to be bound to a placeholder slot
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Bool(bool),
    Timestamp(NaiveDateTime),
    /// Character large object
    Clob(String),
    /// Binary large object
    Blob(Vec<u8>),
}

impl SqlParam {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlParam::Null)
    }
}

impl fmt::Display for SqlParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlParam::Null => f.write_str("NULL"),
            SqlParam::Text(s) => write!(f, "'{}'", s),
            SqlParam::Integer(i) => write!(f, "{}", i),
            SqlParam::Real(r) => write!(f, "{}", r),
            SqlParam::Bool(b) => write!(f, "{}", b),
            SqlParam::Timestamp(ts) => write!(f, "TIMESTAMP '{}'", ts.format("%Y-%m-%d %H:%M:%S%.3f")),
            SqlParam::Clob(s) => write!(f, "CLOB({} chars)", s.chars().count()),
            SqlParam::Blob(b) => write!(f, "BLOB({} bytes)", b.len()),
        }
    }
}

impl From<&ColumnValue> for SqlParam {
    /// Opaque pass-through used for descriptors without a type tag
    fn from(value: &ColumnValue) -> Self {
        match value {
            ColumnValue::Text(s) => SqlParam::Text(s.clone()),
            ColumnValue::Integer(i) => SqlParam::Integer(*i),
            ColumnValue::Real(r) => SqlParam::Real(*r),
            ColumnValue::Bool(b) => SqlParam::Bool(*b),
            ColumnValue::Bytes(b) => SqlParam::Blob(b.clone()),
            ColumnValue::Document(doc) => SqlParam::Text(doc.to_string()),
        }
    }
}
