//! Column values.
//!
//! A [`RawValue`] is what travels through the COPY codec and the coprocess
//! wire: unescaped bytes plus a NULL flag. A [`Value`] is the decoded scalar
//! a type codec produces for transformers that prefer native types.

use std::fmt;

use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};
use uuid::Uuid;

/// Unescaped column bytes and a NULL flag. A NULL value never carries data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RawValue {
    pub data: Vec<u8>,
    pub is_null: bool,
}

impl RawValue {
    /// A non-NULL value holding `data`.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            is_null: false,
        }
    }

    /// The SQL NULL.
    pub fn null() -> Self {
        Self {
            data: Vec::new(),
            is_null: true,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// The data as UTF-8, or `None` for NULL or non-UTF-8 data.
    pub fn as_str(&self) -> Option<&str> {
        if self.is_null {
            return None;
        }
        std::str::from_utf8(&self.data).ok()
    }
}

impl From<&str> for RawValue {
    fn from(s: &str) -> Self {
        RawValue::new(s.as_bytes())
    }
}

impl From<String> for RawValue {
    fn from(s: String) -> Self {
        RawValue::new(s.into_bytes())
    }
}

impl From<Vec<u8>> for RawValue {
    fn from(data: Vec<u8>) -> Self {
        RawValue::new(data)
    }
}

impl From<&[u8]> for RawValue {
    fn from(data: &[u8]) -> Self {
        RawValue::new(data)
    }
}

/// A decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Arbitrary precision decimal. Its scale is kept, so `1.50` stays
    /// `1.50` on encode.
    Numeric(BigDecimal),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<FixedOffset>),
    Json(serde_json::Value),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Numeric(_) => "numeric",
            Value::Text(_) => "text",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::Date(_) => "date",
            Value::Timestamp(_) => "timestamp",
            Value::TimestampTz(_) => "timestamptz",
            Value::Json(_) => "json",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Numeric(d) => write!(f, "{d}"),
            Value::Text(s) => write!(f, "{s}"),
            Value::Uuid(u) => write!(f, "{u}"),
            Value::Date(d) => write!(f, "{d}"),
            Value::Timestamp(ts) => write!(f, "{ts}"),
            Value::TimestampTz(ts) => write!(f, "{ts}"),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::Json(v) => write!(f, "{v}"),
        }
    }
}
