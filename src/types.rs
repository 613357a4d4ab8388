//! Per-type value codecs.
//!
//! A [`TypeCodec`] converts the unescaped text form of a PostgreSQL value
//! to a [`Value`] and back. The [`TypeRegistry`] resolves a column's
//! declared type to its codec by OID or by name.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::{BigDecimal, FromPrimitive};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use uuid::Uuid;

use crate::error::TypeError;
use crate::value::Value;

pub trait TypeCodec: Send + Sync {
    /// Canonical type name, used in errors.
    fn type_name(&self) -> &str;

    fn decode(&self, data: &[u8]) -> Result<Value, TypeError>;

    fn encode(&self, value: &Value) -> Result<Vec<u8>, TypeError>;
}

fn invalid(type_name: &str, reason: impl Into<String>) -> TypeError {
    TypeError::InvalidInput {
        type_name: type_name.to_string(),
        reason: reason.into(),
    }
}

fn mismatch(type_name: &str, value: &Value) -> TypeError {
    TypeError::Mismatch {
        type_name: type_name.to_string(),
        got: value.kind(),
    }
}

fn utf8<'a>(type_name: &str, data: &'a [u8]) -> Result<&'a str, TypeError> {
    std::str::from_utf8(data).map_err(|e| invalid(type_name, e.to_string()))
}

// ---------------------------------------------------------------------------
// Codecs
// ---------------------------------------------------------------------------

pub struct BoolCodec;

impl TypeCodec for BoolCodec {
    fn type_name(&self) -> &str {
        "bool"
    }

    fn decode(&self, data: &[u8]) -> Result<Value, TypeError> {
        match data {
            b"t" | b"true" => Ok(Value::Bool(true)),
            b"f" | b"false" => Ok(Value::Bool(false)),
            other => Err(invalid("bool", format!("'{}'", String::from_utf8_lossy(other)))),
        }
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, TypeError> {
        match value {
            Value::Bool(true) => Ok(b"t".to_vec()),
            Value::Bool(false) => Ok(b"f".to_vec()),
            other => Err(mismatch("bool", other)),
        }
    }
}

/// Signed integer of a fixed width.
pub struct IntCodec {
    name: &'static str,
    min: i64,
    max: i64,
}

impl IntCodec {
    pub fn int2() -> Self {
        Self { name: "int2", min: i16::MIN.into(), max: i16::MAX.into() }
    }

    pub fn int4() -> Self {
        Self { name: "int4", min: i32::MIN.into(), max: i32::MAX.into() }
    }

    pub fn int8() -> Self {
        Self { name: "int8", min: i64::MIN, max: i64::MAX }
    }

    fn check(&self, v: i64) -> Result<i64, TypeError> {
        if v < self.min || v > self.max {
            return Err(TypeError::OutOfRange {
                type_name: self.name.to_string(),
                value: v.to_string(),
            });
        }
        Ok(v)
    }
}

impl TypeCodec for IntCodec {
    fn type_name(&self) -> &str {
        self.name
    }

    fn decode(&self, data: &[u8]) -> Result<Value, TypeError> {
        let s = utf8(self.name, data)?;
        let v: i64 = s.parse().map_err(|_| invalid(self.name, format!("'{s}'")))?;
        Ok(Value::Int(self.check(v)?))
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, TypeError> {
        match value {
            Value::Int(v) => Ok(self.check(*v)?.to_string().into_bytes()),
            other => Err(mismatch(self.name, other)),
        }
    }
}

pub struct FloatCodec {
    name: &'static str,
}

impl FloatCodec {
    pub fn float4() -> Self {
        Self { name: "float4" }
    }

    pub fn float8() -> Self {
        Self { name: "float8" }
    }
}

impl TypeCodec for FloatCodec {
    fn type_name(&self) -> &str {
        self.name
    }

    fn decode(&self, data: &[u8]) -> Result<Value, TypeError> {
        let s = utf8(self.name, data)?;
        let v: f64 = s.parse().map_err(|_| invalid(self.name, format!("'{s}'")))?;
        Ok(Value::Float(v))
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, TypeError> {
        let v = match value {
            Value::Float(v) => *v,
            Value::Int(v) => *v as f64,
            other => return Err(mismatch(self.name, other)),
        };
        let text = if v.is_nan() {
            "NaN".to_string()
        } else if v == f64::INFINITY {
            "Infinity".to_string()
        } else if v == f64::NEG_INFINITY {
            "-Infinity".to_string()
        } else {
            v.to_string()
        };
        Ok(text.into_bytes())
    }
}

/// `numeric`. `NaN` decodes to a float NaN since a decimal cannot hold it.
pub struct NumericCodec;

impl TypeCodec for NumericCodec {
    fn type_name(&self) -> &str {
        "numeric"
    }

    fn decode(&self, data: &[u8]) -> Result<Value, TypeError> {
        let s = utf8("numeric", data)?;
        if s == "NaN" {
            return Ok(Value::Float(f64::NAN));
        }
        BigDecimal::from_str(s)
            .map(Value::Numeric)
            .map_err(|e| invalid("numeric", format!("'{s}': {e}")))
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, TypeError> {
        match value {
            Value::Numeric(d) => Ok(d.to_string().into_bytes()),
            Value::Int(v) => Ok(v.to_string().into_bytes()),
            Value::Float(v) if v.is_nan() => Ok(b"NaN".to_vec()),
            Value::Float(v) => BigDecimal::from_f64(*v)
                .map(|d| d.to_string().into_bytes())
                .ok_or_else(|| invalid("numeric", format!("'{v}'"))),
            Value::Text(s) => BigDecimal::from_str(s)
                .map(|d| d.to_string().into_bytes())
                .map_err(|e| invalid("numeric", format!("'{s}': {e}"))),
            other => Err(mismatch("numeric", other)),
        }
    }
}

/// Character types: `text`, `varchar`, `bpchar`, `name`.
pub struct TextCodec {
    name: &'static str,
}

impl TextCodec {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl TypeCodec for TextCodec {
    fn type_name(&self) -> &str {
        self.name
    }

    fn decode(&self, data: &[u8]) -> Result<Value, TypeError> {
        Ok(Value::Text(utf8(self.name, data)?.to_string()))
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, TypeError> {
        match value {
            Value::Text(s) => Ok(s.clone().into_bytes()),
            other => Err(mismatch(self.name, other)),
        }
    }
}

/// `bytea` in hex output format (`\x0a0b`).
pub struct ByteaCodec;

impl TypeCodec for ByteaCodec {
    fn type_name(&self) -> &str {
        "bytea"
    }

    fn decode(&self, data: &[u8]) -> Result<Value, TypeError> {
        let hex = data
            .strip_prefix(b"\\x")
            .ok_or_else(|| invalid("bytea", "expected hex format"))?;
        if hex.len() % 2 != 0 {
            return Err(invalid("bytea", "odd number of hex digits"));
        }
        let mut out = Vec::with_capacity(hex.len() / 2);
        for pair in hex.chunks(2) {
            let hi = hex_digit(pair[0]).ok_or_else(|| invalid("bytea", "invalid hex digit"))?;
            let lo = hex_digit(pair[1]).ok_or_else(|| invalid("bytea", "invalid hex digit"))?;
            out.push((hi << 4) | lo);
        }
        Ok(Value::Bytes(out))
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, TypeError> {
        const DIGITS: &[u8; 16] = b"0123456789abcdef";
        match value {
            Value::Bytes(bytes) => {
                let mut out = Vec::with_capacity(2 + bytes.len() * 2);
                out.extend_from_slice(b"\\x");
                for b in bytes {
                    out.push(DIGITS[usize::from(b >> 4)]);
                    out.push(DIGITS[usize::from(b & 0x0f)]);
                }
                Ok(out)
            }
            other => Err(mismatch("bytea", other)),
        }
    }
}

fn hex_digit(c: u8) -> Option<u8> {
    (c as char).to_digit(16).map(|d| d as u8)
}

/// `uuid`. Input may be hyphenated, braced, URN or plain hex; output is
/// always the lowercase hyphenated form.
pub struct UuidCodec;

fn parse_uuid(s: &str) -> Result<Uuid, TypeError> {
    Uuid::parse_str(s).map_err(|e| invalid("uuid", format!("'{s}': {e}")))
}

impl TypeCodec for UuidCodec {
    fn type_name(&self) -> &str {
        "uuid"
    }

    fn decode(&self, data: &[u8]) -> Result<Value, TypeError> {
        parse_uuid(utf8("uuid", data)?).map(Value::Uuid)
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, TypeError> {
        let uuid = match value {
            Value::Uuid(u) => *u,
            Value::Text(s) => parse_uuid(s)?,
            other => return Err(mismatch("uuid", other)),
        };
        Ok(uuid.hyphenated().to_string().into_bytes())
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// `date` in ISO output style.
pub struct DateCodec;

impl TypeCodec for DateCodec {
    fn type_name(&self) -> &str {
        "date"
    }

    fn decode(&self, data: &[u8]) -> Result<Value, TypeError> {
        let s = utf8("date", data)?;
        NaiveDate::parse_from_str(s, DATE_FORMAT)
            .map(Value::Date)
            .map_err(|e| invalid("date", format!("'{s}': {e}")))
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, TypeError> {
        match value {
            Value::Date(d) => Ok(d.format(DATE_FORMAT).to_string().into_bytes()),
            Value::Timestamp(ts) => Ok(ts.date().format(DATE_FORMAT).to_string().into_bytes()),
            other => Err(mismatch("date", other)),
        }
    }
}

/// `timestamp without time zone`. A `T` separator is accepted on input.
pub struct TimestampCodec;

impl TypeCodec for TimestampCodec {
    fn type_name(&self) -> &str {
        "timestamp"
    }

    fn decode(&self, data: &[u8]) -> Result<Value, TypeError> {
        let s = utf8("timestamp", data)?;
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
            .map(Value::Timestamp)
            .map_err(|e| invalid("timestamp", format!("'{s}': {e}")))
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, TypeError> {
        match value {
            Value::Timestamp(ts) => Ok(ts.format(TIMESTAMP_FORMAT).to_string().into_bytes()),
            Value::Date(d) => Ok(d
                .and_time(NaiveTime::MIN)
                .format(TIMESTAMP_FORMAT)
                .to_string()
                .into_bytes()),
            other => Err(mismatch("timestamp", other)),
        }
    }
}

/// `timestamp with time zone`. The offset may be `+05`, `+0530` or
/// `+05:30`; output always carries `+HH:MM`.
pub struct TimestampTzCodec;

impl TypeCodec for TimestampTzCodec {
    fn type_name(&self) -> &str {
        "timestamptz"
    }

    fn decode(&self, data: &[u8]) -> Result<Value, TypeError> {
        let s = utf8("timestamptz", data)?;
        DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z")
            .map(Value::TimestampTz)
            .map_err(|e| invalid("timestamptz", format!("'{s}': {e}")))
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, TypeError> {
        match value {
            Value::TimestampTz(ts) => Ok(ts
                .format("%Y-%m-%d %H:%M:%S%.f%:z")
                .to_string()
                .into_bytes()),
            other => Err(mismatch("timestamptz", other)),
        }
    }
}

/// `json` and `jsonb`.
pub struct JsonCodec {
    name: &'static str,
}

impl JsonCodec {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

impl TypeCodec for JsonCodec {
    fn type_name(&self) -> &str {
        self.name
    }

    fn decode(&self, data: &[u8]) -> Result<Value, TypeError> {
        serde_json::from_slice(data)
            .map(Value::Json)
            .map_err(|e| invalid(self.name, e.to_string()))
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, TypeError> {
        match value {
            Value::Json(v) => serde_json::to_vec(v).map_err(|e| invalid(self.name, e.to_string())),
            Value::Text(s) => {
                serde_json::from_str::<serde_json::Value>(s)
                    .map_err(|e| invalid(self.name, e.to_string()))?;
                Ok(s.clone().into_bytes())
            }
            other => Err(mismatch(self.name, other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Codecs addressable by type name and OID.
#[derive(Clone, Default)]
pub struct TypeRegistry {
    by_name: HashMap<String, Arc<dyn TypeCodec>>,
    by_oid: HashMap<u32, Arc<dyn TypeCodec>>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in PostgreSQL types.
    pub fn postgres() -> Self {
        let mut r = Self::new();
        r.register(&["bool", "boolean"], 16, Arc::new(BoolCodec));
        r.register(&["bytea"], 17, Arc::new(ByteaCodec));
        r.register(&["name"], 19, Arc::new(TextCodec::new("name")));
        r.register(&["int8", "bigint"], 20, Arc::new(IntCodec::int8()));
        r.register(&["int2", "smallint"], 21, Arc::new(IntCodec::int2()));
        r.register(&["int4", "integer", "int"], 23, Arc::new(IntCodec::int4()));
        r.register(&["text"], 25, Arc::new(TextCodec::new("text")));
        r.register(&["json"], 114, Arc::new(JsonCodec::new("json")));
        r.register(&["float4", "real"], 700, Arc::new(FloatCodec::float4()));
        r.register(&["float8", "double precision"], 701, Arc::new(FloatCodec::float8()));
        r.register(&["bpchar", "character", "char"], 1042, Arc::new(TextCodec::new("bpchar")));
        r.register(
            &["varchar", "character varying"],
            1043,
            Arc::new(TextCodec::new("varchar")),
        );
        r.register(&["date"], 1082, Arc::new(DateCodec));
        r.register(
            &["timestamp", "timestamp without time zone"],
            1114,
            Arc::new(TimestampCodec),
        );
        r.register(
            &["timestamptz", "timestamp with time zone"],
            1184,
            Arc::new(TimestampTzCodec),
        );
        r.register(&["numeric", "decimal"], 1700, Arc::new(NumericCodec));
        r.register(&["uuid"], 2950, Arc::new(UuidCodec));
        r.register(&["jsonb"], 3802, Arc::new(JsonCodec::new("jsonb")));
        r
    }

    /// Registers `codec` under every name in `names` and, if non-zero,
    /// under `oid`.
    pub fn register(&mut self, names: &[&str], oid: u32, codec: Arc<dyn TypeCodec>) {
        for name in names {
            self.by_name.insert(name.to_string(), Arc::clone(&codec));
        }
        if oid != 0 {
            self.by_oid.insert(oid, codec);
        }
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<dyn TypeCodec>> {
        self.by_name.get(&normalize_type_name(name)).cloned()
    }

    pub fn by_oid(&self, oid: u32) -> Option<Arc<dyn TypeCodec>> {
        self.by_oid.get(&oid).cloned()
    }

    /// Looks a type up by OID when it is known, otherwise by name.
    pub fn resolve(&self, name: &str, oid: u32) -> Option<Arc<dyn TypeCodec>> {
        if oid != 0
            && let Some(codec) = self.by_oid(oid)
        {
            return Some(codec);
        }
        self.by_name(name)
    }
}

/// Drops a type modifier and schema qualification: `pg_catalog.varchar(32)`
/// becomes `varchar`, `timestamp(3) with time zone` becomes
/// `timestamp with time zone`.
fn normalize_type_name(name: &str) -> String {
    let base = match (name.find('('), name.find(')')) {
        (Some(open), Some(close)) if open < close => {
            format!("{}{}", &name[..open], &name[close + 1..])
        }
        _ => name.to_string(),
    };
    let base = base.trim();
    let base = base.rsplit_once('.').map_or(base, |(_, n)| n);
    base.to_ascii_lowercase()
}
