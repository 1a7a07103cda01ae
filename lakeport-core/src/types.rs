//! Logical column types and cell values.
//!
//! Every source-native type is mapped onto [`LogicalType`] before anything is
//! written. Values travel between the extract, normalize and load phases as
//! [`Value`]s conformed to their column's logical type.

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Unified column type vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LogicalType {
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    /// Unparameterized when precision/scale are absent.
    Decimal {
        precision: Option<u32>,
        scale: Option<u32>,
    },
    Boolean,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Interval,
    Text,
    Binary,
    Json,
    Array,
    Uuid,
}

impl LogicalType {
    pub fn decimal() -> Self {
        LogicalType::Decimal {
            precision: None,
            scale: None,
        }
    }

    /// Column type in the warehouse (PostgreSQL) dialect.
    pub fn postgres_type(&self) -> String {
        match self {
            LogicalType::SmallInt => "smallint".into(),
            LogicalType::Integer => "integer".into(),
            LogicalType::BigInt => "bigint".into(),
            LogicalType::Real => "real".into(),
            LogicalType::Double => "double precision".into(),
            LogicalType::Decimal {
                precision: Some(p),
                scale,
            } if (1..=1000).contains(p) => format!("numeric({p},{})", scale.unwrap_or(0)),
            LogicalType::Decimal { .. } => "numeric".into(),
            LogicalType::Boolean => "boolean".into(),
            LogicalType::Date => "date".into(),
            LogicalType::Time => "time".into(),
            LogicalType::Timestamp => "timestamp".into(),
            LogicalType::TimestampTz => "timestamptz".into(),
            LogicalType::Interval => "interval".into(),
            LogicalType::Text | LogicalType::Array => "text".into(),
            LogicalType::Binary => "bytea".into(),
            LogicalType::Json => "jsonb".into(),
            LogicalType::Uuid => "uuid".into(),
        }
    }

    /// Column type in the embedded columnar (DuckDB) dialect.
    pub fn duckdb_type(&self) -> String {
        match self {
            LogicalType::SmallInt => "SMALLINT".into(),
            LogicalType::Integer => "INTEGER".into(),
            LogicalType::BigInt => "BIGINT".into(),
            LogicalType::Real => "REAL".into(),
            LogicalType::Double => "DOUBLE".into(),
            LogicalType::Decimal {
                precision: Some(p),
                scale,
            } if (1..=38).contains(p) => format!("DECIMAL({p},{})", scale.unwrap_or(0)),
            // Wider or unparameterized decimals do not fit DuckDB's fixed-point type.
            LogicalType::Decimal { .. } => "DOUBLE".into(),
            LogicalType::Boolean => "BOOLEAN".into(),
            LogicalType::Date => "DATE".into(),
            LogicalType::Time => "TIME".into(),
            LogicalType::Timestamp => "TIMESTAMP".into(),
            LogicalType::TimestampTz => "TIMESTAMPTZ".into(),
            LogicalType::Interval => "INTERVAL".into(),
            LogicalType::Text | LogicalType::Array | LogicalType::Json => "VARCHAR".into(),
            LogicalType::Binary => "BLOB".into(),
            LogicalType::Uuid => "UUID".into(),
        }
    }
}

impl fmt::Display for LogicalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogicalType::SmallInt => write!(f, "smallint"),
            LogicalType::Integer => write!(f, "integer"),
            LogicalType::BigInt => write!(f, "bigint"),
            LogicalType::Real => write!(f, "real"),
            LogicalType::Double => write!(f, "double"),
            LogicalType::Decimal {
                precision: Some(p),
                scale: Some(s),
            } => write!(f, "decimal({p},{s})"),
            LogicalType::Decimal { .. } => write!(f, "decimal"),
            LogicalType::Boolean => write!(f, "boolean"),
            LogicalType::Date => write!(f, "date"),
            LogicalType::Time => write!(f, "time"),
            LogicalType::Timestamp => write!(f, "timestamp"),
            LogicalType::TimestampTz => write!(f, "timestamptz"),
            LogicalType::Interval => write!(f, "interval"),
            LogicalType::Text => write!(f, "text"),
            LogicalType::Binary => write!(f, "binary"),
            LogicalType::Json => write!(f, "json"),
            LogicalType::Array => write!(f, "array"),
            LogicalType::Uuid => write!(f, "uuid"),
        }
    }
}

/// One cell after normalization.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    /// Canonical decimal text, kept as text to avoid precision loss.
    Decimal(String),
    Text(String),
    Bytes(Vec<u8>),
    Date(NaiveDate),
    Time(NaiveTime),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Json(serde_json::Value),
    Uuid(uuid::Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Canonical text rendering used by every sink. `None` for SQL NULL.
    ///
    /// Binary values render as lower-case hex.
    pub fn render(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Bool(b) => Some(b.to_string()),
            Value::Int(i) => Some(i.to_string()),
            Value::Float(v) => Some(v.to_string()),
            Value::Decimal(d) => Some(d.clone()),
            Value::Text(s) => Some(s.clone()),
            Value::Bytes(b) => Some(hex_encode(b)),
            Value::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
            Value::Time(t) => Some(t.format("%H:%M:%S%.f").to_string()),
            Value::Timestamp(ts) => Some(ts.format("%Y-%m-%d %H:%M:%S%.f").to_string()),
            Value::TimestampTz(ts) => Some(ts.format("%Y-%m-%d %H:%M:%S%.f+00:00").to_string()),
            Value::Json(j) => Some(j.to_string()),
            Value::Uuid(u) => Some(u.to_string()),
        }
    }
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

pub(crate) fn hex_decode(text: &str) -> Option<Vec<u8>> {
    let text = text
        .strip_prefix("\\x")
        .or_else(|| text.strip_prefix("0x"))
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if text.len() % 2 != 0 {
        return None;
    }
    (0..text.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(text.get(i..i + 2)?, 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decimal_dialect_spelling() {
        let money = LogicalType::Decimal {
            precision: Some(10),
            scale: Some(2),
        };
        assert_eq!(money.postgres_type(), "numeric(10,2)");
        assert_eq!(money.duckdb_type(), "DECIMAL(10,2)");
        assert_eq!(LogicalType::decimal().postgres_type(), "numeric");
        assert_eq!(LogicalType::decimal().duckdb_type(), "DOUBLE");

        let wide = LogicalType::Decimal {
            precision: Some(60),
            scale: Some(4),
        };
        assert_eq!(wide.duckdb_type(), "DOUBLE");
    }

    #[test]
    fn test_render_values() {
        assert_eq!(Value::Null.render(), None);
        assert_eq!(Value::Bool(true).render().as_deref(), Some("true"));
        assert_eq!(Value::Bytes(vec![0xde, 0xad]).render().as_deref(), Some("dead"));
        let ts = NaiveDate::from_ymd_opt(2025, 1, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        assert_eq!(
            Value::Timestamp(ts).render().as_deref(),
            Some("2025-01-01 12:00:00")
        );
    }

    #[test]
    fn test_hex_roundtrip_prefixes() {
        assert_eq!(hex_decode("\\xdead"), Some(vec![0xde, 0xad]));
        assert_eq!(hex_decode("0xDEAD"), Some(vec![0xde, 0xad]));
        assert_eq!(hex_decode("abc"), None);
        assert_eq!(hex_encode(&[1, 255]), "01ff");
    }
}
