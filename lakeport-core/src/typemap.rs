//! Native type name to logical type mapping.
//!
//! Lookup is three-tier: names whose meaning depends on the reporting SQL
//! engine are resolved first, then the exotic-type override table, then the
//! broad engine table. Anything unknown falls back to [`LogicalType::Text`].
//! Names are case-normalized and stripped of parameter lists before lookup, so
//! `VARCHAR(255)` and `varchar` resolve identically.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::connection::SqlDialect;
use crate::types::LogicalType;

static DECIMAL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:DECIMAL|NUMERIC|DEC|NUMBER)\s*(?:\(\s*(\d+)\s*(?:,\s*(\d+)\s*)?\))?")
        .expect("valid decimal pattern")
});

static PARAMETERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)").expect("valid parameter pattern"));

/// Broad table shared by the supported engines.
static BROAD: LazyLock<HashMap<&'static str, LogicalType>> = LazyLock::new(|| {
    use LogicalType::*;
    HashMap::from([
        // integers
        ("tinyint", SmallInt),
        ("smallint", SmallInt),
        ("int2", SmallInt),
        ("short", SmallInt),
        ("byte", SmallInt),
        ("smallserial", SmallInt),
        ("int", Integer),
        ("integer", Integer),
        ("int4", Integer),
        ("mediumint", Integer),
        ("serial", Integer),
        ("bigint", BigInt),
        ("int8", BigInt),
        ("long", BigInt),
        ("bigserial", BigInt),
        // floating point
        ("real", Real),
        ("float4", Real),
        ("float", Double),
        ("double", Double),
        ("double precision", Double),
        ("float8", Double),
        // fixed point
        ("decimal", LogicalType::decimal()),
        ("numeric", LogicalType::decimal()),
        ("dec", LogicalType::decimal()),
        ("number", LogicalType::decimal()),
        // boolean
        ("boolean", Boolean),
        ("bool", Boolean),
        ("bit", Boolean),
        // temporal
        ("date", Date),
        ("time", Time),
        ("time without time zone", Time),
        ("timestamp", Timestamp),
        ("timestamp without time zone", Timestamp),
        ("timestamp_ntz", Timestamp),
        ("datetime", Timestamp),
        ("datetime2", Timestamp),
        ("smalldatetime", Timestamp),
        ("timestamptz", TimestampTz),
        ("timestamp with time zone", TimestampTz),
        ("timestamp_ltz", TimestampTz),
        ("datetimeoffset", TimestampTz),
        ("interval", Interval),
        // character
        ("char", Text),
        ("character", Text),
        ("varchar", Text),
        ("character varying", Text),
        ("nchar", Text),
        ("nvarchar", Text),
        ("bpchar", Text),
        ("text", Text),
        ("ntext", Text),
        ("string", Text),
        ("name", Text),
        ("clob", Text),
        // binary
        ("binary", Binary),
        ("varbinary", Binary),
        ("bytea", Binary),
        ("blob", Binary),
        ("image", Binary),
    ])
});

/// Engine-specific types the broad table does not know, or maps differently.
static OVERRIDES: LazyLock<HashMap<&'static str, LogicalType>> = LazyLock::new(|| {
    use LogicalType::*;
    HashMap::from([
        // sized text and blob variants
        ("tinytext", Text),
        ("mediumtext", Text),
        ("longtext", Text),
        ("tinyblob", Binary),
        ("mediumblob", Binary),
        ("longblob", Binary),
        ("citext", Text),
        ("xml", Text),
        ("enum", Text),
        ("set", Text),
        ("year", SmallInt),
        // network
        ("inet", Text),
        ("cidr", Text),
        ("macaddr", Text),
        ("macaddr8", Text),
        // geometric and spatial
        ("point", Text),
        ("line", Text),
        ("lseg", Text),
        ("box", Text),
        ("path", Text),
        ("polygon", Text),
        ("circle", Text),
        ("geometry", Text),
        ("geography", Text),
        ("hierarchyid", Text),
        // identifiers and documents
        ("uuid", Uuid),
        ("uniqueidentifier", Uuid),
        ("json", Json),
        ("jsonb", Json),
        ("variant", Json),
        ("map", Json),
        ("struct", Json),
        ("array", Array),
        // money
        ("money", LogicalType::decimal()),
        ("smallmoney", LogicalType::decimal()),
        // opaque
        ("rowversion", Binary),
        ("sql_variant", Text),
        ("tsvector", Text),
        ("tsquery", Text),
        ("bit varying", Text),
        ("varbit", Text),
        ("timetz", Time),
        ("time with time zone", Time),
    ])
});

/// Strip parameter lists, modifiers and surrounding whitespace; lower-case.
pub fn normalize_type_name(native: &str) -> String {
    let lowered = native.trim().to_lowercase();
    let stripped = PARAMETERS.replace_all(&lowered, "");
    let mut name = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    for modifier in [" unsigned", " zerofill", " identity"] {
        if let Some(base) = name.strip_suffix(modifier) {
            name = base.to_string();
        }
    }
    // ARRAY<INT>, MAP<STRING,INT>, STRUCT<...>
    if let Some(idx) = name.find('<') {
        name.truncate(idx);
    }
    if name.ends_with("[]") {
        return "array".to_string();
    }
    name
}

/// Names an engine reports with a meaning other than the broad one.
fn dialect_override(dialect: SqlDialect, name: &str) -> Option<LogicalType> {
    match (dialect, name) {
        // SQL Server lists rowversion columns under the legacy `timestamp` alias.
        (SqlDialect::Mssql, "timestamp") => Some(LogicalType::Binary),
        _ => None,
    }
}

/// Map a native type name onto its logical type, ignoring parameters.
pub fn map_type(native: &str) -> LogicalType {
    map_dialect_type(None, native)
}

/// Map a native type name as reported by `dialect`; `None` for engines
/// without dialect-specific names, such as the lakehouse catalog.
pub fn map_dialect_type(dialect: Option<SqlDialect>, native: &str) -> LogicalType {
    let name = normalize_type_name(native);
    if let Some(mapped) = dialect.and_then(|d| dialect_override(d, &name)) {
        return mapped;
    }
    if let Some(mapped) = OVERRIDES.get(name.as_str()) {
        return *mapped;
    }
    // PostgreSQL reports array columns by element type with a leading underscore.
    if name.len() > 1 && name.starts_with('_') {
        return LogicalType::Array;
    }
    BROAD.get(name.as_str()).copied().unwrap_or(LogicalType::Text)
}

/// Parse precision and scale out of a `DECIMAL(p,s)` spelling.
///
/// `DECIMAL` alone yields `(None, None)`; `DECIMAL(p)` yields scale 0.
pub fn parse_decimal(type_text: &str) -> (Option<u32>, Option<u32>) {
    let Some(caps) = DECIMAL_PATTERN.captures(type_text) else {
        return (None, None);
    };
    let precision = caps.get(1).and_then(|m| m.as_str().parse().ok());
    let scale = match (precision, caps.get(2)) {
        (Some(_), Some(m)) => m.as_str().parse().ok(),
        (Some(_), None) => Some(0),
        (None, _) => None,
    };
    (precision, scale)
}

/// Resolve a discovered column's logical type.
///
/// `type_text` is the full parameterized spelling when the source reports one.
/// Explicit precision/scale from a catalog query win over parsed text.
pub fn resolve_type(
    dialect: Option<SqlDialect>,
    native: &str,
    type_text: Option<&str>,
    precision: Option<u32>,
    scale: Option<u32>,
) -> LogicalType {
    let unsigned = [Some(native), type_text]
        .into_iter()
        .flatten()
        .any(|t| t.to_lowercase().contains("unsigned"));
    match map_dialect_type(dialect, native) {
        // Unsigned integers need the next wider signed type.
        LogicalType::SmallInt if unsigned => LogicalType::Integer,
        LogicalType::Integer if unsigned => LogicalType::BigInt,
        LogicalType::BigInt if unsigned => LogicalType::Decimal {
            precision: Some(20),
            scale: Some(0),
        },
        LogicalType::Decimal { .. } if precision.is_some() => LogicalType::Decimal {
            precision,
            scale: scale.or(Some(0)),
        },
        LogicalType::Decimal { .. } => {
            let (precision, scale) = parse_decimal(type_text.unwrap_or(native));
            LogicalType::Decimal { precision, scale }
        }
        other => other,
    }
}

/// Every native name the override tier covers.
pub fn override_names() -> impl Iterator<Item = (&'static str, LogicalType)> {
    OVERRIDES.iter().map(|(k, v)| (*k, *v))
}
