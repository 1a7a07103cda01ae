//! Normalization: conform extracted text cells to logical types and encode
//! them into load files.
//!
//! Runs single-threaded per run so rows keep their source order within a
//! table. Output is a list of [`LoadJob`]s: delimited parts for file
//! destinations, or JSON-lines row spools for database sinks. Both rotate to a
//! new part once the configured byte threshold is reached.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use regex::Regex;
use tracing::debug;

use crate::error::{LakeportError, NormalizeError};
use crate::schema::{ColumnDef, TableSchema};
use crate::source::RawRow;
use crate::types::{LogicalType, Value, hex_decode};

static DECIMAL_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?$").expect("valid decimal value pattern")
});
static TRAILING_OFFSET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[+-]\d{2}(:?\d{2})?$").expect("valid offset pattern"));

const MAX_REPORTED_VALUE: usize = 64;

// ── Conformance ────────────────────────────────────────────────────────────

fn parse_bool(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "true" | "t" | "1" | "yes" | "y" => Some(true),
        "false" | "f" | "0" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn parse_time(text: &str) -> Option<NaiveTime> {
    let bare = TRAILING_OFFSET.replace(text, "");
    NaiveTime::parse_from_str(&bare, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(&bare, "%H:%M"))
        .ok()
}

fn parse_naive_timestamp(text: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_offset_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    const FORMATS: [&str; 4] = [
        "%Y-%m-%d %H:%M:%S%.f%#z",
        "%Y-%m-%d %H:%M:%S%.f %:z",
        "%Y-%m-%dT%H:%M:%S%.f%#z",
        "%Y-%m-%d %H:%M:%S%.f %z",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(text, fmt).ok())
        .map(|ts| ts.with_timezone(&Utc))
}

/// Conform one text cell to a logical type. `None` means the cell does not
/// fit the type.
pub fn conform_value(raw: Option<&str>, logical: LogicalType) -> Option<Value> {
    let Some(raw) = raw else {
        return Some(Value::Null);
    };
    let text = raw.trim();
    match logical {
        LogicalType::SmallInt => text
            .parse::<i16>()
            .ok()
            .map(|v| Value::Int(i64::from(v))),
        LogicalType::Integer => text
            .parse::<i32>()
            .ok()
            .map(|v| Value::Int(i64::from(v))),
        LogicalType::BigInt => text.parse::<i64>().ok().map(Value::Int),
        LogicalType::Real | LogicalType::Double => text.parse::<f64>().ok().map(Value::Float),
        // DuckDB DECIMAL has no NaN.
        LogicalType::Decimal { .. } if text.eq_ignore_ascii_case("nan") => Some(Value::Null),
        LogicalType::Decimal { .. } => DECIMAL_VALUE
            .is_match(text)
            .then(|| Value::Decimal(text.to_string())),
        LogicalType::Boolean => parse_bool(text).map(Value::Bool),
        LogicalType::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d")
            .ok()
            .or_else(|| parse_naive_timestamp(text).map(|ts| ts.date()))
            .map(Value::Date),
        LogicalType::Time => parse_time(text).map(Value::Time),
        LogicalType::Timestamp => parse_naive_timestamp(text)
            .or_else(|| parse_offset_timestamp(text).map(|ts| ts.naive_utc()))
            .map(Value::Timestamp),
        LogicalType::TimestampTz => parse_offset_timestamp(text)
            .or_else(|| parse_naive_timestamp(text).map(|ts| ts.and_utc()))
            .map(Value::TimestampTz),
        LogicalType::Binary => hex_decode(text).map(Value::Bytes),
        LogicalType::Json => serde_json::from_str(raw).ok().map(Value::Json),
        LogicalType::Uuid => uuid::Uuid::parse_str(text).ok().map(Value::Uuid),
        // Kept verbatim; leading/trailing whitespace is data here.
        LogicalType::Text | LogicalType::Interval | LogicalType::Array => {
            Some(Value::Text(raw.to_string()))
        }
    }
}

fn conform_cell(table: &str, column: &ColumnDef, raw: Option<&str>) -> Result<Value, NormalizeError> {
    conform_value(raw, column.logical).ok_or_else(|| {
        let found: String = raw.unwrap_or_default().chars().take(MAX_REPORTED_VALUE).collect();
        NormalizeError::TypeMappingGap {
            table: table.to_string(),
            column: column.name.clone(),
            native_type: column.native_type.clone(),
            found,
        }
    })
}

/// Conform a whole row to a table schema.
pub fn conform_row(table: &TableSchema, row: &RawRow) -> Result<Vec<Value>, NormalizeError> {
    if row.len() != table.columns.len() {
        return Err(NormalizeError::RowWidth {
            table: table.name.clone(),
            expected: table.columns.len(),
            found: row.len(),
        });
    }
    table
        .columns
        .iter()
        .zip(row)
        .map(|(column, cell)| conform_cell(&table.name, column, cell.as_deref()))
        .collect()
}

// ── Load jobs ──────────────────────────────────────────────────────────────

/// Encoding of a load file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadFormat {
    /// Final delimited output with a header row on every part.
    Delimited,
    /// JSON lines of rendered cells, consumed by database sinks.
    Rows,
}

impl LoadFormat {
    fn extension(&self) -> &'static str {
        match self {
            LoadFormat::Delimited => "csv",
            LoadFormat::Rows => "jsonl",
        }
    }
}

/// One normalized file ready for the load phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadJob {
    pub table: String,
    pub part: usize,
    pub path: PathBuf,
    pub format: LoadFormat,
    pub rows: u64,
    pub bytes: u64,
}

impl LoadJob {
    /// `{table}.csv` for the first part, `{table}.{n}.csv` after rotation.
    pub fn file_name(table: &str, part: usize, format: LoadFormat) -> String {
        match part {
            0 => format!("{table}.{}", format.extension()),
            n => format!("{table}.{n}.{}", format.extension()),
        }
    }
}

/// Byte-counting writer. Flushes are deferred to [`CountingWriter::finish`] so
/// per-record flushes from the CSV encoder stay in memory.
struct CountingWriter {
    inner: BufWriter<File>,
    bytes: u64,
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.bytes += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CountingWriter {
    fn create(path: &Path) -> std::io::Result<Self> {
        Ok(Self {
            inner: BufWriter::new(File::create(path)?),
            bytes: 0,
        })
    }

    fn finish(mut self) -> std::io::Result<u64> {
        self.inner.flush()?;
        self.inner.get_ref().sync_all()?;
        Ok(self.bytes)
    }
}

enum PartWriter {
    Delimited(csv::Writer<CountingWriter>),
    Rows(CountingWriter),
}

struct OpenPart {
    part: usize,
    path: PathBuf,
    rows: u64,
    writer: PartWriter,
}

/// Writes parts for one table, rotating on the byte threshold.
pub struct RotatingEncoder {
    table: TableSchema,
    out_dir: PathBuf,
    format: LoadFormat,
    max_bytes: u64,
    current: Option<OpenPart>,
    next_part: usize,
    finished: Vec<LoadJob>,
}

fn encode_error(table: &str, e: impl std::fmt::Display) -> NormalizeError {
    NormalizeError::Encode {
        table: table.to_string(),
        message: e.to_string(),
    }
}

impl RotatingEncoder {
    pub fn new(table: &TableSchema, out_dir: &Path, format: LoadFormat, max_bytes: u64) -> Result<Self, NormalizeError> {
        if table.name.contains(['/', '\\']) || table.name.starts_with('.') {
            return Err(encode_error(&table.name, "table name is not a valid file name"));
        }
        Ok(Self {
            table: table.clone(),
            out_dir: out_dir.to_path_buf(),
            format,
            max_bytes: max_bytes.max(1),
            current: None,
            next_part: 0,
            finished: Vec::new(),
        })
    }

    fn open_part(&mut self) -> Result<(), NormalizeError> {
        let part = self.next_part;
        self.next_part += 1;
        let path = self
            .out_dir
            .join(LoadJob::file_name(&self.table.name, part, self.format));
        let file = CountingWriter::create(&path).map_err(|e| encode_error(&self.table.name, e))?;
        let writer = match self.format {
            LoadFormat::Delimited => {
                let mut csv = csv::Writer::from_writer(file);
                csv.write_record(self.table.column_names())
                    .and_then(|_| csv.flush().map_err(csv::Error::from))
                    .map_err(|e| encode_error(&self.table.name, e))?;
                PartWriter::Delimited(csv)
            }
            LoadFormat::Rows => PartWriter::Rows(file),
        };
        self.current = Some(OpenPart {
            part,
            path,
            rows: 0,
            writer,
        });
        Ok(())
    }

    fn close_part(&mut self) -> Result<(), NormalizeError> {
        let Some(open) = self.current.take() else {
            return Ok(());
        };
        let bytes = match open.writer {
            PartWriter::Delimited(csv) => csv
                .into_inner()
                .map_err(|e| encode_error(&self.table.name, e.error()))?
                .finish(),
            PartWriter::Rows(file) => file.finish(),
        }
        .map_err(|e| encode_error(&self.table.name, e))?;
        debug!(table = %self.table.name, part = open.part, rows = open.rows, bytes, "Load part closed");
        self.finished.push(LoadJob {
            table: self.table.name.clone(),
            part: open.part,
            path: open.path,
            format: self.format,
            rows: open.rows,
            bytes,
        });
        Ok(())
    }

    /// Append one conformed row.
    pub fn write_row(&mut self, values: &[Value]) -> Result<(), NormalizeError> {
        if self.current.is_none() {
            self.open_part()?;
        }
        let table = self.table.name.clone();
        let Some(open) = self.current.as_mut() else {
            return Err(encode_error(&table, "no open part"));
        };
        let rendered: Vec<Option<String>> = values.iter().map(Value::render).collect();
        let bytes = match &mut open.writer {
            PartWriter::Delimited(csv) => {
                csv.write_record(rendered.iter().map(|c| c.as_deref().unwrap_or("")))
                    .and_then(|_| csv.flush().map_err(csv::Error::from))
                    .map_err(|e| encode_error(&table, e))?;
                csv.get_ref().bytes
            }
            PartWriter::Rows(file) => {
                serde_json::to_writer(&mut *file, &rendered).map_err(|e| encode_error(&table, e))?;
                file.write_all(b"\n").map_err(|e| encode_error(&table, e))?;
                file.bytes
            }
        };
        open.rows += 1;
        if bytes >= self.max_bytes {
            self.close_part()?;
        }
        Ok(())
    }

    /// Close the open part and return all parts. A table without rows still
    /// yields one (header-only) part.
    pub fn finish(mut self) -> Result<Vec<LoadJob>, NormalizeError> {
        if self.current.is_none() && self.finished.is_empty() {
            self.open_part()?;
        }
        self.close_part()?;
        Ok(self.finished)
    }
}

/// Normalize one table's raw extraction spool into load jobs.
pub fn normalize_table(
    table: &TableSchema,
    raw_spool: &Path,
    out_dir: &Path,
    format: LoadFormat,
    max_bytes: u64,
) -> Result<Vec<LoadJob>, LakeportError> {
    let mut encoder = RotatingEncoder::new(table, out_dir, format, max_bytes)?;
    if raw_spool.exists() {
        let reader = BufReader::new(File::open(raw_spool)?);
        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let raw: RawRow = serde_json::from_str(&line)?;
            let values = conform_row(table, &raw)?;
            encoder.write_row(&values)?;
        }
    }
    Ok(encoder.finish()?)
}

/// Read rendered rows back from a [`LoadFormat::Rows`] spool.
pub fn read_row_spool(path: &Path) -> Result<Vec<Vec<Option<String>>>, LakeportError> {
    let reader = BufReader::new(File::open(path)?);
    let mut rows = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if !line.is_empty() {
            rows.push(serde_json::from_str(&line)?);
        }
    }
    Ok(rows)
}
