//! Source readers: schema discovery and row extraction.
//!
//! Every source kind implements [`SourceReader`]. Rows cross the trait boundary
//! as [`RawRow`]s of optional text cells; conforming them to logical types is
//! the normalizer's job, so readers stay free of type coercion beyond casting
//! each column to text in the extraction query.

pub mod lakehouse;
pub mod sql;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::PipelineConfig;
use crate::connection::ResolvedSource;
use crate::error::SourceError;
use crate::schema::{DiscoveredTable, TableSchema};

/// One extracted row, one optional text cell per projected column.
pub type RawRow = Vec<Option<String>>;

/// Catalog-level description of a schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaInfo {
    pub catalog: String,
    pub name: String,
    pub comment: String,
}

/// Trait for readers over one resolved source.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Canonical source kind.
    fn kind(&self) -> &'static str;

    /// Cheap round trip proving the connection works.
    async fn ping(&self) -> Result<(), SourceError>;

    /// Columns, native types, nullability and primary keys of one table.
    /// Returns a table with no columns when the table does not exist.
    async fn discover_table(&self, schema: &str, table: &str) -> Result<DiscoveredTable, SourceError>;

    /// Catalog name and description of a schema. Sources without schema
    /// comments report only the names.
    async fn describe_schema(&self, schema: &str) -> Result<SchemaInfo, SourceError> {
        Ok(SchemaInfo {
            catalog: String::new(),
            name: schema.to_string(),
            comment: String::new(),
        })
    }

    /// Every table of a schema with its columns.
    async fn list_tables(&self, schema: &str) -> Result<Vec<DiscoveredTable>, SourceError>;

    /// Stream the projected columns of a table in chunks of at most
    /// `chunk_size` rows. Returns the number of rows read.
    async fn read_table(
        &self,
        table: &TableSchema,
        chunk_size: usize,
        tx: mpsc::Sender<Vec<RawRow>>,
    ) -> Result<u64, SourceError>;

    /// Release connections. Safe to call more than once.
    async fn close(&self);
}

/// Open a reader for a resolved source.
pub async fn open(
    resolved: ResolvedSource,
    client: reqwest::Client,
    config: &PipelineConfig,
) -> Result<Box<dyn SourceReader>, SourceError> {
    match resolved {
        ResolvedSource::Lakehouse(connection) => Ok(Box::new(lakehouse::LakehouseReader::new(
            client,
            connection,
            std::time::Duration::from_millis(config.statement_poll_millis),
        ))),
        ResolvedSource::Sql(spec) => Ok(Box::new(sql::SqlReader::connect(spec).await?)),
    }
}

/// Splits arbitrarily sized batches into chunks of at most `chunk_size` rows
/// before sending them downstream.
pub(crate) struct Chunker {
    chunk_size: usize,
    buffer: Vec<RawRow>,
    tx: mpsc::Sender<Vec<RawRow>>,
    total: u64,
}

impl Chunker {
    pub(crate) fn new(chunk_size: usize, tx: mpsc::Sender<Vec<RawRow>>) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            buffer: Vec::with_capacity(chunk_size.min(10_000)),
            tx,
            total: 0,
        }
    }

    pub(crate) async fn push(&mut self, row: RawRow) -> Result<(), SourceError> {
        self.buffer.push(row);
        self.total += 1;
        if self.buffer.len() >= self.chunk_size {
            self.flush().await?;
        }
        Ok(())
    }

    pub(crate) async fn flush(&mut self) -> Result<(), SourceError> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let chunk = std::mem::take(&mut self.buffer);
        self.tx.send(chunk).await.map_err(|_| SourceError::Transport {
            message: "extraction consumer hung up".into(),
        })
    }

    pub(crate) async fn finish(mut self) -> Result<u64, SourceError> {
        self.flush().await?;
        Ok(self.total)
    }
}

/// Quote an identifier with the given delimiters, doubling embedded closers.
pub(crate) fn quote_ident(name: &str, open: char, close: char) -> String {
    let escaped = name.replace(close, &format!("{close}{close}"));
    format!("{open}{escaped}{close}")
}
