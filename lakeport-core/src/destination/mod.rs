//! Destination sinks for the load phase.
//!
//! A sink is prepared once per run with the execution schema, receives load
//! jobs from a bounded pool of concurrent writers, and is finalized to report
//! the artifacts it staged. Only file sinks feed promotion; the warehouse sink
//! feeds access provisioning.

pub mod csv;
pub mod duckdb;
pub mod postgres;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DestinationError;
use crate::normalize::{LoadFormat, LoadJob};
use crate::schema::{ExecutionSchema, TableSchema};

/// Something a load produced: a staged file or a warehouse table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedArtifact {
    /// File path relative to the staging root.
    pub path: Option<String>,
    /// `dataset.table` for warehouse tables.
    pub table_id: Option<String>,
    pub bytes: Option<u64>,
    /// SHA-512 hex digest for files.
    pub hash: Option<String>,
    pub rows: Option<u64>,
}

impl StagedArtifact {
    pub fn file(path: String, bytes: u64, hash: String) -> Self {
        Self {
            path: Some(path),
            table_id: None,
            bytes: Some(bytes),
            hash: Some(hash),
            rows: None,
        }
    }

    pub fn table(table_id: String, rows: Option<u64>) -> Self {
        Self {
            path: None,
            table_id: Some(table_id),
            bytes: None,
            hash: None,
            rows,
        }
    }
}

/// Trait for load-phase sinks.
#[async_trait]
pub trait DestinationSink: Send + Sync {
    /// Short sink name for logs.
    fn name(&self) -> &'static str;

    /// Encoding the normalizer must produce for this sink.
    fn load_format(&self) -> LoadFormat;

    /// Create or replace the target tables.
    async fn prepare(&self, schema: &ExecutionSchema) -> Result<(), DestinationError>;

    /// Write one load job. Called concurrently for different jobs.
    async fn load(&self, table: &TableSchema, job: &LoadJob) -> Result<(), DestinationError>;

    /// Flush, record the load and report what was staged.
    async fn finalize(&self) -> Result<Vec<StagedArtifact>, DestinationError>;

    /// Release connections and handles. Safe to call more than once.
    async fn close(&self);
}

pub(crate) fn write_error(target: impl AsRef<Path>, e: impl std::fmt::Display) -> DestinationError {
    DestinationError::Write {
        target: target.as_ref().display().to_string(),
        message: e.to_string(),
    }
}
