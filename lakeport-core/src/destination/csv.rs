//! Delimited-file sink: one CSV file per table (plus rotated parts) directly
//! under the staging root.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::{DestinationSink, StagedArtifact, write_error};
use crate::error::DestinationError;
use crate::normalize::{LoadFormat, LoadJob};
use crate::promote;
use crate::schema::{ExecutionSchema, TableSchema};

pub struct CsvSink {
    staging: PathBuf,
}

impl CsvSink {
    pub fn new(staging: impl Into<PathBuf>) -> Self {
        Self {
            staging: staging.into(),
        }
    }

    pub fn staging(&self) -> &Path {
        &self.staging
    }
}

#[async_trait]
impl DestinationSink for CsvSink {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn load_format(&self) -> LoadFormat {
        LoadFormat::Delimited
    }

    async fn prepare(&self, _schema: &ExecutionSchema) -> Result<(), DestinationError> {
        tokio::fs::create_dir_all(&self.staging)
            .await
            .map_err(|e| write_error(&self.staging, e))
    }

    async fn load(&self, _table: &TableSchema, job: &LoadJob) -> Result<(), DestinationError> {
        let Some(file_name) = job.path.file_name() else {
            return Err(write_error(&job.path, "load job has no file name"));
        };
        let target = self.staging.join(file_name);
        tokio::fs::copy(&job.path, &target)
            .await
            .map_err(|e| write_error(&target, e))?;
        debug!(table = %job.table, part = job.part, target = %target.display(), "Staged delimited part");
        Ok(())
    }

    async fn finalize(&self) -> Result<Vec<StagedArtifact>, DestinationError> {
        let staging = self.staging.clone();
        tokio::task::spawn_blocking(move || {
            let files = promote::collect_files(&staging).map_err(|e| write_error(&staging, e))?;
            files
                .into_iter()
                .map(|relative| {
                    let path = staging.join(&relative);
                    let (hash, bytes) = promote::sha512_file(&path).map_err(|e| write_error(&path, e))?;
                    Ok(StagedArtifact::file(promote::slash_path(&relative), bytes, hash))
                })
                .collect::<Result<Vec<_>, DestinationError>>()
        })
        .await
        .map_err(|e| write_error(&self.staging, e))?
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_copies_parts_and_reports_artifacts() {
        let work = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let part = work.path().join("orders.csv");
        std::fs::write(&part, "id\n1\n").unwrap();

        let sink = CsvSink::new(staging.path());
        let table = TableSchema {
            schema: "s".into(),
            name: "orders".into(),
            columns: vec![],
        };
        sink.prepare(&ExecutionSchema::default()).await.unwrap();
        sink.load(
            &table,
            &LoadJob {
                table: "orders".into(),
                part: 0,
                path: part,
                format: LoadFormat::Delimited,
                rows: 1,
                bytes: 5,
            },
        )
        .await
        .unwrap();

        let artifacts = sink.finalize().await.unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].path.as_deref(), Some("orders.csv"));
        assert_eq!(artifacts[0].bytes, Some(5));
        assert_eq!(artifacts[0].hash.as_ref().map(String::len), Some(128));
    }
}
