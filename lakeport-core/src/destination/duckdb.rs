//! Embedded columnar sink: a single `database.duckdb` file in staging, with
//! one schema named after the requested dataset.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use duckdb::Connection;
use tracing::{debug, info};

use super::{DestinationSink, StagedArtifact, write_error};
use crate::error::DestinationError;
use crate::normalize::{LoadFormat, LoadJob, read_row_spool};
use crate::promote;
use crate::schema::{ExecutionSchema, TableSchema};
use crate::source::quote_ident;
use crate::types::LogicalType;

pub const DATABASE_FILE: &str = "database.duckdb";

pub struct DuckDbSink {
    path: PathBuf,
    dataset: String,
    connection: Arc<Mutex<Option<Connection>>>,
}

impl DuckDbSink {
    pub fn open(staging: &Path, dataset: &str) -> Result<Self, DestinationError> {
        let path = staging.join(DATABASE_FILE);
        let connection = Connection::open(&path).map_err(|e| DestinationError::Connect {
            message: format!("{}: {e}", path.display()),
        })?;
        info!(path = %path.display(), dataset, "Opened columnar database");
        Ok(Self {
            path,
            dataset: dataset.to_string(),
            connection: Arc::new(Mutex::new(Some(connection))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` against the open connection on the blocking pool.
    async fn with_connection<T, F>(&self, f: F) -> Result<T, DestinationError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, DestinationError> + Send + 'static,
    {
        let connection = self.connection.clone();
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = connection
                .lock()
                .map_err(|_| write_error(&path, "connection lock poisoned"))?;
            let conn = guard
                .as_mut()
                .ok_or_else(|| write_error(&path, "connection already closed"))?;
            f(conn)
        })
        .await
        .map_err(|e| write_error(&self.path, e))?
    }
}

fn ident(name: &str) -> String {
    quote_ident(name, '"', '"')
}

pub(crate) fn create_table_sql(dataset: &str, table: &TableSchema) -> String {
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let not_null = if c.nullable { "" } else { " NOT NULL" };
            format!("{} {}{not_null}", ident(&c.name), c.logical.duckdb_type())
        })
        .collect();
    format!(
        "CREATE OR REPLACE TABLE {}.{} ({})",
        ident(dataset),
        ident(&table.name),
        columns.join(", ")
    )
}

pub(crate) fn insert_sql(dataset: &str, table: &TableSchema) -> String {
    let names: Vec<String> = table.columns.iter().map(|c| ident(&c.name)).collect();
    let params: Vec<String> = table
        .columns
        .iter()
        .map(|c| match c.logical {
            LogicalType::Binary => "unhex(?)".to_string(),
            other => format!("CAST(? AS {})", other.duckdb_type()),
        })
        .collect();
    format!(
        "INSERT INTO {}.{} ({}) VALUES ({})",
        ident(dataset),
        ident(&table.name),
        names.join(", "),
        params.join(", ")
    )
}

#[async_trait]
impl DestinationSink for DuckDbSink {
    fn name(&self) -> &'static str {
        "duckdb"
    }

    fn load_format(&self) -> LoadFormat {
        LoadFormat::Rows
    }

    async fn prepare(&self, schema: &ExecutionSchema) -> Result<(), DestinationError> {
        let mut statements = vec![format!("CREATE SCHEMA IF NOT EXISTS {}", ident(&self.dataset))];
        statements.extend(
            schema
                .tables
                .iter()
                .map(|t| create_table_sql(&self.dataset, t)),
        );
        let path = self.path.clone();
        self.with_connection(move |conn| {
            conn.execute_batch(&statements.join(";\n"))
                .map_err(|e| write_error(&path, e))
        })
        .await
    }

    async fn load(&self, table: &TableSchema, job: &LoadJob) -> Result<(), DestinationError> {
        let sql = insert_sql(&self.dataset, table);
        let spool = job.path.clone();
        let target = format!("{}.{}", self.dataset, table.name);
        let rows = read_row_spool(&spool).map_err(|e| write_error(&spool, e))?;
        let count = rows.len();
        self.with_connection(move |conn| {
            let err = |e: duckdb::Error| DestinationError::Write {
                target: target.clone(),
                message: e.to_string(),
            };
            let tx = conn.transaction().map_err(err)?;
            {
                let mut stmt = tx.prepare(&sql).map_err(err)?;
                for row in &rows {
                    stmt.execute(duckdb::params_from_iter(row.iter()))
                        .map_err(err)?;
                }
            }
            tx.commit().map_err(err)
        })
        .await?;
        debug!(table = %table.name, part = job.part, rows = count, "Loaded part into columnar database");
        Ok(())
    }

    async fn finalize(&self) -> Result<Vec<StagedArtifact>, DestinationError> {
        let path = self.path.clone();
        self.with_connection(move |conn| {
            conn.execute_batch("CHECKPOINT")
                .map_err(|e| write_error(&path, e))
        })
        .await?;
        self.close().await;

        let path = self.path.clone();
        let (hash, bytes) = tokio::task::spawn_blocking(move || promote::sha512_file(&path))
            .await
            .map_err(|e| write_error(&self.path, e))?
            .map_err(|e| write_error(&self.path, e))?;
        Ok(vec![StagedArtifact::file(
            DATABASE_FILE.to_string(),
            bytes,
            hash,
        )])
    }

    async fn close(&self) {
        if let Ok(mut guard) = self.connection.lock() {
            // Dropping the connection releases the file for promotion.
            guard.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;
    use tempfile::TempDir;

    fn orders() -> TableSchema {
        let col = |name: &str, logical: LogicalType, nullable: bool| ColumnDef {
            name: name.into(),
            native_type: String::new(),
            logical,
            nullable,
            primary_key: false,
        };
        TableSchema {
            schema: "sales".into(),
            name: "orders".into(),
            columns: vec![
                col("id", LogicalType::BigInt, false),
                col(
                    "amount",
                    LogicalType::Decimal {
                        precision: Some(10),
                        scale: Some(2),
                    },
                    true,
                ),
                col("payload", LogicalType::Binary, true),
            ],
        }
    }

    #[test]
    fn test_create_table_sql() {
        assert_eq!(
            create_table_sql("sales", &orders()),
            r#"CREATE OR REPLACE TABLE "sales"."orders" ("id" BIGINT NOT NULL, "amount" DECIMAL(10,2), "payload" BLOB)"#
        );
    }

    #[test]
    fn test_insert_sql_casts_parameters() {
        assert_eq!(
            insert_sql("sales", &orders()),
            r#"INSERT INTO "sales"."orders" ("id", "amount", "payload") VALUES (CAST(? AS BIGINT), CAST(? AS DECIMAL(10,2)), unhex(?))"#
        );
    }

    #[tokio::test]
    async fn test_load_and_finalize() {
        let work = TempDir::new().unwrap();
        let staging = TempDir::new().unwrap();
        let spool = work.path().join("orders.jsonl");
        std::fs::write(
            &spool,
            "[\"1\",\"10.50\",\"dead\"]\n[\"2\",null,null]\n",
        )
        .unwrap();

        let table = orders();
        let schema = ExecutionSchema {
            tables: vec![table.clone()],
        };
        let sink = DuckDbSink::open(staging.path(), "sales").unwrap();
        sink.prepare(&schema).await.unwrap();
        sink.load(
            &table,
            &LoadJob {
                table: "orders".into(),
                part: 0,
                path: spool,
                format: LoadFormat::Rows,
                rows: 2,
                bytes: 0,
            },
        )
        .await
        .unwrap();

        let artifacts = sink.finalize().await.unwrap();
        assert_eq!(artifacts[0].path.as_deref(), Some(DATABASE_FILE));

        let conn = Connection::open(staging.path().join(DATABASE_FILE)).unwrap();
        let count: i64 = conn
            .query_row("SELECT count(*) FROM sales.orders", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }
}
