//! Relational warehouse sink.
//!
//! Each run loads into its own dataset schema, `{project}_{start}_{schema}`
//! lower-cased. Tables are dropped and recreated on every run (replace
//! semantics), and each load is recorded in a `_lakeport_loads` bookkeeping
//! table inside the dataset.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Postgres, QueryBuilder, Row};
use tracing::{debug, info};

use super::{DestinationSink, StagedArtifact, write_error};
use crate::config::WarehouseConfig;
use crate::connection::{ConnectionSpec, SqlDialect};
use crate::error::{DestinationError, LakeportError};
use crate::normalize::{LoadFormat, LoadJob, read_row_spool};
use crate::request::ProjectRef;
use crate::schema::{ExecutionSchema, TableSchema};
use crate::source::quote_ident;
use crate::types::LogicalType;

/// Tables created for bookkeeping start with this prefix and are never
/// provisioned.
pub const INTERNAL_PREFIX: &str = "_lakeport_";
pub const LOADS_TABLE: &str = "_lakeport_loads";

const SYSTEM_SCHEMAS: [&str; 4] = ["information_schema", "pg_catalog", "pg_toast", "cron"];

/// PostgreSQL's limit on bind parameters per statement.
const MAX_BIND_PARAMS: usize = 65_535;

/// Dataset schema for a run: `{project}_{start}_{schema}`, lower-cased.
pub fn dataset_name(project: &ProjectRef, schema_name: &str) -> String {
    format!("{}_{}", dataset_prefix(project), schema_name.to_lowercase())
}

/// Prefix shared by every dataset a run creates.
pub fn dataset_prefix(project: &ProjectRef) -> String {
    format!("{}_{}", project.project_name, project.project_start_time).to_lowercase()
}

/// A base table in the warehouse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WarehouseTable {
    pub schema: String,
    pub name: String,
}

impl WarehouseTable {
    pub fn qualified(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

fn ident(name: &str) -> String {
    quote_ident(name, '"', '"')
}

/// Open a pool against the configured warehouse.
pub async fn connect(config: &WarehouseConfig, max_connections: u32) -> Result<PgPool, LakeportError> {
    let spec = ConnectionSpec::new(
        SqlDialect::Postgres,
        config.host()?,
        config.port,
        config.database()?,
        config.username()?,
        config.password()?,
    );
    let pool = PgPoolOptions::new()
        .max_connections(max_connections.max(1))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                conn.execute("SET TIME ZONE 'UTC'").await?;
                Ok(())
            })
        })
        .connect(&spec.url())
        .await
        .map_err(|e| DestinationError::Connect {
            message: format!("{spec}: {e}"),
        })?;
    info!(warehouse = %spec, "Connected to warehouse");
    Ok(pool)
}

/// Every user base table in the warehouse, system schemas excluded.
pub async fn list_tables(pool: &PgPool) -> Result<Vec<WarehouseTable>, DestinationError> {
    let excluded: Vec<String> = SYSTEM_SCHEMAS.iter().map(|s| s.to_string()).collect();
    let rows = sqlx::query(
        "SELECT table_schema::text AS table_schema, table_name::text AS table_name \
         FROM information_schema.tables \
         WHERE table_schema <> ALL($1) AND table_type = 'BASE TABLE' \
         ORDER BY table_schema, table_name",
    )
    .bind(excluded)
    .fetch_all(pool)
    .await
    .map_err(|e| DestinationError::List {
        message: e.to_string(),
    })?;

    rows.iter()
        .map(|row| {
            Ok(WarehouseTable {
                schema: row.try_get("table_schema")?,
                name: row.try_get("table_name")?,
            })
        })
        .collect::<Result<_, sqlx::Error>>()
        .map_err(|e| DestinationError::List {
            message: e.to_string(),
        })
}

/// Tables belonging to a project run, bookkeeping tables excluded.
pub fn project_tables(tables: Vec<WarehouseTable>, project: &ProjectRef) -> Vec<WarehouseTable> {
    let prefix = dataset_prefix(project);
    tables
        .into_iter()
        .filter(|t| t.schema.to_lowercase().starts_with(&prefix))
        .filter(|t| !t.name.to_lowercase().starts_with(INTERNAL_PREFIX))
        .collect()
}

pub(crate) fn create_table_sql(dataset: &str, table: &TableSchema) -> String {
    let columns: Vec<String> = table
        .columns
        .iter()
        .map(|c| {
            let not_null = if c.nullable { "" } else { " NOT NULL" };
            format!("{} {}{not_null}", ident(&c.name), c.logical.postgres_type())
        })
        .collect();
    format!(
        "CREATE TABLE {}.{} ({})",
        ident(dataset),
        ident(&table.name),
        columns.join(", ")
    )
}

fn loads_table_sql(dataset: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {}.{} (\
         load_id text NOT NULL, \
         table_name text NOT NULL, \
         row_count bigint NOT NULL, \
         inserted_at timestamptz NOT NULL DEFAULT now())",
        ident(dataset),
        ident(LOADS_TABLE)
    )
}

fn insert_builder<'a>(
    dataset: &str,
    table: &TableSchema,
    rows: &'a [Vec<Option<String>>],
) -> QueryBuilder<'a, Postgres> {
    let names: Vec<String> = table.columns.iter().map(|c| ident(&c.name)).collect();
    let mut builder = QueryBuilder::new(format!(
        "INSERT INTO {}.{} ({}) ",
        ident(dataset),
        ident(&table.name),
        names.join(", ")
    ));
    builder.push_values(rows, |mut b, row| {
        for (cell, column) in row.iter().zip(&table.columns) {
            match column.logical {
                LogicalType::Binary => {
                    b.push("decode(");
                    b.push_bind_unseparated(cell.as_deref());
                    b.push_unseparated(", 'hex')");
                }
                other => {
                    b.push_bind(cell.as_deref());
                    b.push_unseparated(format!("::{}", other.postgres_type()));
                }
            }
        }
    });
    builder
}

pub struct PostgresSink {
    pool: PgPool,
    dataset: String,
    load_id: String,
    rows: Mutex<HashMap<String, u64>>,
}

impl PostgresSink {
    pub fn new(pool: PgPool, dataset: impl Into<String>, load_id: impl Into<String>) -> Self {
        Self {
            pool,
            dataset: dataset.into(),
            load_id: load_id.into(),
            rows: Mutex::new(HashMap::new()),
        }
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    fn add_rows(&self, table: &str, count: u64) {
        if let Ok(mut rows) = self.rows.lock() {
            *rows.entry(table.to_string()).or_default() += count;
        }
    }

    fn target(&self, table: &str) -> String {
        format!("{}.{table}", self.dataset)
    }
}

#[async_trait]
impl DestinationSink for PostgresSink {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn load_format(&self) -> LoadFormat {
        LoadFormat::Rows
    }

    async fn prepare(&self, schema: &ExecutionSchema) -> Result<(), DestinationError> {
        let err = |e: sqlx::Error| write_error(&self.dataset, e);
        let mut statements = vec![
            format!("CREATE SCHEMA IF NOT EXISTS {}", ident(&self.dataset)),
            loads_table_sql(&self.dataset),
        ];
        for table in &schema.tables {
            statements.push(format!(
                "DROP TABLE IF EXISTS {}.{}",
                ident(&self.dataset),
                ident(&table.name)
            ));
            statements.push(create_table_sql(&self.dataset, table));
        }

        let mut tx = self.pool.begin().await.map_err(err)?;
        for statement in &statements {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(err)?;
        }
        tx.commit().await.map_err(err)?;
        info!(dataset = %self.dataset, tables = schema.tables.len(), "Prepared warehouse dataset");
        Ok(())
    }

    async fn load(&self, table: &TableSchema, job: &LoadJob) -> Result<(), DestinationError> {
        let target = self.target(&table.name);
        let spool = job.path.clone();
        let rows = tokio::task::spawn_blocking(move || read_row_spool(&spool))
            .await
            .map_err(|e| write_error(&target, e))?
            .map_err(|e| write_error(&target, e))?;
        if table.columns.is_empty() || rows.is_empty() {
            return Ok(());
        }

        let batch = (MAX_BIND_PARAMS / table.columns.len()).max(1);
        let err = |e: sqlx::Error| write_error(&target, e);
        let mut tx = self.pool.begin().await.map_err(err)?;
        for chunk in rows.chunks(batch) {
            insert_builder(&self.dataset, table, chunk)
                .build()
                .execute(&mut *tx)
                .await
                .map_err(err)?;
        }
        tx.commit().await.map_err(err)?;

        self.add_rows(&table.name, rows.len() as u64);
        debug!(table = %target, part = job.part, rows = rows.len(), "Loaded part into warehouse");
        Ok(())
    }

    async fn finalize(&self) -> Result<Vec<StagedArtifact>, DestinationError> {
        let counts: Vec<(String, u64)> = match self.rows.lock() {
            Ok(rows) => rows.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            Err(_) => Vec::new(),
        };

        let insert = format!(
            "INSERT INTO {}.{} (load_id, table_name, row_count) VALUES ($1, $2, $3)",
            ident(&self.dataset),
            ident(LOADS_TABLE)
        );
        for (table, count) in &counts {
            sqlx::query(&insert)
                .bind(&self.load_id)
                .bind(table)
                .bind(*count as i64)
                .execute(&self.pool)
                .await
                .map_err(|e| write_error(LOADS_TABLE, e))?;
        }

        let loaded: HashMap<String, u64> = counts.into_iter().collect();
        let artifacts = list_tables(&self.pool)
            .await?
            .into_iter()
            .filter(|t| t.schema == self.dataset && !t.name.starts_with(INTERNAL_PREFIX))
            .map(|t| {
                let rows = loaded.get(&t.name).copied().or(Some(0));
                StagedArtifact::table(t.qualified(), rows)
            })
            .collect();
        Ok(artifacts)
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ColumnDef;
    use sqlx::Execute;

    fn project() -> ProjectRef {
        ProjectRef::new("Acme", "20250101_120000")
    }

    fn table() -> TableSchema {
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
                col("blob", LogicalType::Binary, true),
            ],
        }
    }

    #[test]
    fn test_dataset_name_is_lowercase() {
        assert_eq!(dataset_name(&project(), "Sales"), "acme_20250101_120000_sales");
    }

    #[test]
    fn test_project_tables_filters_prefix_and_bookkeeping() {
        let t = |schema: &str, name: &str| WarehouseTable {
            schema: schema.into(),
            name: name.into(),
        };
        let tables = vec![
            t("acme_20250101_120000_sales", "orders"),
            t("acme_20250101_120000_sales", LOADS_TABLE),
            t("acme_20240101_000000_sales", "orders"),
            t("other_20250101_120000_sales", "orders"),
        ];
        let kept = project_tables(tables, &project());
        assert_eq!(kept, vec![t("acme_20250101_120000_sales", "orders")]);
        assert_eq!(kept[0].qualified(), "acme_20250101_120000_sales.orders");
    }

    #[test]
    fn test_create_table_sql() {
        assert_eq!(
            create_table_sql("ds", &table()),
            r#"CREATE TABLE "ds"."orders" ("id" bigint NOT NULL, "blob" bytea)"#
        );
    }

    #[test]
    fn test_insert_builder_casts_binds() {
        let rows = vec![
            vec![Some("1".to_string()), Some("dead".to_string())],
            vec![Some("2".to_string()), None],
        ];
        let table = table();
        let mut builder = insert_builder("ds", &table, &rows);
        let sql = builder.build().sql().to_string();
        assert_eq!(
            sql,
            r#"INSERT INTO "ds"."orders" ("id", "blob") VALUES ($1::bigint, decode($2, 'hex')), ($3::bigint, decode($4, 'hex'))"#
        );
    }
}
