//! SQL engine sources.
//!
//! PostgreSQL and MySQL go through `sqlx` pools; SQL Server goes through
//! `tiberius`, one connection per operation. Discovery runs two parametrized
//! `information_schema` queries (columns, primary keys) and merges them in
//! memory. Extraction casts every projected column to text in the select list
//! so rows decode uniformly across engines.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Executor, Row};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use super::{Chunker, RawRow, SchemaInfo, SourceReader, quote_ident};
use crate::connection::{ConnectionSpec, SqlDialect};
use crate::error::SourceError;
use crate::schema::{ColumnDef, DiscoveredColumn, DiscoveredTable, TableSchema};
use crate::typemap;
use crate::types::LogicalType;

const EXTRACT_POOL_SIZE: u32 = 5;

type MssqlClient = tiberius::Client<Compat<TcpStream>>;

enum Backend {
    Postgres(PgPool),
    MySql(MySqlPool),
    Mssql(tiberius::Config),
}

fn query_error(e: impl std::fmt::Display) -> SourceError {
    SourceError::Query {
        message: e.to_string(),
    }
}

fn connect_error(spec: &ConnectionSpec, e: impl std::fmt::Display) -> SourceError {
    SourceError::Transport {
        message: format!("Failed to connect to {spec}: {e}"),
    }
}

/// Column row returned by the catalog query, before merging primary keys.
struct CatalogColumn {
    table: String,
    name: String,
    native_type: String,
    type_text: Option<String>,
    nullable: bool,
    precision: Option<i64>,
    scale: Option<i64>,
}

impl CatalogColumn {
    fn into_discovered(
        self,
        dialect: SqlDialect,
        primary_keys: &HashMap<String, Vec<String>>,
    ) -> (String, DiscoveredColumn) {
        let primary_key = primary_keys
            .get(&self.table)
            .is_some_and(|cols| cols.contains(&self.name));
        let column = DiscoveredColumn {
            name: self.name,
            native_type: self.native_type,
            type_text: self.type_text,
            nullable: self.nullable,
            primary_key,
            precision: self.precision.and_then(|p| u32::try_from(p).ok()),
            scale: self.scale.and_then(|s| u32::try_from(s).ok()),
            comment: None,
            dialect: Some(dialect),
        };
        (self.table, column)
    }
}

fn is_yes(value: &str) -> bool {
    value.eq_ignore_ascii_case("yes")
}

/// Reader over one SQL engine.
pub struct SqlReader {
    spec: ConnectionSpec,
    backend: Backend,
}

impl SqlReader {
    /// Open the engine connection described by `spec`.
    pub async fn connect(spec: ConnectionSpec) -> Result<Self, SourceError> {
        let backend = match spec.dialect {
            SqlDialect::Postgres => {
                let pool = PgPoolOptions::new()
                    .max_connections(EXTRACT_POOL_SIZE)
                    .after_connect(|conn, _meta| {
                        Box::pin(async move {
                            conn.execute("SET TIME ZONE 'UTC'").await?;
                            Ok(())
                        })
                    })
                    .connect(&spec.url())
                    .await
                    .map_err(|e| connect_error(&spec, e))?;
                Backend::Postgres(pool)
            }
            SqlDialect::MySql => {
                let pool = MySqlPoolOptions::new()
                    .max_connections(EXTRACT_POOL_SIZE)
                    .after_connect(|conn, _meta| {
                        Box::pin(async move {
                            conn.execute("SET time_zone = '+00:00'").await?;
                            Ok(())
                        })
                    })
                    .connect(&spec.url())
                    .await
                    .map_err(|e| connect_error(&spec, e))?;
                Backend::MySql(pool)
            }
            SqlDialect::Mssql => {
                let mut config = tiberius::Config::new();
                config.host(&spec.host);
                config.port(spec.port);
                config.database(&spec.database);
                config.authentication(tiberius::AuthMethod::sql_server(&spec.username, spec.password()));
                config.trust_cert();
                // Fail at connect time rather than on first query.
                drop(mssql_connect(&config).await.map_err(|e| connect_error(&spec, e))?);
                Backend::Mssql(config)
            }
        };
        debug!(url = %spec, driver = spec.dialect.driver(), "SQL source connected");
        Ok(Self { spec, backend })
    }

    pub fn dialect(&self) -> SqlDialect {
        self.spec.dialect
    }

    async fn catalog_columns(&self, schema: &str, table: Option<&str>) -> Result<Vec<CatalogColumn>, SourceError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let mut sql = String::from(
                    "SELECT table_name::text, column_name::text, udt_name::text, data_type::text, \
                     is_nullable::text, numeric_precision::int8, numeric_scale::int8 \
                     FROM information_schema.columns WHERE table_schema = $1",
                );
                if table.is_some() {
                    sql.push_str(" AND table_name = $2");
                }
                sql.push_str(" ORDER BY table_name, ordinal_position");
                let mut query = sqlx::query(&sql).bind(schema);
                if let Some(table) = table {
                    query = query.bind(table);
                }
                let rows = query.fetch_all(pool).await.map_err(query_error)?;
                rows.iter()
                    .map(|row| {
                        Ok(CatalogColumn {
                            table: row.try_get(0).map_err(query_error)?,
                            name: row.try_get(1).map_err(query_error)?,
                            native_type: row.try_get(2).map_err(query_error)?,
                            type_text: row.try_get(3).map_err(query_error)?,
                            nullable: is_yes(&row.try_get::<String, _>(4).map_err(query_error)?),
                            precision: row.try_get(5).map_err(query_error)?,
                            scale: row.try_get(6).map_err(query_error)?,
                        })
                    })
                    .collect()
            }
            Backend::MySql(pool) => {
                let mut sql = String::from(
                    "SELECT CAST(TABLE_NAME AS CHAR), CAST(COLUMN_NAME AS CHAR), CAST(DATA_TYPE AS CHAR), \
                     CAST(COLUMN_TYPE AS CHAR), CAST(IS_NULLABLE AS CHAR), \
                     CAST(NUMERIC_PRECISION AS SIGNED), CAST(NUMERIC_SCALE AS SIGNED) \
                     FROM information_schema.columns WHERE TABLE_SCHEMA = ?",
                );
                if table.is_some() {
                    sql.push_str(" AND TABLE_NAME = ?");
                }
                sql.push_str(" ORDER BY TABLE_NAME, ORDINAL_POSITION");
                let mut query = sqlx::query(&sql).bind(schema);
                if let Some(table) = table {
                    query = query.bind(table);
                }
                let rows = query.fetch_all(pool).await.map_err(query_error)?;
                rows.iter()
                    .map(|row| {
                        Ok(CatalogColumn {
                            table: row.try_get(0).map_err(query_error)?,
                            name: row.try_get(1).map_err(query_error)?,
                            native_type: row.try_get(2).map_err(query_error)?,
                            type_text: row.try_get(3).map_err(query_error)?,
                            nullable: is_yes(&row.try_get::<String, _>(4).map_err(query_error)?),
                            precision: row.try_get(5).map_err(query_error)?,
                            scale: row.try_get(6).map_err(query_error)?,
                        })
                    })
                    .collect()
            }
            Backend::Mssql(config) => {
                let mut sql = String::from(
                    "SELECT TABLE_NAME, COLUMN_NAME, DATA_TYPE, IS_NULLABLE, \
                     CAST(NUMERIC_PRECISION AS BIGINT), CAST(NUMERIC_SCALE AS BIGINT) \
                     FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_SCHEMA = @P1",
                );
                if table.is_some() {
                    sql.push_str(" AND TABLE_NAME = @P2");
                }
                sql.push_str(" ORDER BY TABLE_NAME, ORDINAL_POSITION");
                let mut client = mssql_connect(config).await.map_err(|e| connect_error(&self.spec, e))?;
                let rows = match table {
                    Some(table) => client.query(sql.as_str(), &[&schema, &table]).await,
                    None => client.query(sql.as_str(), &[&schema]).await,
                }
                .map_err(query_error)?
                .into_first_result()
                .await
                .map_err(query_error)?;
                rows.iter()
                    .map(|row| {
                        let text = |idx: usize| -> Result<String, SourceError> {
                            Ok(row
                                .try_get::<&str, _>(idx)
                                .map_err(query_error)?
                                .unwrap_or_default()
                                .to_string())
                        };
                        Ok(CatalogColumn {
                            table: text(0)?,
                            name: text(1)?,
                            native_type: text(2)?,
                            type_text: None,
                            nullable: is_yes(&text(3)?),
                            precision: row.try_get::<i64, _>(4).map_err(query_error)?,
                            scale: row.try_get::<i64, _>(5).map_err(query_error)?,
                        })
                    })
                    .collect()
            }
        }
    }

    async fn primary_keys(&self, schema: &str, table: Option<&str>) -> Result<HashMap<String, Vec<String>>, SourceError> {
        let mut pairs: Vec<(String, String)> = Vec::new();
        match &self.backend {
            Backend::Postgres(pool) => {
                let mut sql = String::from(
                    "SELECT kcu.table_name::text, kcu.column_name::text \
                     FROM information_schema.table_constraints tc \
                     JOIN information_schema.key_column_usage kcu \
                       ON tc.constraint_name = kcu.constraint_name \
                      AND tc.table_schema = kcu.table_schema \
                      AND tc.table_name = kcu.table_name \
                     WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = $1",
                );
                if table.is_some() {
                    sql.push_str(" AND tc.table_name = $2");
                }
                sql.push_str(" ORDER BY kcu.table_name, kcu.ordinal_position");
                let mut query = sqlx::query_as::<_, (String, String)>(&sql).bind(schema);
                if let Some(table) = table {
                    query = query.bind(table);
                }
                pairs = query.fetch_all(pool).await.map_err(query_error)?;
            }
            Backend::MySql(pool) => {
                let mut sql = String::from(
                    "SELECT CAST(kcu.TABLE_NAME AS CHAR), CAST(kcu.COLUMN_NAME AS CHAR) \
                     FROM information_schema.table_constraints tc \
                     JOIN information_schema.key_column_usage kcu \
                       ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME \
                      AND tc.TABLE_SCHEMA = kcu.TABLE_SCHEMA \
                      AND tc.TABLE_NAME = kcu.TABLE_NAME \
                     WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY' AND tc.TABLE_SCHEMA = ?",
                );
                if table.is_some() {
                    sql.push_str(" AND tc.TABLE_NAME = ?");
                }
                sql.push_str(" ORDER BY kcu.TABLE_NAME, kcu.ORDINAL_POSITION");
                let mut query = sqlx::query_as::<_, (String, String)>(&sql).bind(schema);
                if let Some(table) = table {
                    query = query.bind(table);
                }
                pairs = query.fetch_all(pool).await.map_err(query_error)?;
            }
            Backend::Mssql(config) => {
                let mut sql = String::from(
                    "SELECT kcu.TABLE_NAME, kcu.COLUMN_NAME \
                     FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc \
                     JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu \
                       ON tc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME \
                      AND tc.TABLE_SCHEMA = kcu.TABLE_SCHEMA \
                      AND tc.TABLE_NAME = kcu.TABLE_NAME \
                     WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY' AND tc.TABLE_SCHEMA = @P1",
                );
                if table.is_some() {
                    sql.push_str(" AND tc.TABLE_NAME = @P2");
                }
                sql.push_str(" ORDER BY kcu.TABLE_NAME, kcu.ORDINAL_POSITION");
                let mut client = mssql_connect(config).await.map_err(|e| connect_error(&self.spec, e))?;
                let rows = match table {
                    Some(table) => client.query(sql.as_str(), &[&schema, &table]).await,
                    None => client.query(sql.as_str(), &[&schema]).await,
                }
                .map_err(query_error)?
                .into_first_result()
                .await
                .map_err(query_error)?;
                for row in &rows {
                    let table = row.try_get::<&str, _>(0).map_err(query_error)?.unwrap_or_default();
                    let column = row.try_get::<&str, _>(1).map_err(query_error)?.unwrap_or_default();
                    pairs.push((table.to_string(), column.to_string()));
                }
            }
        }

        let mut keys: HashMap<String, Vec<String>> = HashMap::new();
        for (table, column) in pairs {
            keys.entry(table).or_default().push(column);
        }
        Ok(keys)
    }

    async fn discover(&self, schema: &str, table: Option<&str>) -> Result<Vec<DiscoveredTable>, SourceError> {
        let columns = self.catalog_columns(schema, table).await?;
        let keys = self.primary_keys(schema, table).await?;

        let mut tables: Vec<DiscoveredTable> = Vec::new();
        for column in columns {
            let (table_name, column) = column.into_discovered(self.spec.dialect, &keys);
            match tables.last_mut() {
                Some(last) if last.name == table_name => last.columns.push(column),
                _ => tables.push(DiscoveredTable {
                    schema: schema.to_string(),
                    name: table_name,
                    columns: vec![column],
                    comment: None,
                }),
            }
        }
        Ok(tables)
    }
}

async fn mssql_connect(config: &tiberius::Config) -> Result<MssqlClient, tiberius::error::Error> {
    let tcp = TcpStream::connect(config.get_addr()).await?;
    tcp.set_nodelay(true)?;
    tiberius::Client::connect(config.clone(), tcp.compat_write()).await
}

fn is_money(native_type: &str) -> bool {
    matches!(typemap::normalize_type_name(native_type).as_str(), "money" | "smallmoney")
}

/// Select-list expression casting one column to text for a dialect.
pub(crate) fn text_projection(dialect: SqlDialect, column: &ColumnDef) -> String {
    match dialect {
        SqlDialect::Postgres => {
            let ident = quote_ident(&column.name, '"', '"');
            match column.logical {
                LogicalType::Binary => format!("encode({ident}, 'hex')"),
                // `money` renders with locale currency symbols as text.
                LogicalType::Decimal { .. } => format!("{ident}::numeric::text"),
                _ => format!("{ident}::text"),
            }
        }
        SqlDialect::MySql => {
            let ident = quote_ident(&column.name, '`', '`');
            match column.logical {
                LogicalType::Binary => format!("HEX({ident})"),
                LogicalType::Boolean => format!("CAST({ident} + 0 AS CHAR)"),
                _ => format!("CAST({ident} AS CHAR)"),
            }
        }
        SqlDialect::Mssql => {
            let ident = quote_ident(&column.name, '[', ']');
            match column.logical {
                LogicalType::Binary => format!("CONVERT(VARCHAR(MAX), {ident}, 2)"),
                LogicalType::Timestamp => format!("CONVERT(NVARCHAR(40), {ident}, 126)"),
                // Style 3 keeps all 17 significant digits.
                LogicalType::Real | LogicalType::Double => format!("CONVERT(NVARCHAR(64), {ident}, 3)"),
                // Money text keeps two decimals; the type stores four.
                LogicalType::Decimal { .. } if is_money(&column.native_type) => {
                    format!("CAST(CAST({ident} AS DECIMAL(19,4)) AS NVARCHAR(MAX))")
                }
                _ => format!("CAST({ident} AS NVARCHAR(MAX))"),
            }
        }
    }
}

/// Full extraction statement for a projected table.
pub(crate) fn select_statement(dialect: SqlDialect, table: &TableSchema) -> String {
    let columns = table
        .columns
        .iter()
        .map(|c| text_projection(dialect, c))
        .collect::<Vec<_>>()
        .join(", ");
    let from = match dialect {
        SqlDialect::Postgres => format!(
            "{}.{}",
            quote_ident(&table.schema, '"', '"'),
            quote_ident(&table.name, '"', '"')
        ),
        SqlDialect::MySql => format!(
            "{}.{}",
            quote_ident(&table.schema, '`', '`'),
            quote_ident(&table.name, '`', '`')
        ),
        SqlDialect::Mssql => format!(
            "{}.{}",
            quote_ident(&table.schema, '[', ']'),
            quote_ident(&table.name, '[', ']')
        ),
    };
    format!("SELECT {columns} FROM {from}")
}

#[async_trait]
impl SourceReader for SqlReader {
    fn kind(&self) -> &'static str {
        self.spec.dialect.key()
    }

    async fn describe_schema(&self, schema: &str) -> Result<SchemaInfo, SourceError> {
        Ok(SchemaInfo {
            catalog: self.spec.database.clone(),
            name: schema.to_string(),
            comment: String::new(),
        })
    }

    async fn ping(&self) -> Result<(), SourceError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                sqlx::query("SELECT 1").execute(pool).await.map_err(query_error)?;
            }
            Backend::MySql(pool) => {
                sqlx::query("SELECT 1").execute(pool).await.map_err(query_error)?;
            }
            Backend::Mssql(config) => {
                let mut client = mssql_connect(config).await.map_err(|e| connect_error(&self.spec, e))?;
                client
                    .simple_query("SELECT 1")
                    .await
                    .map_err(query_error)?
                    .into_results()
                    .await
                    .map_err(query_error)?;
            }
        }
        Ok(())
    }

    async fn discover_table(&self, schema: &str, table: &str) -> Result<DiscoveredTable, SourceError> {
        let found = self.discover(schema, Some(table)).await?;
        Ok(found.into_iter().next().unwrap_or_else(|| DiscoveredTable {
            schema: schema.to_string(),
            name: table.to_string(),
            columns: Vec::new(),
            comment: None,
        }))
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<DiscoveredTable>, SourceError> {
        self.discover(schema, None).await
    }

    async fn read_table(
        &self,
        table: &TableSchema,
        chunk_size: usize,
        tx: mpsc::Sender<Vec<RawRow>>,
    ) -> Result<u64, SourceError> {
        let sql = select_statement(self.spec.dialect, table);
        let width = table.columns.len();
        let mut chunker = Chunker::new(chunk_size, tx);
        debug!(table = %table.name, "Extracting with: {sql}");

        match &self.backend {
            Backend::Postgres(pool) => {
                let mut rows = sqlx::query(&sql).fetch(pool);
                while let Some(row) = rows.try_next().await.map_err(query_error)? {
                    let raw = (0..width)
                        .map(|i| row.try_get::<Option<String>, _>(i))
                        .collect::<Result<RawRow, _>>()
                        .map_err(query_error)?;
                    chunker.push(raw).await?;
                }
            }
            Backend::MySql(pool) => {
                let mut rows = sqlx::query(&sql).fetch(pool);
                while let Some(row) = rows.try_next().await.map_err(query_error)? {
                    let raw = (0..width)
                        .map(|i| row.try_get::<Option<String>, _>(i))
                        .collect::<Result<RawRow, _>>()
                        .map_err(query_error)?;
                    chunker.push(raw).await?;
                }
            }
            Backend::Mssql(config) => {
                let mut client = mssql_connect(config).await.map_err(|e| connect_error(&self.spec, e))?;
                let mut rows = client
                    .simple_query(sql.as_str())
                    .await
                    .map_err(query_error)?
                    .into_row_stream();
                while let Some(row) = rows.try_next().await.map_err(query_error)? {
                    let raw = (0..width)
                        .map(|i| {
                            row.try_get::<&str, _>(i)
                                .map(|v| v.map(str::to_string))
                        })
                        .collect::<Result<RawRow, _>>()
                        .map_err(query_error)?;
                    chunker.push(raw).await?;
                }
            }
        }

        let rows = chunker.finish().await?;
        info!(table = %table.name, rows, dialect = %self.spec.dialect, "SQL table extracted");
        Ok(rows)
    }

    async fn close(&self) {
        match &self.backend {
            Backend::Postgres(pool) => pool.close().await,
            Backend::MySql(pool) => pool.close().await,
            Backend::Mssql(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str, logical: LogicalType) -> ColumnDef {
        ColumnDef {
            name: name.into(),
            native_type: logical.to_string(),
            logical,
            nullable: true,
            primary_key: false,
        }
    }

    fn orders() -> TableSchema {
        TableSchema {
            schema: "sales".into(),
            name: "orders".into(),
            columns: vec![
                column("id", LogicalType::Integer),
                column("payload", LogicalType::Binary),
                column("paid", LogicalType::Boolean),
            ],
        }
    }

    #[test]
    fn test_postgres_select_casts_to_text() {
        assert_eq!(
            select_statement(SqlDialect::Postgres, &orders()),
            "SELECT \"id\"::text, encode(\"payload\", 'hex'), \"paid\"::text FROM \"sales\".\"orders\""
        );
    }

    #[test]
    fn test_mysql_select_casts_to_char() {
        assert_eq!(
            select_statement(SqlDialect::MySql, &orders()),
            "SELECT CAST(`id` AS CHAR), HEX(`payload`), CAST(`paid` + 0 AS CHAR) FROM `sales`.`orders`"
        );
    }

    #[test]
    fn test_mssql_select_uses_brackets() {
        let mut table = orders();
        table.columns.push(column("created", LogicalType::Timestamp));
        assert_eq!(
            select_statement(SqlDialect::Mssql, &table),
            "SELECT CAST([id] AS NVARCHAR(MAX)), CONVERT(VARCHAR(MAX), [payload], 2), \
             CAST([paid] AS NVARCHAR(MAX)), CONVERT(NVARCHAR(40), [created], 126) FROM [sales].[orders]"
        );
    }

    fn native(name: &str, native_type: &str) -> ColumnDef {
        ColumnDef {
            name: name.into(),
            native_type: native_type.into(),
            logical: typemap::map_type(native_type),
            nullable: true,
            primary_key: false,
        }
    }

    #[test]
    fn test_postgres_decimals_read_through_numeric() {
        assert_eq!(
            text_projection(SqlDialect::Postgres, &native("balance", "money")),
            "\"balance\"::numeric::text"
        );
        assert_eq!(
            text_projection(SqlDialect::Postgres, &native("total", "numeric(10,2)")),
            "\"total\"::numeric::text"
        );
        assert_eq!(
            text_projection(SqlDialect::Postgres, &native("note", "text")),
            "\"note\"::text"
        );
    }

    #[test]
    fn test_mssql_projection_keeps_full_precision() {
        assert_eq!(
            text_projection(SqlDialect::Mssql, &native("ratio", "float")),
            "CONVERT(NVARCHAR(64), [ratio], 3)"
        );
        assert_eq!(
            text_projection(SqlDialect::Mssql, &native("weight", "real")),
            "CONVERT(NVARCHAR(64), [weight], 3)"
        );
        assert_eq!(
            text_projection(SqlDialect::Mssql, &native("fee", "smallmoney")),
            "CAST(CAST([fee] AS DECIMAL(19,4)) AS NVARCHAR(MAX))"
        );
        assert_eq!(
            text_projection(SqlDialect::Mssql, &native("price", "decimal(10,2)")),
            "CAST([price] AS NVARCHAR(MAX))"
        );
    }

    #[test]
    fn test_mssql_rowversion_discovered_as_binary() {
        let (_, column) = CatalogColumn {
            table: "orders".into(),
            name: "row_ver".into(),
            native_type: "timestamp".into(),
            type_text: None,
            nullable: false,
            precision: None,
            scale: None,
        }
        .into_discovered(SqlDialect::Mssql, &HashMap::new());
        let def = ColumnDef::from(&column);
        assert_eq!(def.logical, LogicalType::Binary);
        assert_eq!(
            text_projection(SqlDialect::Mssql, &def),
            "CONVERT(VARCHAR(MAX), [row_ver], 2)"
        );
    }

    #[test]
    fn test_catalog_column_merges_primary_keys() {
        let keys = HashMap::from([("orders".to_string(), vec!["id".to_string()])]);
        let (table, column) = CatalogColumn {
            table: "orders".into(),
            name: "id".into(),
            native_type: "int4".into(),
            type_text: Some("integer".into()),
            nullable: false,
            precision: Some(32),
            scale: Some(0),
        }
        .into_discovered(SqlDialect::Postgres, &keys);
        assert_eq!(table, "orders");
        assert!(column.primary_key);
        assert_eq!(column.logical_type(), LogicalType::Integer);
    }
}
