//! Lakehouse source over REST.
//!
//! Discovery uses the Unity Catalog API; extraction submits a SQL statement to
//! the Statement Execution API, polls it to completion and follows result
//! chunks (inline or external links) until none remain.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{Chunker, RawRow, SchemaInfo, SourceReader, quote_ident};
use crate::connection::LakehouseConnection;
use crate::error::SourceError;
use crate::http;
use crate::schema::{DiscoveredColumn, DiscoveredTable, TableSchema};
use crate::types::LogicalType;

// ── Catalog client ─────────────────────────────────────────────────────────

/// Authenticated JSON client for the workspace REST API.
#[derive(Debug, Clone)]
pub struct CatalogClient {
    client: reqwest::Client,
    host_url: String,
    bearer: String,
}

impl CatalogClient {
    pub fn new(client: reqwest::Client, host_url: &str, bearer: String) -> Self {
        Self {
            client,
            host_url: host_url.trim_end_matches('/').to_string(),
            bearer,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host_url, path)
    }

    async fn decode(response: reqwest::Response) -> Result<serde_json::Value, SourceError> {
        let status = response.status();
        let body = response.text().await.map_err(http::transport)?;
        if status != reqwest::StatusCode::OK {
            return Err(SourceError::Upstream {
                status: status.as_u16(),
                message: http::upstream_message(status, &body),
            });
        }
        serde_json::from_str(&body).map_err(|e| SourceError::Decode {
            message: format!("invalid JSON body: {e}"),
        })
    }

    /// Single GET returning the decoded JSON body.
    pub async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<serde_json::Value, SourceError> {
        let response = self
            .client
            .get(self.url(path))
            .header("Authorization", &self.bearer)
            .query(query)
            .send()
            .await
            .map_err(http::transport)?;
        Self::decode(response).await
    }

    /// Paginated GET accumulating `list_key` items across pages.
    ///
    /// Continues while a response carries `next_page_token`, sent back as
    /// `page_token`. A page without `list_key` contributes nothing.
    pub async fn get_paginated(
        &self,
        path: &str,
        query: &[(&str, &str)],
        list_key: &str,
    ) -> Result<Vec<serde_json::Value>, SourceError> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let mut params: Vec<(&str, &str)> = query.to_vec();
            if let Some(token) = page_token.as_deref() {
                params.push(("page_token", token));
            }
            let page = self.get(path, &params).await?;
            pages += 1;

            if let Some(list) = page.get(list_key).and_then(|v| v.as_array()) {
                items.extend(list.iter().cloned());
            }
            match page
                .get("next_page_token")
                .and_then(|t| t.as_str())
                .filter(|t| !t.is_empty())
            {
                Some(next) => page_token = Some(next.to_string()),
                None => break,
            }
        }

        debug!(path, pages, items = items.len(), "Paginated fetch complete");
        Ok(items)
    }

    pub async fn post(&self, path: &str, body: &serde_json::Value) -> Result<serde_json::Value, SourceError> {
        let response = self
            .client
            .post(self.url(path))
            .header("Authorization", &self.bearer)
            .json(body)
            .send()
            .await
            .map_err(http::transport)?;
        Self::decode(response).await
    }

    /// GET a presigned URL. Presigned links must not carry the bearer token.
    async fn get_external(&self, url: &str) -> Result<serde_json::Value, SourceError> {
        let response = self.client.get(url).send().await.map_err(http::transport)?;
        Self::decode(response).await
    }
}

// ── Catalog payloads ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CatalogTable {
    name: String,
    #[serde(default)]
    schema_name: Option<String>,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    columns: Vec<CatalogColumn>,
    #[serde(default)]
    table_constraints: Vec<TableConstraint>,
}

#[derive(Debug, Deserialize)]
struct CatalogColumn {
    name: String,
    #[serde(default)]
    type_name: Option<String>,
    #[serde(default)]
    type_text: Option<String>,
    #[serde(default)]
    type_precision: Option<u32>,
    #[serde(default)]
    type_scale: Option<u32>,
    #[serde(default = "default_nullable")]
    nullable: bool,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    position: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TableConstraint {
    #[serde(default)]
    primary_key_constraint: Option<PrimaryKeyConstraint>,
}

#[derive(Debug, Deserialize)]
struct PrimaryKeyConstraint {
    #[serde(default)]
    child_columns: Vec<String>,
}

fn default_nullable() -> bool {
    true
}

impl CatalogTable {
    fn into_discovered(self, schema: &str) -> DiscoveredTable {
        let primary_keys: Vec<String> = self
            .table_constraints
            .iter()
            .find_map(|c| c.primary_key_constraint.as_ref())
            .map(|pk| pk.child_columns.clone())
            .unwrap_or_default();

        let mut columns = self.columns;
        columns.sort_by_key(|c| c.position.unwrap_or(u32::MAX));

        let columns = columns
            .into_iter()
            .map(|c| {
                let native = c.type_name.clone().or_else(|| c.type_text.clone()).unwrap_or_default();
                // Unity Catalog reports 0/0 for non-decimal types.
                let precision = c.type_precision.filter(|p| *p > 0);
                DiscoveredColumn {
                    primary_key: primary_keys.contains(&c.name),
                    name: c.name,
                    native_type: native,
                    type_text: c.type_text,
                    nullable: c.nullable,
                    precision,
                    scale: precision.and(c.type_scale),
                    comment: c.comment,
                    dialect: None,
                }
            })
            .collect();

        DiscoveredTable {
            schema: self.schema_name.unwrap_or_else(|| schema.to_string()),
            name: self.name,
            columns,
            comment: self.comment,
        }
    }
}

// ── Statement payloads ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StatementResponse {
    statement_id: String,
    status: StatementStatus,
    #[serde(default)]
    result: Option<ResultData>,
}

#[derive(Debug, Deserialize)]
struct StatementStatus {
    state: String,
    #[serde(default)]
    error: Option<StatementFailure>,
}

#[derive(Debug, Deserialize)]
struct StatementFailure {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ResultData {
    #[serde(default)]
    data_array: Option<Vec<Vec<serde_json::Value>>>,
    #[serde(default)]
    external_links: Option<Vec<ExternalLink>>,
    #[serde(default)]
    next_chunk_internal_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ExternalLink {
    external_link: String,
    #[serde(default)]
    next_chunk_internal_link: Option<String>,
}

fn cell(value: serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}

fn decode_rows(values: Vec<Vec<serde_json::Value>>) -> Vec<RawRow> {
    values
        .into_iter()
        .map(|row| row.into_iter().map(cell).collect())
        .collect()
}

// ── Reader ─────────────────────────────────────────────────────────────────

/// Reader over a lakehouse SQL warehouse.
pub struct LakehouseReader {
    catalog: CatalogClient,
    connection: LakehouseConnection,
    poll_interval: Duration,
}

impl LakehouseReader {
    pub fn new(client: reqwest::Client, connection: LakehouseConnection, poll_interval: Duration) -> Self {
        let catalog = CatalogClient::new(client, &connection.host_url, connection.token.bearer());
        Self {
            catalog,
            connection,
            poll_interval,
        }
    }

    pub fn catalog_client(&self) -> &CatalogClient {
        &self.catalog
    }

    async fn fetch_schema(&self, schema: &str) -> Result<SchemaInfo, SourceError> {
        let path = format!(
            "/api/2.1/unity-catalog/schemas/{}.{}",
            self.connection.catalog, schema
        );
        let details = self.catalog.get(&path, &[]).await?;
        let field = |key: &str| details.get(key).and_then(|v| v.as_str()).unwrap_or_default().to_string();
        Ok(SchemaInfo {
            catalog: field("catalog_name"),
            name: field("name"),
            comment: field("comment"),
        })
    }

    fn select_statement(&self, table: &TableSchema) -> String {
        let columns = table
            .columns
            .iter()
            .map(|c| {
                let ident = quote_ident(&c.name, '`', '`');
                match c.logical {
                    LogicalType::Binary => format!("hex({ident}) AS {ident}"),
                    _ => ident,
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "SELECT {columns} FROM {}.{}.{}",
            quote_ident(&self.connection.catalog, '`', '`'),
            quote_ident(&table.schema, '`', '`'),
            quote_ident(&table.name, '`', '`'),
        )
    }

    async fn wait_for(&self, mut response: StatementResponse) -> Result<StatementResponse, SourceError> {
        loop {
            match response.status.state.as_str() {
                "SUCCEEDED" => return Ok(response),
                "PENDING" | "RUNNING" => {
                    tokio::time::sleep(self.poll_interval).await;
                    let path = format!("/api/2.0/sql/statements/{}", response.statement_id);
                    let value = self.catalog.get(&path, &[]).await?;
                    response = parse_statement(value)?;
                }
                state => {
                    return Err(SourceError::Statement {
                        statement_id: response.statement_id.clone(),
                        state: state.to_string(),
                        message: response
                            .status
                            .error
                            .and_then(|e| e.message)
                            .unwrap_or_default(),
                    });
                }
            }
        }
    }

    async fn drain(&self, first: ResultData, chunker: &mut Chunker) -> Result<(), SourceError> {
        let mut next = Some(first);
        while let Some(data) = next.take() {
            let mut follow = data.next_chunk_internal_link;
            if let Some(rows) = data.data_array {
                for row in decode_rows(rows) {
                    chunker.push(row).await?;
                }
            }
            for link in data.external_links.unwrap_or_default() {
                let body = self.catalog.get_external(&link.external_link).await?;
                let rows: Vec<Vec<serde_json::Value>> =
                    serde_json::from_value(body).map_err(|e| SourceError::Decode {
                        message: format!("external chunk is not a row array: {e}"),
                    })?;
                for row in decode_rows(rows) {
                    chunker.push(row).await?;
                }
                if link.next_chunk_internal_link.is_some() {
                    follow = link.next_chunk_internal_link;
                }
            }
            if let Some(link) = follow {
                let value = self.catalog.get(&link, &[]).await?;
                next = Some(serde_json::from_value(value).map_err(|e| SourceError::Decode {
                    message: format!("invalid result chunk: {e}"),
                })?);
            }
        }
        Ok(())
    }
}

fn parse_statement(value: serde_json::Value) -> Result<StatementResponse, SourceError> {
    serde_json::from_value(value).map_err(|e| SourceError::Decode {
        message: format!("invalid statement response: {e}"),
    })
}

#[async_trait]
impl SourceReader for LakehouseReader {
    fn kind(&self) -> &'static str {
        "databrickssql"
    }

    async fn describe_schema(&self, schema: &str) -> Result<SchemaInfo, SourceError> {
        self.fetch_schema(schema).await
    }

    async fn ping(&self) -> Result<(), SourceError> {
        let path = format!("/api/2.0/sql/warehouses/{}", self.connection.warehouse_id);
        self.catalog.get(&path, &[]).await.map(|_| ())
    }

    async fn discover_table(&self, schema: &str, table: &str) -> Result<DiscoveredTable, SourceError> {
        let path = format!(
            "/api/2.1/unity-catalog/tables/{}.{}.{}",
            self.connection.catalog, schema, table
        );
        match self.catalog.get(&path, &[("include_browse", "true")]).await {
            Ok(value) => {
                let parsed: CatalogTable = serde_json::from_value(value).map_err(|e| SourceError::Decode {
                    message: format!("invalid table description: {e}"),
                })?;
                Ok(parsed.into_discovered(schema))
            }
            Err(SourceError::Upstream { status: 404, .. }) => Ok(DiscoveredTable {
                schema: schema.to_string(),
                name: table.to_string(),
                columns: Vec::new(),
                comment: None,
            }),
            Err(e) => Err(e),
        }
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<DiscoveredTable>, SourceError> {
        let items = self
            .catalog
            .get_paginated(
                "/api/2.1/unity-catalog/tables",
                &[
                    ("catalog_name", self.connection.catalog.as_str()),
                    ("schema_name", schema),
                ],
                "tables",
            )
            .await?;
        items
            .into_iter()
            .map(|item| {
                serde_json::from_value::<CatalogTable>(item)
                    .map(|t| t.into_discovered(schema))
                    .map_err(|e| SourceError::Decode {
                        message: format!("invalid table listing: {e}"),
                    })
            })
            .collect()
    }

    async fn read_table(
        &self,
        table: &TableSchema,
        chunk_size: usize,
        tx: mpsc::Sender<Vec<RawRow>>,
    ) -> Result<u64, SourceError> {
        let statement = self.select_statement(table);
        let body = serde_json::json!({
            "warehouse_id": self.connection.warehouse_id,
            "statement": statement,
            "catalog": self.connection.catalog,
            "schema": table.schema,
            "format": "JSON_ARRAY",
            "disposition": "EXTERNAL_LINKS",
            "wait_timeout": "30s",
            "on_wait_timeout": "CONTINUE",
        });

        let submitted = parse_statement(self.catalog.post("/api/2.0/sql/statements", &body).await?)?;
        debug!(table = %table.name, statement_id = %submitted.statement_id, "Statement submitted");
        let finished = self.wait_for(submitted).await?;

        let mut chunker = Chunker::new(chunk_size, tx);
        if let Some(result) = finished.result {
            self.drain(result, &mut chunker).await?;
        }
        let rows = chunker.finish().await?;
        info!(table = %table.name, rows, "Lakehouse table extracted");
        Ok(rows)
    }

    async fn close(&self) {}
}
