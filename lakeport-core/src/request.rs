//! Inbound request and outbound result contracts.
//!
//! Source and destination kinds are closed tagged unions keyed by a `type`
//! field. Everything is validated once here at the boundary; the rest of the
//! crate matches exhaustively on the typed variants.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{LakeportError, RequestError};
use crate::governance::AccessGrant;
use crate::promote::ManifestEntry;

static PROJECT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\S+$").expect("valid project name pattern"));
static START_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{8}_\d{6}$").expect("valid start time pattern"));

fn invalid(field: &str, message: impl Into<String>) -> RequestError {
    RequestError::InvalidField {
        field: field.to_string(),
        message: message.into(),
    }
}

fn require_token(field: &str, value: &str) -> Result<(), RequestError> {
    if value.trim().is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    if value.contains(['/', '\\']) || value == "." || value == ".." {
        return Err(invalid(field, "must not contain path separators"));
    }
    Ok(())
}

// ── Project ────────────────────────────────────────────────────────────────

/// Project identity shared by every request. Together with the destination it
/// names the staging and production locations of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub project_name: String,
    /// `YYYYMMDD_HHMMSS`.
    pub project_start_time: String,
}

impl ProjectRef {
    pub fn new(project_name: impl Into<String>, project_start_time: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            project_start_time: project_start_time.into(),
        }
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        if !PROJECT_NAME.is_match(&self.project_name) {
            return Err(invalid(
                "project_name",
                format!("'{}' must be a single token without whitespace", self.project_name),
            ));
        }
        require_token("project_name", &self.project_name)?;
        if !START_TIME.is_match(&self.project_start_time) {
            return Err(invalid(
                "project_start_time",
                format!("'{}' must match YYYYMMDD_HHMMSS", self.project_start_time),
            ));
        }
        Ok(())
    }

    /// `{project}_{start}` key used for run serialization and warehouse datasets.
    pub fn run_key(&self) -> String {
        format!("{}_{}", self.project_name, self.project_start_time)
    }
}

// ── Sources ────────────────────────────────────────────────────────────────

/// Source system a dataset is extracted from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SourceDescriptor {
    #[serde(rename = "databrickssql", alias = "DatabricksSQL")]
    Lakehouse(LakehouseSource),
    #[serde(rename = "postgresql", alias = "postgres")]
    Postgres(SqlSource),
    #[serde(rename = "mysql", alias = "mariadb")]
    MySql(SqlSource),
    #[serde(rename = "mssql", alias = "sqlserver")]
    Mssql(SqlSource),
}

impl SourceDescriptor {
    /// Canonical kind name, with aliases already resolved.
    pub fn kind(&self) -> &'static str {
        match self {
            SourceDescriptor::Lakehouse(_) => "databrickssql",
            SourceDescriptor::Postgres(_) => "postgresql",
            SourceDescriptor::MySql(_) => "mysql",
            SourceDescriptor::Mssql(_) => "mssql",
        }
    }

    /// Optional table allow-list, applied after discovery.
    pub fn table_filter(&self) -> Option<&[String]> {
        let tables = match self {
            SourceDescriptor::Lakehouse(s) => s.table.as_deref(),
            SourceDescriptor::Postgres(s) | SourceDescriptor::MySql(s) | SourceDescriptor::Mssql(s) => {
                s.table.as_deref()
            }
        };
        tables.filter(|t| !t.is_empty())
    }

    pub fn validate(&self) -> Result<(), RequestError> {
        match self {
            SourceDescriptor::Lakehouse(s) => {
                if s.host_url.trim().is_empty() {
                    return Err(invalid("source.host_url", "must not be empty"));
                }
                url::Url::parse(&s.host_url)
                    .map_err(|e| invalid("source.host_url", e.to_string()))?;
                if s.http_path.trim().is_empty() {
                    return Err(invalid("source.http_path", "must not be empty"));
                }
                if s.catalog.trim().is_empty() {
                    return Err(invalid("source.catalog", "must not be empty"));
                }
                if s.credentials.spn_clientid.is_empty() || s.credentials.spn_secret.is_empty() {
                    return Err(invalid("source.credentials", "secret names must not be empty"));
                }
            }
            SourceDescriptor::Postgres(s) | SourceDescriptor::MySql(s) | SourceDescriptor::Mssql(s) => {
                if s.host_url.trim().is_empty() {
                    return Err(invalid("source.host_url", "must not be empty"));
                }
                if s.database.trim().is_empty() {
                    return Err(invalid("source.database", "must not be empty"));
                }
                if s.credentials.username_key.is_empty() || s.credentials.password_key.is_empty() {
                    return Err(invalid("source.credentials", "secret names must not be empty"));
                }
            }
        }
        Ok(())
    }
}

/// Lakehouse reached through its REST catalog and statement APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LakehouseSource {
    pub host_url: String,
    /// SQL warehouse path; the warehouse id is its last segment.
    pub http_path: String,
    #[serde(default = "default_https_port")]
    pub port: u16,
    pub catalog: String,
    pub credentials: ServicePrincipalCredentials,
    #[serde(default)]
    pub table: Option<Vec<String>>,
}

/// Secret names for a service principal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServicePrincipalCredentials {
    #[serde(default)]
    pub provider: Option<String>,
    pub spn_clientid: String,
    pub spn_secret: String,
}

/// SQL engine reached through its native protocol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlSource {
    pub host_url: String,
    pub database: String,
    pub port: u16,
    pub credentials: SqlCredentials,
    #[serde(default)]
    pub table: Option<Vec<String>>,
}

/// Secret names for a database login.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlCredentials {
    #[serde(default)]
    pub provider: Option<String>,
    pub username_key: String,
    pub password_key: String,
}

fn default_https_port() -> u16 {
    443
}

// ── Destinations ───────────────────────────────────────────────────────────

/// Where extracted data lands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DestinationDescriptor {
    Filestore(FilestoreDestination),
    Postgresql(WarehouseDestination),
}

impl DestinationDescriptor {
    pub fn validate(&self) -> Result<(), RequestError> {
        match self {
            DestinationDescriptor::Filestore(f) => require_token("destination.name", &f.name),
            DestinationDescriptor::Postgresql(_) => Ok(()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DestinationDescriptor::Filestore(_) => "filestore",
            DestinationDescriptor::Postgresql(_) => "postgresql",
        }
    }

    /// Name used to key run serialization.
    pub fn lock_name(&self) -> String {
        match self {
            DestinationDescriptor::Filestore(f) => format!("filestore:{}", f.name.to_lowercase()),
            DestinationDescriptor::Postgresql(_) => "postgresql".to_string(),
        }
    }
}

/// File output under a mounted storage account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilestoreDestination {
    /// Must match a configured storage mount.
    pub name: String,
    pub format: FileFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    Duckdb,
}

/// Relational warehouse output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WarehouseDestination {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub format: WarehouseFormat,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarehouseFormat {
    #[default]
    Sql,
}

// ── Selection ──────────────────────────────────────────────────────────────

/// Requested column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRequest {
    pub name: String,
}

/// Requested table with ordered columns; an empty list selects all columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRequest {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnRequest>,
}

/// Tables and columns requested from one schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSelection {
    pub schema_name: String,
    pub tables: Vec<TableRequest>,
}

impl DatasetSelection {
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.schema_name.trim().is_empty() {
            return Err(invalid("metadata.schema_name", "must not be empty"));
        }
        if self.tables.is_empty() {
            return Err(invalid("metadata.tables", "at least one table is required"));
        }
        for table in &self.tables {
            if table.name.trim().is_empty() {
                return Err(invalid("metadata.tables.name", "must not be empty"));
            }
        }
        Ok(())
    }
}

// ── Requests ───────────────────────────────────────────────────────────────

/// Extract a dataset into a destination's staging area (or the warehouse).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieveRequest {
    #[serde(flatten)]
    pub project: ProjectRef,
    pub source: SourceDescriptor,
    pub destination: DestinationDescriptor,
    pub metadata: DatasetSelection,
}

impl RetrieveRequest {
    pub fn validate(&self) -> Result<(), LakeportError> {
        self.project.validate()?;
        self.source.validate()?;
        self.destination.validate()?;
        self.metadata.validate()?;
        Ok(())
    }
}

/// Promote staged output (files) or provision access (warehouse).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishRequest {
    #[serde(flatten)]
    pub project: ProjectRef,
    pub destination: DestinationDescriptor,
}

impl PublishRequest {
    pub fn validate(&self) -> Result<(), LakeportError> {
        self.project.validate()?;
        self.destination.validate()?;
        Ok(())
    }
}

/// Check that a source is reachable and a destination is usable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidateRequest {
    #[serde(flatten)]
    pub project: ProjectRef,
    pub source: SourceDescriptor,
    pub destination: DestinationDescriptor,
}

impl ValidateRequest {
    pub fn validate(&self) -> Result<(), LakeportError> {
        self.project.validate()?;
        self.source.validate()?;
        self.destination.validate()?;
        Ok(())
    }
}

/// Describe the tables of one schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRequest {
    pub source: SourceDescriptor,
    pub schema_name: String,
}

impl MetadataRequest {
    pub fn validate(&self) -> Result<(), LakeportError> {
        self.source.validate()?;
        if self.schema_name.trim().is_empty() {
            return Err(invalid("schema_name", "must not be empty").into());
        }
        Ok(())
    }
}

// ── Results ────────────────────────────────────────────────────────────────

/// One artifact produced by a retrieval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RetrievedRecord {
    File { file_path: String },
    Table { table_name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRetrieved {
    pub data_retrieved: Vec<RetrievedRecord>,
}

/// One artifact made available by a publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PublishedRecord {
    File(ManifestEntry),
    Grant(AccessGrant),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPublished {
    pub data_published: Vec<PublishedRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub validation_status: String,
}

/// Column description returned by metadata extraction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub description: String,
    pub datatype: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub name: String,
    pub description: String,
    pub columns: Vec<ColumnMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetMetadata {
    pub name: String,
    pub description: String,
    pub catalog: String,
    pub table_schema: String,
    pub tables: Vec<TableMetadata>,
}

// ── Envelope ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Uniform `{status, payload}` wrapper for every outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub status: Status,
    pub payload: serde_json::Value,
}

impl Envelope {
    pub fn success<T: Serialize>(payload: &T) -> Result<Self, LakeportError> {
        Ok(Self {
            status: Status::Success,
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn error(err: &LakeportError) -> Self {
        let mut payload = serde_json::json!({
            "detail": err.to_string(),
            "kind": err.kind(),
        });
        if let Some(stage) = err.stage() {
            payload["stage"] = serde_json::json!(stage);
        }
        Self {
            status: Status::Error,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, PromotionError, Stage};
    use pretty_assertions::assert_eq;

    fn retrieve_json() -> serde_json::Value {
        serde_json::json!({
            "project_name": "acme",
            "project_start_time": "20250101_120000",
            "source": {
                "type": "sqlserver",
                "host_url": "mssql.internal",
                "database": "clinical",
                "port": 1433,
                "credentials": {"username_key": "sql-user", "password_key": "sql-pass"}
            },
            "destination": {"type": "filestore", "name": "LSC", "format": "csv"},
            "metadata": {
                "schema_name": "dbo",
                "tables": [{"name": "orders", "columns": [{"name": "id"}, {"name": "total"}]}]
            }
        })
    }

    #[test]
    fn test_parse_retrieve_request_with_alias() {
        let request: RetrieveRequest = serde_json::from_value(retrieve_json()).unwrap();
        assert_eq!(request.source.kind(), "mssql");
        assert!(matches!(
            request.destination,
            DestinationDescriptor::Filestore(FilestoreDestination {
                format: FileFormat::Csv,
                ..
            })
        ));
        assert_eq!(request.metadata.tables[0].columns.len(), 2);
        request.validate().unwrap();
    }

    #[test]
    fn test_lakehouse_port_defaults() {
        let source: SourceDescriptor = serde_json::from_value(serde_json::json!({
            "type": "databrickssql",
            "host_url": "https://adb-1.azuredatabricks.net",
            "http_path": "/sql/1.0/warehouses/abc123",
            "catalog": "main",
            "credentials": {"spn_clientid": "cid", "spn_secret": "csecret"},
            "table": ["patients"]
        }))
        .unwrap();
        match &source {
            SourceDescriptor::Lakehouse(l) => assert_eq!(l.port, 443),
            other => panic!("unexpected source {other:?}"),
        }
        assert_eq!(source.table_filter(), Some(&["patients".to_string()][..]));
        source.validate().unwrap();
    }

    #[test]
    fn test_unknown_source_type_rejected() {
        let mut json = retrieve_json();
        json["source"]["type"] = "oracle".into();
        assert!(serde_json::from_value::<RetrieveRequest>(json).is_err());
    }

    #[test]
    fn test_project_validation() {
        assert!(ProjectRef::new("acme", "20250101_120000").validate().is_ok());
        assert!(ProjectRef::new("ac me", "20250101_120000").validate().is_err());
        assert!(ProjectRef::new("acme", "2025-01-01").validate().is_err());
        assert!(ProjectRef::new("../acme", "20250101_120000").validate().is_err());
    }

    #[test]
    fn test_warehouse_destination_defaults() {
        let dest: DestinationDescriptor =
            serde_json::from_value(serde_json::json!({"type": "postgresql"})).unwrap();
        assert_eq!(
            dest,
            DestinationDescriptor::Postgresql(WarehouseDestination::default())
        );
    }

    #[test]
    fn test_result_serialization() {
        let retrieved = DataRetrieved {
            data_retrieved: vec![RetrievedRecord::File {
                file_path: "orders.csv".into(),
            }],
        };
        assert_eq!(
            serde_json::to_value(&retrieved).unwrap(),
            serde_json::json!({"data_retrieved": [{"file_path": "orders.csv"}]})
        );
    }

    #[test]
    fn test_error_envelope() {
        let err = LakeportError::from(PromotionError::NothingToPublish).at(Stage::Collect);
        let envelope = Envelope::error(&err);
        assert_eq!(envelope.status, Status::Error);
        assert_eq!(envelope.payload["stage"], "collect");
        assert_eq!(
            envelope.payload["kind"],
            serde_json::json!(ErrorKind::PromotionIntegrity)
        );
        assert!(
            envelope.payload["detail"]
                .as_str()
                .unwrap()
                .contains("Nothing to publish")
        );
    }
}
