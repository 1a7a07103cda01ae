//! Integration tests for the Lakeport service.
//!
//! These tests drive retrieval, publishing, validation and metadata requests
//! end-to-end against an in-process source and governance service, with file
//! destinations rooted in a temporary mount.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use lakeport_core::config::Settings;
use lakeport_core::destination::postgres::{WarehouseTable, project_tables};
use lakeport_core::error::{ErrorKind, LakeportError, PromotionError, SourceError, Stage};
use lakeport_core::governance::provision_access;
use lakeport_core::request::{
    MetadataRequest, ProjectRef, PublishRequest, PublishedRecord, RetrieveRequest, RetrievedRecord,
    SourceDescriptor, ValidateRequest,
};
use lakeport_core::schema::{DiscoveredColumn, DiscoveredTable, TableSchema};
use lakeport_core::secrets::{InMemorySecretStore, SecretStore};
use lakeport_core::source::{RawRow, SchemaInfo, SourceReader};
use lakeport_core::{InMemoryGovernance, Service, SourceFactory};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::mpsc;

// ── Fakes ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct FakeSource {
    tables: Vec<DiscoveredTable>,
    rows: Vec<RawRow>,
    reachable: bool,
}

#[async_trait]
impl SourceReader for FakeSource {
    fn kind(&self) -> &'static str {
        "postgresql"
    }

    async fn ping(&self) -> Result<(), SourceError> {
        if self.reachable {
            Ok(())
        } else {
            Err(SourceError::Transport {
                message: "connection refused".into(),
            })
        }
    }

    async fn discover_table(&self, schema: &str, table: &str) -> Result<DiscoveredTable, SourceError> {
        Ok(self
            .tables
            .iter()
            .find(|t| t.name == table)
            .cloned()
            .unwrap_or(DiscoveredTable {
                schema: schema.into(),
                name: table.into(),
                columns: vec![],
                comment: None,
            }))
    }

    async fn describe_schema(&self, schema: &str) -> Result<SchemaInfo, SourceError> {
        Ok(SchemaInfo {
            catalog: "shop".into(),
            name: schema.into(),
            comment: "Order history".into(),
        })
    }

    async fn list_tables(&self, _schema: &str) -> Result<Vec<DiscoveredTable>, SourceError> {
        Ok(self.tables.clone())
    }

    async fn read_table(
        &self,
        _table: &TableSchema,
        _chunk_size: usize,
        tx: mpsc::Sender<Vec<RawRow>>,
    ) -> Result<u64, SourceError> {
        tx.send(self.rows.clone()).await.ok();
        Ok(self.rows.len() as u64)
    }

    async fn close(&self) {}
}

/// Hands out clones of one fake source and counts how often it was opened.
struct FakeSources {
    source: FakeSource,
    opened: AtomicUsize,
}

#[async_trait]
impl SourceFactory for FakeSources {
    async fn open(
        &self,
        _source: &SourceDescriptor,
        _secrets: &dyn SecretStore,
        _settings: &Settings,
    ) -> Result<Box<dyn SourceReader>, LakeportError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(self.source.clone()))
    }
}

// ── Helpers ─────────────────────────────────────────────────────────────────

fn orders_source(reachable: bool) -> FakeSource {
    let mut comment = DiscoveredColumn::new("note", "text");
    comment.comment = Some("Free text".into());
    FakeSource {
        tables: vec![
            DiscoveredTable {
                schema: "sales".into(),
                name: "orders".into(),
                columns: vec![
                    DiscoveredColumn::new("id", "integer"),
                    DiscoveredColumn::new("total", "numeric(10,2)"),
                    comment,
                ],
                comment: Some("Customer orders".into()),
            },
            DiscoveredTable {
                schema: "sales".into(),
                name: "refunds".into(),
                columns: vec![DiscoveredColumn::new("id", "integer")],
                comment: None,
            },
        ],
        rows: vec![
            vec![Some("1".into()), Some("9.99".into())],
            vec![Some("2".into()), None],
        ],
        reachable,
    }
}

struct Harness {
    _root: TempDir,
    mount: std::path::PathBuf,
    work: std::path::PathBuf,
    service: Service,
    sources: Arc<FakeSources>,
}

fn harness(reachable: bool) -> Harness {
    let root = TempDir::new().unwrap();
    let mount = root.path().join("lsc");
    std::fs::create_dir_all(mount.join("staging")).unwrap();
    std::fs::create_dir_all(mount.join("production")).unwrap();
    let work = root.path().join("work");

    let mut settings = Settings::default();
    settings.working_dir = work.clone();
    settings.storage.mounts.insert("lsc".into(), mount.clone());

    let sources = Arc::new(FakeSources {
        source: orders_source(reachable),
        opened: AtomicUsize::new(0),
    });
    let service = Service::new(settings, Arc::new(InMemorySecretStore::new()))
        .with_sources(sources.clone());
    Harness {
        _root: root,
        mount,
        work,
        service,
        sources,
    }
}

fn source_json() -> serde_json::Value {
    serde_json::json!({
        "type": "postgresql",
        "host_url": "db.internal",
        "database": "shop",
        "port": 5432,
        "credentials": {"username_key": "pg-user", "password_key": "pg-pass"}
    })
}

fn retrieve_request(format: &str, columns: &[&str]) -> RetrieveRequest {
    let columns: Vec<_> = columns.iter().map(|c| serde_json::json!({"name": c})).collect();
    serde_json::from_value(serde_json::json!({
        "project_name": "acme",
        "project_start_time": "20250101_120000",
        "source": source_json(),
        "destination": {"type": "filestore", "name": "LSC", "format": format},
        "metadata": {
            "schema_name": "sales",
            "tables": [{"name": "orders", "columns": columns}]
        }
    }))
    .unwrap()
}

fn publish_request() -> PublishRequest {
    serde_json::from_value(serde_json::json!({
        "project_name": "acme",
        "project_start_time": "20250101_120000",
        "destination": {"type": "filestore", "name": "LSC", "format": "csv"}
    }))
    .unwrap()
}

fn run_dir(container: &Path) -> std::path::PathBuf {
    container.join("acme").join("20250101_120000").join("data").join("outputs")
}

fn is_empty_dir(path: &Path) -> bool {
    std::fs::read_dir(path).map(|mut d| d.next().is_none()).unwrap_or(true)
}

// ── Retrieve + publish ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_retrieve_then_publish_csv() {
    let h = harness(true);

    let retrieved = h
        .service
        .retrieve_data(&retrieve_request("csv", &["id", "total"]))
        .await
        .unwrap();
    assert_eq!(
        retrieved.data_retrieved,
        vec![RetrievedRecord::File {
            file_path: "orders.csv".into()
        }]
    );

    let staged = run_dir(&h.mount.join("staging")).join("orders.csv");
    assert_eq!(std::fs::read_to_string(&staged).unwrap(), "id,total\n1,9.99\n2,\n");
    assert!(is_empty_dir(&h.work), "run working directories are removed");

    let published = h.service.publish_data(&publish_request()).await.unwrap();
    assert_eq!(published.data_published.len(), 1);
    let PublishedRecord::File(entry) = &published.data_published[0] else {
        panic!("expected a manifest entry, got {:?}", published.data_published[0]);
    };
    assert_eq!(entry.file_path, "data/outputs/orders.csv");
    assert_eq!(entry.total_bytes, "id,total\n1,9.99\n2,\n".len() as u64);
    assert_eq!(entry.hash_value.len(), 128);

    let promoted = run_dir(&h.mount.join("production")).join("orders.csv");
    assert!(promoted.exists());
    assert!(!h.mount.join("staging").join("acme").join("20250101_120000").exists());
}

#[tokio::test]
async fn test_retrieve_then_publish_duckdb() {
    let h = harness(true);

    let retrieved = h
        .service
        .retrieve_data(&retrieve_request("duckdb", &["id", "total"]))
        .await
        .unwrap();
    assert_eq!(
        retrieved.data_retrieved,
        vec![RetrievedRecord::File {
            file_path: "database.duckdb".into()
        }]
    );

    let published = h.service.publish_data(&publish_request()).await.unwrap();
    let paths: Vec<_> = published
        .data_published
        .iter()
        .filter_map(|r| match r {
            PublishedRecord::File(entry) => Some(entry.file_path.as_str()),
            PublishedRecord::Grant(_) => None,
        })
        .collect();
    assert_eq!(paths, vec!["data/outputs/database.duckdb"]);
}

#[tokio::test]
async fn test_retry_clears_previous_staging() {
    let h = harness(true);
    let staging = run_dir(&h.mount.join("staging"));
    std::fs::create_dir_all(&staging).unwrap();
    std::fs::write(staging.join("stale.csv"), "old").unwrap();

    h.service
        .retrieve_data(&retrieve_request("csv", &["id", "total"]))
        .await
        .unwrap();

    assert!(!staging.join("stale.csv").exists());
    assert!(staging.join("orders.csv").exists());
}

#[tokio::test]
async fn test_retrieve_missing_column_fails_at_introspect() {
    let h = harness(true);
    let err = h
        .service
        .retrieve_data(&retrieve_request("csv", &["id", "discount"]))
        .await
        .unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Introspect));
    assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
    assert!(err.to_string().contains("discount"));
    assert!(is_empty_dir(&h.work));
    assert!(is_empty_dir(&run_dir(&h.mount.join("staging"))));
}

#[tokio::test]
async fn test_publish_without_staged_files() {
    let h = harness(true);
    let err = h.service.publish_data(&publish_request()).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Promote));
    assert!(matches!(
        err,
        LakeportError::Stage { ref source, .. }
            if matches!(**source, LakeportError::Promotion(PromotionError::NothingToPublish))
    ));
}

#[tokio::test]
async fn test_retrieve_rejects_invalid_project() {
    let h = harness(true);
    let mut request = retrieve_request("csv", &["id"]);
    request.project = ProjectRef::new("acme corp", "20250101_120000");
    let err = h.service.retrieve_data(&request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidRequest);
    assert_eq!(h.sources.opened.load(Ordering::SeqCst), 0);
}

// ── Validation and metadata ─────────────────────────────────────────────────

fn validate_request() -> ValidateRequest {
    serde_json::from_value(serde_json::json!({
        "project_name": "acme",
        "project_start_time": "20250101_120000",
        "source": source_json(),
        "destination": {"type": "filestore", "name": "lsc", "format": "csv"}
    }))
    .unwrap()
}

#[tokio::test]
async fn test_validate_success() {
    let h = harness(true);
    let report = h.service.validate(&validate_request()).await.unwrap();
    assert_eq!(report.validation_status, "success");
}

#[tokio::test]
async fn test_validate_unreachable_source() {
    let h = harness(false);
    let err = h.service.validate(&validate_request()).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Validate));
    assert_eq!(err.kind(), ErrorKind::Transport);
}

#[tokio::test]
async fn test_validate_missing_production_container() {
    let h = harness(true);
    std::fs::remove_dir_all(h.mount.join("production")).unwrap();
    let err = h.service.validate(&validate_request()).await.unwrap_err();
    assert_eq!(err.stage(), Some(Stage::Validate));
    assert_eq!(err.kind(), ErrorKind::PromotionIntegrity);
}

#[tokio::test]
async fn test_extract_metadata_honors_table_filter() {
    let h = harness(true);
    let mut source = source_json();
    source["table"] = serde_json::json!(["orders"]);
    let request: MetadataRequest = serde_json::from_value(serde_json::json!({
        "source": source,
        "schema_name": "sales"
    }))
    .unwrap();

    let metadata = h.service.extract_metadata(&request).await.unwrap();
    assert_eq!(metadata.name, "default_name");
    assert_eq!(metadata.catalog, "shop");
    assert_eq!(metadata.description, "Order history");
    assert_eq!(metadata.table_schema, "sales");
    assert_eq!(metadata.tables.len(), 1);

    let orders = &metadata.tables[0];
    assert_eq!(orders.name, "orders");
    assert_eq!(orders.description, "Customer orders");
    let columns: Vec<_> = orders
        .columns
        .iter()
        .map(|c| (c.name.as_str(), c.datatype.as_str(), c.description.as_str()))
        .collect();
    assert_eq!(
        columns,
        vec![
            ("id", "integer", ""),
            ("total", "numeric(10,2)", ""),
            ("note", "text", "Free text"),
        ]
    );
}

// ── Provisioning ────────────────────────────────────────────────────────────

fn warehouse_settings() -> Settings {
    let mut settings = Settings::default();
    settings.warehouse.host = Some("warehouse.internal".into());
    settings.warehouse.database = Some("tre".into());
    settings.warehouse.readonly_username = Some("reader".into());
    settings.warehouse.readonly_password = Some("reader-pass".into());
    settings
}

fn listed_tables() -> Vec<WarehouseTable> {
    let table = |schema: &str, name: &str| WarehouseTable {
        schema: schema.into(),
        name: name.into(),
    };
    vec![
        table("acme_20250101_120000_sales", "orders"),
        table("acme_20250101_120000_sales", "refunds"),
        table("acme_20250101_120000_sales", "_lakeport_loads"),
        table("acme_20240101_000000_sales", "orders"),
        table("globex_20250101_120000_sales", "orders"),
    ]
}

#[tokio::test]
async fn test_provisioning_is_idempotent() {
    let settings = warehouse_settings();
    let project = ProjectRef::new("acme", "20250101_120000");
    let tables = project_tables(listed_tables(), &project);
    assert_eq!(tables.len(), 2);

    let governance = InMemoryGovernance::new();
    let grants = provision_access(
        &governance,
        &settings.governance,
        &settings.warehouse,
        "acme",
        &tables,
    )
    .await
    .unwrap();

    let resources: Vec<_> = grants.iter().map(|g| g.opal_resource_name.as_str()).collect();
    assert_eq!(
        resources,
        vec![
            "tre_postgresql_acme_20250101_120000_sales_orders",
            "tre_postgresql_acme_20250101_120000_sales_refunds",
        ]
    );
    assert!(grants.iter().all(|g| g.opal_group_name == "acme_group"));
    assert_eq!(grants[0].postgresql_table_name, "acme_20250101_120000_sales.orders");
    assert_eq!(governance.resources("acme").len(), 2);

    let created = governance.created_count();
    let again = provision_access(
        &governance,
        &settings.governance,
        &settings.warehouse,
        "acme",
        &tables,
    )
    .await
    .unwrap();
    assert_eq!(again, grants);
    assert_eq!(governance.created_count(), created);
}

#[tokio::test]
async fn test_provisioning_records_connection_parameters() {
    let settings = warehouse_settings();
    let project = ProjectRef::new("acme", "20250101_120000");
    let tables = project_tables(listed_tables(), &project);
    let governance = InMemoryGovernance::new();
    provision_access(
        &governance,
        &settings.governance,
        &settings.warehouse,
        "acme",
        &tables,
    )
    .await
    .unwrap();

    let resource = &governance.resources("acme")[0];
    assert_eq!(resource.provider, "resourcer");
    assert_eq!(resource.factory, "sql");
    let parameters: serde_json::Value = serde_json::from_str(&resource.parameters).unwrap();
    assert_eq!(parameters["host"], "warehouse.internal");
    assert_eq!(parameters["port"], "5432");
    assert_eq!(parameters["schema"], "acme_20250101_120000_sales");
    let credentials: serde_json::Value = serde_json::from_str(&resource.credentials).unwrap();
    assert_eq!(credentials["username"], "reader");
}
