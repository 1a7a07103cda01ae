//! Typed entry points wiring sources, the pipeline, destinations, promotion
//! and provisioning together for one request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::OwnedMutexGuard;
use tracing::{Instrument, info, info_span, warn};

use crate::config::Settings;
use crate::connection;
use crate::destination::DestinationSink;
use crate::destination::csv::CsvSink;
use crate::destination::duckdb::DuckDbSink;
use crate::destination::postgres::{self, PostgresSink};
use crate::error::{LakeportError, PipelineError, Stage};
use crate::governance::{self, GovernanceApi, OpalClient};
use crate::http;
use crate::paths::TargetPaths;
use crate::pipeline::{Endpoints, PipelineRun};
use crate::promote;
use crate::request::{
    ColumnMetadata, DataPublished, DataRetrieved, DatasetMetadata, DestinationDescriptor,
    FileFormat, MetadataRequest, ProjectRef, PublishRequest, PublishedRecord, RetrieveRequest,
    RetrievedRecord, SourceDescriptor, TableMetadata, ValidateRequest, ValidationReport,
};
use crate::secrets::{DirectorySecretStore, SecretStore};
use crate::source::{self, SourceReader};

// ── Source opening ──────────────────────────────────────────────────────────

/// Opens a reader for a source descriptor.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    async fn open(
        &self,
        source: &SourceDescriptor,
        secrets: &dyn SecretStore,
        settings: &Settings,
    ) -> Result<Box<dyn SourceReader>, LakeportError>;
}

/// Resolves credentials and connects to the real source system.
pub struct LiveSources;

#[async_trait]
impl SourceFactory for LiveSources {
    async fn open(
        &self,
        source: &SourceDescriptor,
        secrets: &dyn SecretStore,
        settings: &Settings,
    ) -> Result<Box<dyn SourceReader>, LakeportError> {
        let client = http::build_client(settings.pipeline.http_timeout_secs, false)?;
        let resolved = connection::resolve_source(source, secrets, &client).await?;
        Ok(source::open(resolved, client, &settings.pipeline).await?)
    }
}

// ── Run locks ───────────────────────────────────────────────────────────────

/// Serializes runs that share a staging/production path within one process.
#[derive(Debug, Default)]
pub struct RunLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RunLocks {
    pub async fn acquire(&self, destination: &DestinationDescriptor, project: &ProjectRef) -> RunGuard<'_> {
        let key = format!("{}/{}", destination.lock_name(), project.run_key());
        let lock = self.table().entry(key.clone()).or_default().clone();
        RunGuard {
            owner: self,
            key,
            guard: Some(lock.lock_owned().await),
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<tokio::sync::Mutex<()>>>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Keys with a holder or a waiter.
    pub fn active(&self) -> usize {
        self.table().len()
    }
}

/// Held for the duration of a run; the key is forgotten once nobody holds
/// or waits on it.
pub struct RunGuard<'a> {
    owner: &'a RunLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.owner.table();
        if locks.get(&self.key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.key);
        }
    }
}

// ── Service ─────────────────────────────────────────────────────────────────

pub struct Service {
    settings: Arc<Settings>,
    secrets: Arc<dyn SecretStore>,
    sources: Arc<dyn SourceFactory>,
    governance: Option<Arc<dyn GovernanceApi>>,
    locks: RunLocks,
}

impl Service {
    pub fn new(settings: Settings, secrets: Arc<dyn SecretStore>) -> Self {
        Self {
            settings: Arc::new(settings),
            secrets,
            sources: Arc::new(LiveSources),
            governance: None,
            locks: RunLocks::default(),
        }
    }

    /// Service reading secrets from the configured secrets directory.
    pub fn from_settings(settings: Settings) -> Self {
        let secrets = Arc::new(DirectorySecretStore::new(settings.secrets_dir.clone()));
        Self::new(settings, secrets)
    }

    pub fn with_sources(mut self, sources: Arc<dyn SourceFactory>) -> Self {
        self.sources = sources;
        self
    }

    /// Use `api` instead of an Opal client built from settings.
    pub fn with_governance(mut self, api: Arc<dyn GovernanceApi>) -> Self {
        self.governance = Some(api);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn governance_api(&self) -> Result<Arc<dyn GovernanceApi>, LakeportError> {
        match &self.governance {
            Some(api) => Ok(api.clone()),
            None => Ok(Arc::new(OpalClient::from_config(
                &self.settings.governance,
                self.secrets.as_ref(),
                self.settings.pipeline.http_timeout_secs,
            )?)),
        }
    }

    /// Extract the selected dataset into the destination.
    pub async fn retrieve_data(&self, request: &RetrieveRequest) -> Result<DataRetrieved, LakeportError> {
        request.validate()?;
        let _lock = self.locks.acquire(&request.destination, &request.project).await;

        let span = info_span!(
            "retrieve",
            project = %request.project.project_name,
            start = %request.project.project_start_time,
            source = request.source.kind(),
            destination = request.destination.kind(),
        );
        self.retrieve_inner(request).instrument(span).await
    }

    async fn retrieve_inner(&self, request: &RetrieveRequest) -> Result<DataRetrieved, LakeportError> {
        let settings = &self.settings;
        let mut run = PipelineRun::create(
            &settings.working_dir,
            &request.project,
            request.destination.kind(),
            &settings.pipeline,
        )?;
        let run_id = run.run_id().to_string();

        let connect = async {
            let sink: Arc<dyn DestinationSink> = match &request.destination {
                DestinationDescriptor::Filestore(fs) => {
                    let paths = TargetPaths::resolve(&settings.storage, &fs.name, &request.project)?;
                    let staging = paths.reset_staging()?;
                    match fs.format {
                        FileFormat::Csv => Arc::new(CsvSink::new(staging)),
                        FileFormat::Duckdb => Arc::new(DuckDbSink::open(
                            &staging,
                            &request.metadata.schema_name,
                        )?),
                    }
                }
                DestinationDescriptor::Postgresql(_) => {
                    let pool = postgres::connect(
                        &settings.warehouse,
                        settings.pipeline.load_workers as u32,
                    )
                    .await?;
                    let dataset = postgres::dataset_name(&request.project, &request.metadata.schema_name);
                    Arc::new(PostgresSink::new(pool, dataset, run_id.clone()))
                }
            };
            let reader = self
                .sources
                .open(&request.source, self.secrets.as_ref(), settings)
                .await?;
            Ok::<_, LakeportError>(Endpoints { reader, sink })
        };

        let result = run.execute(connect, &request.metadata).await;
        let cleanup = run.cleanup().await;
        let artifacts = match (result, cleanup) {
            (Ok(artifacts), Ok(())) => artifacts,
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), cleanup) => {
                if let Err(cleanup_err) = cleanup {
                    warn!(error = %cleanup_err, "Cleanup after failed run also failed");
                }
                return Err(e);
            }
        };

        let data_retrieved = artifacts
            .into_iter()
            .filter_map(|a| match (a.path, a.table_id) {
                (Some(file_path), _) => Some(RetrievedRecord::File { file_path }),
                (None, Some(table_name)) => Some(RetrievedRecord::Table { table_name }),
                (None, None) => None,
            })
            .collect::<Vec<_>>();
        info!(artifacts = data_retrieved.len(), "Retrieval finished");
        Ok(DataRetrieved { data_retrieved })
    }

    /// Promote staged files to production, or provision warehouse access.
    pub async fn publish_data(&self, request: &PublishRequest) -> Result<DataPublished, LakeportError> {
        request.validate()?;
        let _lock = self.locks.acquire(&request.destination, &request.project).await;

        let span = info_span!(
            "publish",
            project = %request.project.project_name,
            start = %request.project.project_start_time,
            destination = request.destination.kind(),
        );
        self.publish_inner(request).instrument(span).await
    }

    async fn publish_inner(&self, request: &PublishRequest) -> Result<DataPublished, LakeportError> {
        let data_published = match &request.destination {
            DestinationDescriptor::Filestore(fs) => {
                let paths = TargetPaths::resolve(&self.settings.storage, &fs.name, &request.project)
                    .map_err(|e| LakeportError::from(e).at(Stage::Promote))?;
                info!(staging = %paths.staging_dir().display(), "Publishing staged files");
                let entries = tokio::task::spawn_blocking(move || promote::promote(&paths))
                    .await
                    .map_err(|e| {
                        LakeportError::from(PipelineError::Worker {
                            message: e.to_string(),
                        })
                        .at(Stage::Promote)
                    })?
                    .map_err(|e| LakeportError::from(e).at(Stage::Promote))?;
                entries.into_iter().map(PublishedRecord::File).collect()
            }
            DestinationDescriptor::Postgresql(_) => {
                let pool = postgres::connect(&self.settings.warehouse, 1)
                    .await
                    .map_err(|e| e.at(Stage::Connect))?;
                let listed = postgres::list_tables(&pool).await;
                pool.close().await;
                let tables = postgres::project_tables(
                    listed.map_err(|e| LakeportError::from(e).at(Stage::Collect))?,
                    &request.project,
                );
                info!(tables = tables.len(), "Provisioning access to warehouse tables");

                let api = self.governance_api().map_err(|e| e.at(Stage::Provision))?;
                let grants = governance::provision_access(
                    api.as_ref(),
                    &self.settings.governance,
                    &self.settings.warehouse,
                    &request.project.project_name,
                    &tables,
                )
                .await
                .map_err(|e| e.at(Stage::Provision))?;
                grants.into_iter().map(PublishedRecord::Grant).collect()
            }
        };
        Ok(DataPublished { data_published })
    }

    /// Check that the destination is usable and the source is reachable.
    pub async fn validate(&self, request: &ValidateRequest) -> Result<ValidationReport, LakeportError> {
        request.validate()?;
        let span = info_span!(
            "validate",
            project = %request.project.project_name,
            source = request.source.kind(),
            destination = request.destination.kind(),
        );
        async {
            match &request.destination {
                DestinationDescriptor::Filestore(fs) => {
                    let paths = TargetPaths::resolve(&self.settings.storage, &fs.name, &request.project)?;
                    paths.ensure_containers()?;
                }
                DestinationDescriptor::Postgresql(_) => {
                    let pool = postgres::connect(&self.settings.warehouse, 1).await?;
                    pool.close().await;
                }
            }

            let reader = self
                .sources
                .open(&request.source, self.secrets.as_ref(), &self.settings)
                .await?;
            let pinged = reader.ping().await;
            reader.close().await;
            pinged?;

            info!("Validation succeeded");
            Ok::<_, LakeportError>(ValidationReport {
                validation_status: "success".into(),
            })
        }
        .instrument(span)
        .await
        .map_err(|e| e.at(Stage::Validate))
    }

    /// Describe the tables of one schema, honoring the source's table filter.
    pub async fn extract_metadata(&self, request: &MetadataRequest) -> Result<DatasetMetadata, LakeportError> {
        request.validate()?;
        let span = info_span!("metadata", source = request.source.kind(), schema = %request.schema_name);
        async {
            let reader = self
                .sources
                .open(&request.source, self.secrets.as_ref(), &self.settings)
                .await
                .map_err(|e| e.at(Stage::Connect))?;
            let described = describe(reader.as_ref(), request).await;
            reader.close().await;
            described.map_err(|e| e.at(Stage::Introspect))
        }
        .instrument(span)
        .await
    }
}

async fn describe(
    reader: &dyn SourceReader,
    request: &MetadataRequest,
) -> Result<DatasetMetadata, LakeportError> {
    let info = reader.describe_schema(&request.schema_name).await?;
    let mut tables = reader.list_tables(&request.schema_name).await?;
    if let Some(filter) = request.source.table_filter() {
        tables.retain(|t| filter.iter().any(|f| f == &t.name));
    }

    let catalog = match (&request.source, info.catalog.is_empty()) {
        (SourceDescriptor::Lakehouse(lakehouse), true) => lakehouse.catalog.clone(),
        _ => info.catalog,
    };
    Ok(DatasetMetadata {
        name: "default_name".into(),
        description: info.comment,
        catalog,
        table_schema: request.schema_name.clone(),
        tables: tables
            .into_iter()
            .map(|t| TableMetadata {
                name: t.name,
                description: t.comment.unwrap_or_default(),
                columns: t
                    .columns
                    .into_iter()
                    .map(|c| ColumnMetadata {
                        name: c.name,
                        description: c.comment.unwrap_or_default(),
                        datatype: c.type_text.unwrap_or(c.native_type),
                    })
                    .collect(),
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{FilestoreDestination, SqlCredentials, SqlSource};

    fn project() -> ProjectRef {
        ProjectRef::new("acme", "20250101_120000")
    }

    #[tokio::test]
    async fn test_run_locks_serialize_same_key() {
        let locks = Arc::new(RunLocks::default());
        let destination = DestinationDescriptor::Filestore(FilestoreDestination {
            name: "LSC".into(),
            format: FileFormat::Csv,
        });

        let guard = locks.acquire(&destination, &project()).await;
        let contender = {
            let locks = locks.clone();
            let destination = destination.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&destination, &project()).await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!contender.is_finished());
        drop(guard);
        contender.await.unwrap();
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_run_locks_forget_released_keys() {
        let locks = RunLocks::default();
        let destination = DestinationDescriptor::Filestore(FilestoreDestination {
            name: "LSC".into(),
            format: FileFormat::Csv,
        });
        for day in 1..=5 {
            let run = ProjectRef::new("acme", format!("2025010{day}_120000"));
            let _guard = locks.acquire(&destination, &run).await;
            assert_eq!(locks.active(), 1);
        }
        assert_eq!(locks.active(), 0);

        let first = locks.acquire(&destination, &project()).await;
        let second = locks.acquire(&destination, &ProjectRef::new("beta", "20250101_120000")).await;
        assert_eq!(locks.active(), 2);
        drop(first);
        assert_eq!(locks.active(), 1);
        drop(second);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_run_locks_allow_different_keys() {
        let locks = RunLocks::default();
        let destination = DestinationDescriptor::Filestore(FilestoreDestination {
            name: "lsc".into(),
            format: FileFormat::Duckdb,
        });
        let _first = locks.acquire(&destination, &project()).await;
        let other = ProjectRef::new("acme", "20250102_120000");
        let _second = locks.acquire(&destination, &other).await;
    }

    #[tokio::test]
    async fn test_validate_rejects_bad_start_time() {
        let service = Service::new(Settings::default(), Arc::new(crate::secrets::InMemorySecretStore::new()));
        let request = ValidateRequest {
            project: ProjectRef::new("acme", "2025-01-01"),
            source: SourceDescriptor::Postgres(SqlSource {
                host_url: "db".into(),
                database: "shop".into(),
                port: 5432,
                credentials: SqlCredentials {
                    provider: None,
                    username_key: "u".into(),
                    password_key: "p".into(),
                },
                table: None,
            }),
            destination: DestinationDescriptor::Filestore(FilestoreDestination {
                name: "lsc".into(),
                format: FileFormat::Csv,
            }),
        };
        let err = service.validate(&request).await.unwrap_err();
        assert!(matches!(err, LakeportError::Request(_)));
    }
}
