//! # Lakeport Core
//!
//! Data-movement pipeline that extracts tables from lakehouse and SQL sources,
//! maps native column types onto one logical type system, stages rows as CSV
//! files, an embedded DuckDB database or warehouse tables, promotes staged
//! files to production with a SHA-512 manifest and provisions governed read
//! access to warehouse tables.

pub mod config;
pub mod connection;
pub mod destination;
pub mod error;
pub mod governance;
pub mod http;
pub mod journal;
pub mod normalize;
pub mod oauth;
pub mod paths;
pub mod pipeline;
pub mod promote;
pub mod request;
pub mod schema;
pub mod secrets;
pub mod service;
pub mod source;
pub mod typemap;
pub mod types;

// Re-export commonly used types at the crate root.
pub use config::{Settings, load_settings};
pub use destination::{DestinationSink, StagedArtifact};
pub use error::{ErrorKind, LakeportError, Result, Stage};
pub use governance::{AccessGrant, GovernanceApi, InMemoryGovernance, OpalClient};
pub use pipeline::{PipelineRun, RunState};
pub use promote::ManifestEntry;
pub use request::{
    DataPublished, DataRetrieved, DatasetMetadata, Envelope, MetadataRequest, PublishRequest,
    RetrieveRequest, ValidateRequest, ValidationReport,
};
pub use secrets::{DirectorySecretStore, InMemorySecretStore, SecretStore};
pub use service::{LiveSources, Service, SourceFactory};
pub use source::{RawRow, SourceReader};
pub use types::{LogicalType, Value};
