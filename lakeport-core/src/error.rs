//! Error types for the Lakeport core library.
//!
//! Uses `thiserror` for structured error variants covering configuration,
//! secret resolution, source access, schema projection, normalization,
//! destination writes, promotion and access provisioning. Every pipeline
//! failure is wrapped once with the [`Stage`] it occurred in so that the
//! message surfaced to callers is stage-qualified.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for the Lakeport core library.
#[derive(Debug, thiserror::Error)]
pub enum LakeportError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Secret error: {0}")]
    Secret(#[from] SecretError),

    #[error("Request error: {0}")]
    Request(#[from] RequestError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Normalize error: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("Destination error: {0}")]
    Destination(#[from] DestinationError),

    #[error("Promotion error: {0}")]
    Promotion(#[from] PromotionError),

    #[error("Governance error: {0}")]
    Governance(#[from] GovernanceError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// A failure wrapped with the pipeline stage that produced it.
    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<LakeportError>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors from loading or validating settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load settings: {message}")]
    Load { message: String },

    #[error("Invalid setting '{field}': {message}")]
    Invalid { field: String, message: String },

    #[error("No storage mount configured for destination '{destination}'")]
    MissingMount { destination: String },

    #[error("Warehouse setting '{field}' is not configured")]
    MissingWarehouse { field: String },

    #[error("Governance service is not configured")]
    MissingGovernance,

    #[error("Unsupported {kind}: {value}")]
    Unsupported { kind: String, value: String },
}

/// Errors from the secret store.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("Secret '{name}' not found")]
    NotFound { name: String },

    #[error("Invalid secret name '{name}'")]
    InvalidName { name: String },

    #[error("Failed to read secret '{name}': {message}")]
    Read { name: String, message: String },
}

/// Errors from inbound request validation.
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Malformed request: {message}")]
    Malformed { message: String },
}

/// Errors from talking to a source system.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Authentication against {host} failed: {message}")]
    Auth { host: String, message: String },

    #[error("Upstream API returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Transport failure: {message}")]
    Transport { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Statement {statement_id} ended in state {state}: {message}")]
    Statement {
        statement_id: String,
        state: String,
        message: String,
    },

    #[error("Unexpected response shape: {message}")]
    Decode { message: String },
}

/// Errors from projecting the requested selection onto the discovered schema.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error(
        "Column '{column}' does not exist in the table '{table}'. Available columns: {}",
        available.join(", ")
    )]
    MissingColumn {
        table: String,
        column: String,
        available: Vec<String>,
    },

    #[error("Table '{schema}.{table}' was not found or has no columns")]
    MissingTable { schema: String, table: String },

    #[error("No tables were requested")]
    EmptySelection,
}

/// Errors raised while conforming extracted values to their logical types.
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error(
        "Type mapping gap in '{table}.{column}': native type '{native_type}' \
         does not accept value '{found}'"
    )]
    TypeMappingGap {
        table: String,
        column: String,
        native_type: String,
        found: String,
    },

    #[error("Row in '{table}' has {found} values, expected {expected}")]
    RowWidth {
        table: String,
        expected: usize,
        found: usize,
    },

    #[error("Failed to encode '{table}': {message}")]
    Encode { table: String, message: String },
}

/// Errors from destination sinks.
#[derive(Debug, thiserror::Error)]
pub enum DestinationError {
    #[error("Failed to connect to destination: {message}")]
    Connect { message: String },

    #[error("Write to '{target}' failed: {message}")]
    Write { target: String, message: String },

    #[error("Failed to list loaded tables: {message}")]
    List { message: String },

    #[error("Staging directory {path} could not be reset: {message}")]
    Staging { path: PathBuf, message: String },
}

/// Errors from promoting staged output into production.
#[derive(Debug, thiserror::Error)]
pub enum PromotionError {
    #[error("No files found in Staging. Nothing to publish to Production.")]
    NothingToPublish,

    #[error("Storage container {path} does not exist")]
    MissingContainer { path: PathBuf },

    #[error("Failed to move {from} to {to}: {message}")]
    Move {
        from: PathBuf,
        to: PathBuf,
        message: String,
    },

    #[error("Failed to hash {path}: {message}")]
    Hash { path: PathBuf, message: String },

    #[error("Failed to clean up staging {path}: {message}")]
    Cleanup { path: PathBuf, message: String },
}

/// Errors from the governance (access provisioning) service.
#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    #[error("Opal module failure: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Governance transport failure: {message}")]
    Transport { message: String },
}

/// Errors from the pipeline state machine itself.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Illegal run transition from {from} to {to}")]
    IllegalTransition { from: String, to: String },

    #[error("Worker task failed: {message}")]
    Worker { message: String },
}

/// Pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Connect,
    Introspect,
    Extract,
    Normalize,
    Load,
    Collect,
    Cleanup,
    Promote,
    Provision,
    Validate,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Connect => "connect",
            Stage::Introspect => "introspect",
            Stage::Extract => "extract",
            Stage::Normalize => "normalize",
            Stage::Load => "load",
            Stage::Collect => "collect",
            Stage::Cleanup => "cleanup",
            Stage::Promote => "promote",
            Stage::Provision => "provision",
            Stage::Validate => "validate",
        };
        f.write_str(name)
    }
}

/// Coarse error classification used in the outbound error envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    InvalidRequest,
    UpstreamAuth,
    UpstreamApi,
    Transport,
    SchemaMismatch,
    TypeMappingGap,
    Destination,
    PromotionIntegrity,
    Governance,
    Internal,
}

impl LakeportError {
    /// Wrap this error with the stage it occurred in. Already-staged errors
    /// keep their original stage.
    pub fn at(self, stage: Stage) -> Self {
        match self {
            staged @ LakeportError::Stage { .. } => staged,
            other => LakeportError::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// The stage this error was attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            LakeportError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Classify the error for the outbound envelope.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LakeportError::Stage { source, .. } => source.kind(),
            LakeportError::Config(_) | LakeportError::Secret(_) => ErrorKind::Configuration,
            LakeportError::Request(_) => ErrorKind::InvalidRequest,
            LakeportError::Source(SourceError::Auth { .. }) => ErrorKind::UpstreamAuth,
            LakeportError::Source(SourceError::Upstream { .. })
            | LakeportError::Source(SourceError::Statement { .. })
            | LakeportError::Source(SourceError::Decode { .. }) => ErrorKind::UpstreamApi,
            LakeportError::Source(_) => ErrorKind::Transport,
            LakeportError::Schema(_) => ErrorKind::SchemaMismatch,
            LakeportError::Normalize(_) => ErrorKind::TypeMappingGap,
            LakeportError::Destination(_) => ErrorKind::Destination,
            LakeportError::Promotion(_) => ErrorKind::PromotionIntegrity,
            LakeportError::Governance(_) => ErrorKind::Governance,
            LakeportError::Pipeline(_)
            | LakeportError::Io(_)
            | LakeportError::Serialization(_) => ErrorKind::Internal,
        }
    }
}

/// Convenience type alias for Lakeport results.
pub type Result<T> = std::result::Result<T, LakeportError>;
