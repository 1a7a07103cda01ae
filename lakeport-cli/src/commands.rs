//! CLI subcommand handlers.

use std::path::Path;

use lakeport_core::error::RequestError;
use lakeport_core::{Envelope, LakeportError, Service};
use serde::de::DeserializeOwned;
use tokio::io::AsyncReadExt;

use crate::Commands;

/// Run a subcommand and wrap its outcome in the response envelope.
pub async fn handle_command(service: &Service, command: Commands) -> Envelope {
    let outcome = match command {
        Commands::Retrieve { request } => handle_retrieve(service, &request).await,
        Commands::Publish { request } => handle_publish(service, &request).await,
        Commands::Validate { request } => handle_validate(service, &request).await,
        Commands::Metadata { request } => handle_metadata(service, &request).await,
    };
    outcome.unwrap_or_else(|e| {
        tracing::error!(error = %e, kind = ?e.kind(), "Request failed");
        Envelope::error(&e)
    })
}

async fn handle_retrieve(service: &Service, path: &Path) -> Result<Envelope, LakeportError> {
    let request = read_request(path).await?;
    Envelope::success(&service.retrieve_data(&request).await?)
}

async fn handle_publish(service: &Service, path: &Path) -> Result<Envelope, LakeportError> {
    let request = read_request(path).await?;
    Envelope::success(&service.publish_data(&request).await?)
}

async fn handle_validate(service: &Service, path: &Path) -> Result<Envelope, LakeportError> {
    let request = read_request(path).await?;
    Envelope::success(&service.validate(&request).await?)
}

async fn handle_metadata(service: &Service, path: &Path) -> Result<Envelope, LakeportError> {
    let request = read_request(path).await?;
    Envelope::success(&service.extract_metadata(&request).await?)
}

/// Read and parse a request body from a file, or stdin when the path is `-`.
async fn read_request<T: DeserializeOwned>(path: &Path) -> Result<T, LakeportError> {
    let body = if path == Path::new("-") {
        let mut body = String::new();
        tokio::io::stdin().read_to_string(&mut body).await?;
        body
    } else {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RequestError::Malformed {
                message: format!("cannot read {}: {}", path.display(), e),
            })?
    };
    parse_request(&body)
}

fn parse_request<T: DeserializeOwned>(body: &str) -> Result<T, LakeportError> {
    serde_json::from_str(body).map_err(|e| {
        RequestError::Malformed {
            message: e.to_string(),
        }
        .into()
    })
}
