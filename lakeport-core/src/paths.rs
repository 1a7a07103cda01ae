//! Staging and production locations for a project run.
//!
//! Layout under a destination's storage mount:
//! `{mount}/{staging|production}/{project}/{start}/data/outputs/`.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::StorageConfig;
use crate::error::{ConfigError, DestinationError, PromotionError};
use crate::request::ProjectRef;

/// Folder layout inside a run directory that published files live under.
pub const OUTPUTS_DIR: &str = "data/outputs/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetPaths {
    pub mount: PathBuf,
    pub staging_container: PathBuf,
    pub production_container: PathBuf,
    /// `{project}/{start}/data/outputs`, relative to either container.
    pub subpath: PathBuf,
}

impl TargetPaths {
    pub fn resolve(
        storage: &StorageConfig,
        destination: &str,
        project: &ProjectRef,
    ) -> Result<Self, ConfigError> {
        let mount = storage.mount_for(destination)?.to_path_buf();
        Ok(Self::under(mount, project))
    }

    pub fn under(mount: PathBuf, project: &ProjectRef) -> Self {
        let subpath = Path::new(&project.project_name)
            .join(&project.project_start_time)
            .join(OUTPUTS_DIR.trim_end_matches('/'));
        Self {
            staging_container: mount.join("staging"),
            production_container: mount.join("production"),
            mount,
            subpath,
        }
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.staging_container.join(&self.subpath)
    }

    pub fn production_dir(&self) -> PathBuf {
        self.production_container.join(&self.subpath)
    }

    /// Both containers must already exist; they are provisioned outside Lakeport.
    pub fn ensure_containers(&self) -> Result<(), PromotionError> {
        for container in [&self.staging_container, &self.production_container] {
            if !container.is_dir() {
                return Err(PromotionError::MissingContainer {
                    path: container.clone(),
                });
            }
        }
        Ok(())
    }

    /// Empty the run's staging directory so a retry never mixes old and new files.
    pub fn reset_staging(&self) -> Result<PathBuf, DestinationError> {
        let dir = self.staging_dir();
        let staging_error = |e: std::io::Error| DestinationError::Staging {
            path: dir.clone(),
            message: e.to_string(),
        };
        if dir.exists() {
            info!(path = %dir.display(), "Clearing staging directory");
            std::fs::remove_dir_all(&dir).map_err(staging_error)?;
        }
        std::fs::create_dir_all(&dir).map_err(staging_error)?;
        Ok(dir)
    }
}
