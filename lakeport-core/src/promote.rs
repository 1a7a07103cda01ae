//! Staging to production promotion for file destinations.
//!
//! Files matching the publish patterns are moved from the run's staging
//! directory into production, preserving relative paths. The manifest is then
//! computed over everything in the production directory, and staging is
//! removed. A run with nothing staged is an error and leaves production as it
//! was.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::PromotionError;
use crate::paths::{OUTPUTS_DIR, TargetPaths};

/// File patterns that are published; anything else in staging stays behind.
pub const PUBLISH_PATTERNS: [&str; 2] = ["*.csv", "*.duckdb"];

/// One published file in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the bag root, e.g. `data/outputs/orders.csv`.
    pub file_path: String,
    /// SHA-512 hex digest.
    pub hash_value: String,
    pub total_bytes: u64,
}

fn publish_globs() -> Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in PUBLISH_PATTERNS {
        builder.add(Glob::new(pattern)?);
    }
    builder.build()
}

/// Publishable files under `root`, relative to it, in a stable order.
///
/// A missing `root` yields no files.
pub fn collect_files(root: &Path) -> Result<Vec<PathBuf>, PromotionError> {
    let globs = publish_globs().map_err(|e| PromotionError::Hash {
        path: root.to_path_buf(),
        message: e.to_string(),
    })?;
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| PromotionError::Hash {
            path: root.to_path_buf(),
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        if globs.is_match(relative) {
            files.push(relative.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}

/// Streaming SHA-512 of a file, returned with its size in bytes.
pub fn sha512_file(path: &Path) -> io::Result<(String, u64)> {
    let mut reader = BufReader::new(File::open(path)?);
    let mut hasher = Sha512::new();
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), total))
}

/// Forward-slash rendering of a relative path.
pub fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) => {
            // Staging and production may sit on different filesystems.
            warn!(from = %from.display(), error = %e, "Rename failed, copying instead");
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}

/// Manifest of every publishable file under `dir`.
pub fn manifest(dir: &Path) -> Result<Vec<ManifestEntry>, PromotionError> {
    collect_files(dir)?
        .into_iter()
        .map(|relative| {
            let path = dir.join(&relative);
            let (hash_value, total_bytes) =
                sha512_file(&path).map_err(|e| PromotionError::Hash {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
            Ok(ManifestEntry {
                file_path: format!("{OUTPUTS_DIR}{}", slash_path(&relative)),
                hash_value,
                total_bytes,
            })
        })
        .collect()
}

/// Move staged files into production and return the production manifest.
pub fn promote(paths: &TargetPaths) -> Result<Vec<ManifestEntry>, PromotionError> {
    paths.ensure_containers()?;
    let staging = paths.staging_dir();
    let production = paths.production_dir();

    let files = collect_files(&staging)?;
    if files.is_empty() {
        return Err(PromotionError::NothingToPublish);
    }

    std::fs::create_dir_all(&production).map_err(|e| PromotionError::Move {
        from: staging.clone(),
        to: production.clone(),
        message: e.to_string(),
    })?;

    for relative in &files {
        let from = staging.join(relative);
        let to = production.join(relative);
        info!(file = %relative.display(), "Moving file to production");
        move_file(&from, &to).map_err(|e| PromotionError::Move {
            from: from.clone(),
            to: to.clone(),
            message: e.to_string(),
        })?;
    }

    let entries = manifest(&production)?;

    if staging.exists() {
        info!(path = %staging.display(), "Removing staging directory");
        std::fs::remove_dir_all(&staging).map_err(|e| PromotionError::Cleanup {
            path: staging.clone(),
            message: e.to_string(),
        })?;
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::ProjectRef;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn layout(dir: &TempDir) -> TargetPaths {
        let paths = TargetPaths::under(
            dir.path().to_path_buf(),
            &ProjectRef::new("acme", "20250101_120000"),
        );
        std::fs::create_dir_all(&paths.staging_container).unwrap();
        std::fs::create_dir_all(&paths.production_container).unwrap();
        paths
    }

    #[test]
    fn test_sha512_known_digest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("abc.csv");
        std::fs::write(&path, "abc").unwrap();
        let (hash, bytes) = sha512_file(&path).unwrap();
        assert_eq!(bytes, 3);
        assert_eq!(
            hash,
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
             2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f"
        );
    }

    #[test]
    fn test_collect_files_filters_patterns() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("nested")).unwrap();
        std::fs::write(dir.path().join("b.csv"), "1").unwrap();
        std::fs::write(dir.path().join("database.duckdb"), "2").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "3").unwrap();
        std::fs::write(dir.path().join("nested").join("a.csv"), "4").unwrap();

        let files = collect_files(dir.path()).unwrap();
        assert_eq!(
            files,
            vec![
                PathBuf::from("b.csv"),
                PathBuf::from("database.duckdb"),
                PathBuf::from("nested").join("a.csv"),
            ]
        );
        assert!(collect_files(&dir.path().join("missing")).unwrap().is_empty());
    }

    #[test]
    fn test_promote_moves_and_hashes() {
        let dir = TempDir::new().unwrap();
        let paths = layout(&dir);
        let staging = paths.reset_staging().unwrap();
        std::fs::write(staging.join("orders.csv"), "id\n1\n").unwrap();
        std::fs::write(staging.join("orders.1.csv"), "id\n2\n").unwrap();

        let entries = promote(&paths).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.file_path.as_str()).collect();
        assert_eq!(
            names,
            vec!["data/outputs/orders.1.csv", "data/outputs/orders.csv"]
        );
        assert!(entries.iter().all(|e| e.total_bytes == 5));
        assert!(entries.iter().all(|e| e.hash_value.len() == 128));
        assert!(paths.production_dir().join("orders.csv").exists());
        assert!(!paths.staging_dir().exists());
    }

    #[test]
    fn test_promote_mirrors_nested_staging_tree() {
        let dir = TempDir::new().unwrap();
        let paths = layout(&dir);
        let staging = paths.reset_staging().unwrap();
        std::fs::create_dir_all(staging.join("sub")).unwrap();
        std::fs::write(staging.join("a.csv"), "id\n1\n").unwrap();
        std::fs::write(staging.join("sub").join("b.csv"), "id\n2\n").unwrap();

        let entries = promote(&paths).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.file_path.as_str()).collect();
        assert_eq!(names, vec!["data/outputs/a.csv", "data/outputs/sub/b.csv"]);
        assert_eq!(
            std::fs::read_to_string(paths.production_dir().join("sub").join("b.csv")).unwrap(),
            "id\n2\n"
        );
        assert!(!paths.staging_dir().exists());
    }

    #[test]
    fn test_manifest_covers_earlier_production_files() {
        let dir = TempDir::new().unwrap();
        let paths = layout(&dir);
        std::fs::create_dir_all(paths.production_dir()).unwrap();
        std::fs::write(paths.production_dir().join("earlier.csv"), "keep").unwrap();
        let staging = paths.reset_staging().unwrap();
        std::fs::write(staging.join("orders.csv"), "id\n1\n").unwrap();

        let entries = promote(&paths).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.file_path.as_str()).collect();
        assert_eq!(names, vec!["data/outputs/earlier.csv", "data/outputs/orders.csv"]);
    }

    #[test]
    fn test_promote_with_nothing_staged_leaves_production_untouched() {
        let dir = TempDir::new().unwrap();
        let paths = layout(&dir);
        std::fs::create_dir_all(paths.production_dir()).unwrap();
        std::fs::write(paths.production_dir().join("earlier.csv"), "keep").unwrap();

        let err = promote(&paths).unwrap_err();
        assert!(matches!(err, PromotionError::NothingToPublish));
        assert_eq!(
            err.to_string(),
            "No files found in Staging. Nothing to publish to Production."
        );
        let remaining = collect_files(&paths.production_dir()).unwrap();
        assert_eq!(remaining, vec![PathBuf::from("earlier.csv")]);
    }

    #[test]
    fn test_promote_requires_containers() {
        let dir = TempDir::new().unwrap();
        let paths = TargetPaths::under(
            dir.path().to_path_buf(),
            &ProjectRef::new("acme", "20250101_120000"),
        );
        assert!(matches!(
            promote(&paths),
            Err(PromotionError::MissingContainer { .. })
        ));
    }
}
