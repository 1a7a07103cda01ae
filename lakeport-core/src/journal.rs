//! Run state journal persisted as `state.json` in a run's working directory.
//!
//! Every write goes to a `.tmp` sibling first and is renamed into place, so a
//! reader never sees a partially written journal.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Stage;
use crate::pipeline::RunState;

pub const JOURNAL_FILE: &str = "state.json";

/// Atomically write JSON data to a file, creating parent directories.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(data).map_err(io::Error::other)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)
}

/// Load JSON from a file. Returns `Ok(None)` if it doesn't exist.
pub fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> io::Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = std::fs::read(path)?;
    serde_json::from_slice(&data)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableProgress {
    pub rows_extracted: u64,
    pub load_jobs: usize,
    pub rows_loaded: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub state: RunState,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunJournal {
    pub run_id: String,
    pub project_name: String,
    pub project_start_time: String,
    pub destination: String,
    pub state: RunState,
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub tables: BTreeMap<String, TableProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    path: PathBuf,
}

impl RunJournal {
    pub fn new(
        work_dir: &Path,
        run_id: &str,
        project_name: &str,
        project_start_time: &str,
        destination: &str,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            project_name: project_name.to_string(),
            project_start_time: project_start_time.to_string(),
            destination: destination.to_string(),
            state: RunState::Init,
            transitions: vec![Transition {
                state: RunState::Init,
                at: Utc::now(),
            }],
            tables: BTreeMap::new(),
            failed_stage: None,
            error: None,
            path: work_dir.join(JOURNAL_FILE),
        }
    }

    pub fn load(work_dir: &Path) -> io::Result<Option<Self>> {
        let path = work_dir.join(JOURNAL_FILE);
        Ok(load_json::<Self>(&path)?.map(|mut journal| {
            journal.path = path;
            journal
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&mut self, state: RunState) {
        self.state = state;
        self.transitions.push(Transition {
            state,
            at: Utc::now(),
        });
    }

    pub fn table(&mut self, name: &str) -> &mut TableProgress {
        self.tables.entry(name.to_string()).or_default()
    }

    pub fn save(&self) -> io::Result<()> {
        atomic_write_json(&self.path, self)
    }
}
