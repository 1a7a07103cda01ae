//! Extraction/load pipeline for one run.
//!
//! A [`PipelineRun`] moves through
//! `Init → SourceReady → SchemaReady → Extracting → Normalizing → Loading`
//! and ends in `Completed` or `Failed`. Extraction and load each use their own
//! bounded worker pool; normalization is single-threaded so rows keep their
//! source order within a table. Any failure aborts the whole run with a
//! stage-qualified error. The run's working directory is removed on every
//! terminal path, by [`PipelineRun::cleanup`] or by the drop guard when the
//! run future is abandoned.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::destination::{DestinationSink, StagedArtifact};
use crate::error::{LakeportError, PipelineError, Stage};
use crate::journal::RunJournal;
use crate::normalize::{self, LoadFormat, LoadJob};
use crate::request::{DatasetSelection, ProjectRef};
use crate::schema::{self, DiscoveredTable, ExecutionSchema, TableSchema};
use crate::source::{RawRow, SourceReader};

/// Chunks buffered between a table reader and its spool writer.
const CHUNK_BUFFER: usize = 4;

// ── Run state ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunState {
    Init,
    SourceReady,
    SchemaReady,
    Extracting,
    Normalizing,
    Loading,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    /// Forward by one phase, or to `Failed` from any non-terminal state.
    pub fn can_transition_to(&self, next: RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (current, Failed) => !current.is_terminal(),
            (Init, SourceReady)
            | (SourceReady, SchemaReady)
            | (SchemaReady, Extracting)
            | (Extracting, Normalizing)
            | (Normalizing, Loading)
            | (Loading, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "INIT",
            RunState::SourceReady => "SOURCE_READY",
            RunState::SchemaReady => "SCHEMA_READY",
            RunState::Extracting => "EXTRACTING",
            RunState::Normalizing => "NORMALIZING",
            RunState::Loading => "LOADING",
            RunState::Completed => "COMPLETED",
            RunState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

// ── Working directory guard ─────────────────────────────────────────────────

/// Removes a run's working directory when dropped unless already cleaned.
#[derive(Debug)]
struct WorkDirGuard {
    path: PathBuf,
    armed: bool,
}

impl WorkDirGuard {
    fn create(path: PathBuf) -> std::io::Result<Self> {
        std::fs::create_dir_all(&path)?;
        Ok(Self { path, armed: true })
    }
}

impl Drop for WorkDirGuard {
    fn drop(&mut self) {
        if self.armed && self.path.exists() {
            if let Err(e) = std::fs::remove_dir_all(&self.path) {
                warn!(path = %self.path.display(), error = %e, "Failed to remove run working directory");
            }
        }
    }
}

// ── Run ─────────────────────────────────────────────────────────────────────

/// Opened source reader and destination sink for a run.
pub struct Endpoints {
    pub reader: Box<dyn SourceReader>,
    pub sink: Arc<dyn DestinationSink>,
}

/// One request's unit of work.
pub struct PipelineRun {
    run_id: Uuid,
    config: PipelineConfig,
    guard: WorkDirGuard,
    journal: RunJournal,
}

impl PipelineRun {
    /// Create the run and its working directory under `working_root`.
    pub fn create(
        working_root: &Path,
        project: &ProjectRef,
        destination: &str,
        config: &PipelineConfig,
    ) -> Result<Self, LakeportError> {
        let run_id = Uuid::new_v4();
        let work_dir = working_root.join(format!("{}-{run_id}", project.run_key()));
        let guard = WorkDirGuard::create(work_dir.clone())?;
        let journal = RunJournal::new(
            &work_dir,
            &run_id.to_string(),
            &project.project_name,
            &project.project_start_time,
            destination,
        );
        journal.save()?;
        info!(run_id = %run_id, work_dir = %work_dir.display(), "Created pipeline run");
        Ok(Self {
            run_id,
            config: config.clone(),
            guard,
            journal,
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn state(&self) -> RunState {
        self.journal.state
    }

    pub fn work_dir(&self) -> &Path {
        &self.guard.path
    }

    pub fn journal(&self) -> &RunJournal {
        &self.journal
    }

    /// Move to `next`, rejecting anything but the next phase or `Failed`.
    pub fn transition(&mut self, next: RunState) -> Result<(), LakeportError> {
        let current = self.journal.state;
        if !current.can_transition_to(next) {
            return Err(PipelineError::IllegalTransition {
                from: current.to_string(),
                to: next.to_string(),
            }
            .into());
        }
        debug!(run_id = %self.run_id, from = %current, to = %next, "Run transition");
        self.journal.record(next);
        self.journal.save()?;
        Ok(())
    }

    fn fail(&mut self, error: &LakeportError) {
        if self.journal.state.is_terminal() {
            return;
        }
        self.journal.failed_stage = error.stage();
        self.journal.error = Some(error.to_string());
        self.journal.record(RunState::Failed);
        if let Err(e) = self.journal.save() {
            warn!(run_id = %self.run_id, error = %e, "Failed to persist run journal");
        }
    }

    /// Drive the run to a terminal state.
    ///
    /// `connect` opens the source reader and destination sink; its failure
    /// fails the run before any schema work.
    pub async fn execute<C>(
        &mut self,
        connect: C,
        selection: &DatasetSelection,
    ) -> Result<Vec<StagedArtifact>, LakeportError>
    where
        C: Future<Output = Result<Endpoints, LakeportError>> + Send,
    {
        let result = match connect.await {
            Ok(endpoints) => {
                let reader: Arc<dyn SourceReader> = Arc::from(endpoints.reader);
                let sink = endpoints.sink;
                let result = self.drive(reader.clone(), sink.clone(), selection).await;
                reader.close().await;
                sink.close().await;
                result
            }
            Err(e) => Err(e.at(Stage::Connect)),
        };

        match &result {
            Ok(artifacts) => {
                self.transition(RunState::Completed)?;
                info!(run_id = %self.run_id, artifacts = artifacts.len(), "Run completed");
            }
            Err(e) => {
                warn!(run_id = %self.run_id, error = %e, "Run failed");
                self.fail(e);
            }
        }
        result
    }

    async fn drive(
        &mut self,
        reader: Arc<dyn SourceReader>,
        sink: Arc<dyn DestinationSink>,
        selection: &DatasetSelection,
    ) -> Result<Vec<StagedArtifact>, LakeportError> {
        reader
            .ping()
            .await
            .map_err(|e| LakeportError::from(e).at(Stage::Connect))?;
        self.transition(RunState::SourceReady)?;

        let schema = introspect(reader.as_ref(), selection)
            .await
            .map_err(|e| e.at(Stage::Introspect))?;
        self.transition(RunState::SchemaReady)?;
        info!(run_id = %self.run_id, tables = ?schema.table_names(), "Execution schema ready");

        self.transition(RunState::Extracting)?;
        let spool_dir = self.work_dir().join("extract");
        let extracted = extract(reader, &schema, &spool_dir, &self.config)
            .await
            .map_err(|e| e.at(Stage::Extract))?;
        for (table, rows) in &extracted {
            self.journal.table(table).rows_extracted = *rows;
        }

        self.transition(RunState::Normalizing)?;
        let load_dir = self.work_dir().join("load");
        let jobs = normalize_all(
            schema.clone(),
            spool_dir,
            load_dir,
            sink.load_format(),
            self.config.max_file_bytes,
        )
        .await
        .map_err(|e| e.at(Stage::Normalize))?;
        for job in &jobs {
            self.journal.table(&job.table).load_jobs += 1;
        }

        self.transition(RunState::Loading)?;
        sink.prepare(&schema)
            .await
            .map_err(|e| LakeportError::from(e).at(Stage::Load))?;
        let loaded = load(sink.clone(), &schema, jobs, self.config.load_workers)
            .await
            .map_err(|e| e.at(Stage::Load))?;
        for (table, rows) in &loaded {
            self.journal.table(table).rows_loaded = *rows;
        }
        sink.finalize()
            .await
            .map_err(|e| LakeportError::from(e).at(Stage::Load))
    }

    /// Remove the working directory. Runs on every terminal path.
    pub async fn cleanup(mut self) -> Result<(), LakeportError> {
        let path = self.guard.path.clone();
        self.guard.armed = false;
        if path.exists() {
            tokio::fs::remove_dir_all(&path)
                .await
                .map_err(|e| LakeportError::from(e).at(Stage::Cleanup))?;
        }
        debug!(run_id = %self.run_id, path = %path.display(), "Cleaned up run working directory");
        Ok(())
    }
}

// ── Phases ──────────────────────────────────────────────────────────────────

/// Discover each requested table and project the selection onto it.
pub async fn introspect(
    reader: &dyn SourceReader,
    selection: &DatasetSelection,
) -> Result<ExecutionSchema, LakeportError> {
    let mut discovered: Vec<DiscoveredTable> = Vec::new();
    for name in schema::requested_tables(selection) {
        let table = reader.discover_table(&selection.schema_name, name).await?;
        debug!(table = name, columns = table.columns.len(), "Discovered table");
        discovered.push(table);
    }
    Ok(schema::project(selection, &discovered)?)
}

fn spool_path(dir: &Path, table: &str) -> PathBuf {
    dir.join(format!("{table}.jsonl"))
}

async fn write_spool(path: PathBuf, mut rx: mpsc::Receiver<Vec<RawRow>>) -> Result<(), LakeportError> {
    let file = tokio::fs::File::create(&path).await?;
    let mut writer = tokio::io::BufWriter::new(file);
    while let Some(chunk) = rx.recv().await {
        for row in &chunk {
            let mut line = serde_json::to_vec(row)?;
            line.push(b'\n');
            writer.write_all(&line).await?;
        }
    }
    writer.flush().await?;
    Ok(())
}

/// Read every table into a raw spool with at most `extract_workers` readers
/// at once. Returns rows read per table.
pub async fn extract(
    reader: Arc<dyn SourceReader>,
    schema: &ExecutionSchema,
    spool_dir: &Path,
    config: &PipelineConfig,
) -> Result<HashMap<String, u64>, LakeportError> {
    tokio::fs::create_dir_all(spool_dir).await?;
    let semaphore = Arc::new(Semaphore::new(config.extract_workers.max(1)));
    let mut tasks = JoinSet::new();

    for table in &schema.tables {
        let reader = reader.clone();
        let sem = semaphore.clone();
        let table = table.clone();
        let path = spool_path(spool_dir, &table.name);
        let chunk_size = config.chunk_size;

        tasks.spawn(async move {
            let _permit = sem.acquire_owned().await.map_err(|e| PipelineError::Worker {
                message: e.to_string(),
            })?;
            let (tx, rx) = mpsc::channel(CHUNK_BUFFER);
            let (read, written) = tokio::join!(
                reader.read_table(&table, chunk_size, tx),
                write_spool(path, rx)
            );
            let rows = read?;
            written?;
            info!(table = %table.name, rows, "Extracted table");
            Ok::<_, LakeportError>((table.name, rows))
        });
    }

    collect(tasks).await.map(|rows| rows.into_iter().collect())
}

/// Convert raw spools to load jobs, one table at a time in schema order.
pub async fn normalize_all(
    schema: ExecutionSchema,
    spool_dir: PathBuf,
    out_dir: PathBuf,
    format: LoadFormat,
    max_bytes: u64,
) -> Result<Vec<LoadJob>, LakeportError> {
    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&out_dir)?;
        let mut jobs = Vec::new();
        for table in &schema.tables {
            let spool = spool_path(&spool_dir, &table.name);
            let parts = normalize::normalize_table(table, &spool, &out_dir, format, max_bytes)?;
            debug!(table = %table.name, parts = parts.len(), "Normalized table");
            jobs.extend(parts);
        }
        Ok::<_, LakeportError>(jobs)
    })
    .await
    .map_err(|e| PipelineError::Worker {
        message: e.to_string(),
    })?
}

/// Write load jobs to the sink with at most `workers` concurrent writers.
/// Returns rows loaded per table.
pub async fn load(
    sink: Arc<dyn DestinationSink>,
    schema: &ExecutionSchema,
    jobs: Vec<LoadJob>,
    workers: usize,
) -> Result<HashMap<String, u64>, LakeportError> {
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let tables: HashMap<&str, &TableSchema> =
        schema.tables.iter().map(|t| (t.name.as_str(), t)).collect();
    let mut tasks = JoinSet::new();

    for job in jobs {
        let Some(table) = tables.get(job.table.as_str()) else {
            return Err(PipelineError::Worker {
                message: format!("load job for unknown table '{}'", job.table),
            }
            .into());
        };
        let table = (*table).clone();
        let sink = sink.clone();
        let sem = semaphore.clone();

        tasks.spawn(async move {
            let _permit = sem.acquire_owned().await.map_err(|e| PipelineError::Worker {
                message: e.to_string(),
            })?;
            sink.load(&table, &job).await?;
            Ok::<_, LakeportError>((job.table, job.rows))
        });
    }

    let mut loaded: HashMap<String, u64> = HashMap::new();
    for (table, rows) in collect(tasks).await? {
        *loaded.entry(table).or_default() += rows;
    }
    Ok(loaded)
}

/// Await every task, failing on the first error. Dropping the set aborts
/// whatever is still running.
async fn collect<T: 'static>(
    mut tasks: JoinSet<Result<T, LakeportError>>,
) -> Result<Vec<T>, LakeportError> {
    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        let result = joined.map_err(|e| PipelineError::Worker {
            message: e.to_string(),
        })?;
        results.push(result?);
    }
    Ok(results)
}
