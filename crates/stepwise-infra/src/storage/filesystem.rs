//! Filesystem-backed storage.
//!
//! Layout under the data directory:
//! ```text
//! {workflows_dir}/
//!   order-flow.yaml        one workflow document per file (any name, *.yaml / *.yml)
//!   billing/nightly.yml    subdirectories are scanned too
//! {data_dir}/runs/
//!   0191e2...json          one run record per file, named by run id
//! ```
//!
//! Workflow documents are read with the stepwise parser, so hand-written
//! files may use every alias the parser accepts. Files that do not parse are
//! skipped with a warning rather than failing discovery. Discovery walks
//! the tree with blocking `std::fs` calls, so the async store runs it on
//! tokio's blocking pool.

use std::path::{Path, PathBuf};

use stepwise_core::repository::{DefinitionStore, RunStore};
use stepwise_core::workflow::parse;
use stepwise_types::error::RepositoryError;
use stepwise_types::run::RunRecord;
use stepwise_types::workflow::WorkflowDefinition;
use uuid::Uuid;

use super::memory::newest_first;

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Load one workflow document.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, RepositoryError> {
    let content = std::fs::read_to_string(path).map_err(io_error)?;
    let outcome = parse(&content);
    outcome.workflow.ok_or_else(|| {
        let errors: Vec<String> = outcome.errors.iter().map(|d| d.to_string()).collect();
        RepositoryError::Query(format!("{}: {}", path.display(), errors.join("; ")))
    })
}

/// Discover all workflow documents under `base_dir`, recursively, sorted by
/// path. A missing directory yields nothing.
pub fn discover_workflows(
    base_dir: &Path,
) -> Result<Vec<(PathBuf, WorkflowDefinition)>, RepositoryError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, WorkflowDefinition)>,
) -> Result<(), RepositoryError> {
    for entry in std::fs::read_dir(dir).map_err(io_error)? {
        let path = entry.map_err(io_error)?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if is_workflow_file(&path) {
            match load_workflow_file(&path) {
                Ok(def) => results.push((path, def)),
                Err(e) => tracing::warn!(?path, error = %e, "skipping unparseable workflow file"),
            }
        }
    }
    Ok(())
}

fn is_workflow_file(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}

fn io_error(e: std::io::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

/// File stem for a workflow name: anything outside `[A-Za-z0-9._-]` becomes `_`.
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect()
}

// ---------------------------------------------------------------------------
// FsDefinitionStore
// ---------------------------------------------------------------------------

/// Workflow definitions stored as YAML documents in one directory tree.
///
/// Lookups go by the `name` inside each document, not the file name; saving
/// a workflow that already exists overwrites its existing file.
#[derive(Debug, Clone)]
pub struct FsDefinitionStore {
    dir: PathBuf,
}

impl FsDefinitionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn discover(&self) -> Result<Vec<(PathBuf, WorkflowDefinition)>, RepositoryError> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || discover_workflows(&dir))
            .await
            .map_err(|e| RepositoryError::Query(format!("workflow discovery task failed: {e}")))?
    }

    async fn find(&self, name: &str) -> Result<Option<(PathBuf, WorkflowDefinition)>, RepositoryError> {
        Ok(self
            .discover()
            .await?
            .into_iter()
            .find(|(_, def)| def.name == name))
    }
}

impl DefinitionStore for FsDefinitionStore {
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        let path = match self.find(&def.name).await? {
            Some((path, _)) => path,
            None => self.dir.join(format!("{}.yaml", file_stem(&def.name))),
        };
        let yaml = serde_yaml_ng::to_string(def).map_err(|e| RepositoryError::Query(e.to_string()))?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
        }
        tokio::fs::write(&path, yaml).await.map_err(io_error)?;
        tracing::debug!(workflow = def.name.as_str(), ?path, "saved workflow definition");
        Ok(())
    }

    async fn get_definition(&self, name: &str) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.find(name).await?.map(|(_, def)| def))
    }

    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let mut defs: Vec<WorkflowDefinition> = self
            .discover()
            .await?
            .into_iter()
            .map(|(_, def)| def)
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(defs)
    }

    async fn delete_definition(&self, name: &str) -> Result<bool, RepositoryError> {
        match self.find(name).await? {
            Some((path, _)) => {
                tokio::fs::remove_file(&path).await.map_err(io_error)?;
                tracing::debug!(workflow = name, ?path, "deleted workflow definition");
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// FsRunStore
// ---------------------------------------------------------------------------

/// Run records stored as `{dir}/{run_id}.json`.
#[derive(Debug, Clone)]
pub struct FsRunStore {
    dir: PathBuf,
}

impl FsRunStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, run_id: &Uuid) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    async fn read(path: &Path) -> Result<RunRecord, RepositoryError> {
        let content = tokio::fs::read_to_string(path).await.map_err(io_error)?;
        serde_json::from_str(&content).map_err(|e| RepositoryError::Query(e.to_string()))
    }
}

impl RunStore for FsRunStore {
    async fn save_run(&self, record: &RunRecord) -> Result<(), RepositoryError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(io_error)?;
        let json = serde_json::to_string_pretty(record).map_err(|e| RepositoryError::Query(e.to_string()))?;
        tokio::fs::write(self.path(&record.run_id()), json)
            .await
            .map_err(io_error)
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<RunRecord>, RepositoryError> {
        let path = self.path(run_id);
        if !tokio::fs::try_exists(&path).await.map_err(io_error)? {
            return Ok(None);
        }
        Self::read(&path).await.map(Some)
    }

    async fn list_runs(&self, workflow: &str, limit: usize) -> Result<Vec<RunRecord>, RepositoryError> {
        let mut runs = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(runs),
            Err(e) => return Err(io_error(e)),
        };

        while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            match Self::read(&path).await {
                Ok(record) if record.workflow() == workflow => runs.push(record),
                Ok(_) => {}
                Err(e) => tracing::warn!(?path, error = %e, "skipping unreadable run record"),
            }
        }

        newest_first(&mut runs);
        runs.truncate(limit);
        Ok(runs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
