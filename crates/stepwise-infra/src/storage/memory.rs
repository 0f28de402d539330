//! In-memory implementation of both storage ports.

use std::sync::Arc;

use dashmap::DashMap;
use stepwise_core::repository::{DefinitionStore, RunStore};
use stepwise_types::error::RepositoryError;
use stepwise_types::run::RunRecord;
use stepwise_types::workflow::WorkflowDefinition;
use uuid::Uuid;

/// Definitions and run records held in concurrent maps.
///
/// Cheap to clone; clones share the maps. Used for tests, embedding, and the
/// CLI when no data directory should be touched.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    definitions: Arc<DashMap<String, WorkflowDefinition>>,
    runs: Arc<DashMap<Uuid, RunRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }
}

impl DefinitionStore for MemoryStore {
    async fn save_definition(&self, def: &WorkflowDefinition) -> Result<(), RepositoryError> {
        self.definitions.insert(def.name.clone(), def.clone());
        Ok(())
    }

    async fn get_definition(&self, name: &str) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.definitions.get(name).map(|d| d.value().clone()))
    }

    async fn list_definitions(&self) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let mut defs: Vec<WorkflowDefinition> =
            self.definitions.iter().map(|d| d.value().clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(defs)
    }

    async fn delete_definition(&self, name: &str) -> Result<bool, RepositoryError> {
        Ok(self.definitions.remove(name).is_some())
    }
}

impl RunStore for MemoryStore {
    async fn save_run(&self, record: &RunRecord) -> Result<(), RepositoryError> {
        self.runs.insert(record.run_id(), record.clone());
        Ok(())
    }

    async fn get_run(&self, run_id: &Uuid) -> Result<Option<RunRecord>, RepositoryError> {
        Ok(self.runs.get(run_id).map(|r| r.value().clone()))
    }

    async fn list_runs(&self, workflow: &str, limit: usize) -> Result<Vec<RunRecord>, RepositoryError> {
        let mut runs: Vec<RunRecord> = self
            .runs
            .iter()
            .filter(|r| r.workflow() == workflow)
            .map(|r| r.value().clone())
            .collect();
        newest_first(&mut runs);
        runs.truncate(limit);
        Ok(runs)
    }
}

/// Sort by start time, newest first. UUIDv7 ids break ties.
pub(crate) fn newest_first(runs: &mut [RunRecord]) {
    runs.sort_by(|a, b| {
        b.context
            .metadata
            .started_at
            .cmp(&a.context.metadata.started_at)
            .then_with(|| b.run_id().cmp(&a.run_id()))
    });
}
