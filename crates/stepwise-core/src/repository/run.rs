//! Run record store trait.

use stepwise_types::error::RepositoryError;
use stepwise_types::run::RunRecord;
use uuid::Uuid;

/// Storage for finished (or in-flight) runs, keyed by run id.
pub trait RunStore: Send + Sync {
    /// Upsert a run record by run id.
    fn save_run(
        &self,
        record: &RunRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a run by id.
    fn get_run(
        &self,
        run_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<RunRecord>, RepositoryError>> + Send;

    /// Runs of one workflow, newest first, at most `limit`.
    fn list_runs(
        &self,
        workflow: &str,
        limit: usize,
    ) -> impl std::future::Future<Output = Result<Vec<RunRecord>, RepositoryError>> + Send;
}
