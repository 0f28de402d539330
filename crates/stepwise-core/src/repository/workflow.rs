//! Workflow definition store trait.

use stepwise_types::error::RepositoryError;
use stepwise_types::workflow::WorkflowDefinition;

/// Storage for authored workflow definitions, keyed by workflow name.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait DefinitionStore: Send + Sync {
    /// Upsert a definition (insert or replace by name).
    fn save_definition(
        &self,
        def: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a definition by workflow name.
    fn get_definition(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// All stored definitions, ordered by name.
    fn list_definitions(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// Delete a definition by name. Returns `true` if it existed.
    fn delete_definition(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;
}
