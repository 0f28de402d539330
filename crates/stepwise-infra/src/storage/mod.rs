//! Storage adapters for the repository ports in `stepwise-core`.
//!
//! - `memory` -- `MemoryStore`, DashMap-backed definitions and runs
//! - `filesystem` -- `FsDefinitionStore` (YAML documents) and `FsRunStore`
//!   (one JSON file per run)

pub mod filesystem;
pub mod memory;

pub use filesystem::{discover_workflows, FsDefinitionStore, FsRunStore};
pub use memory::MemoryStore;
