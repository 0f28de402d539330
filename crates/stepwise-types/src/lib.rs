//! Shared domain types for stepwise.
//!
//! Workflow definitions, compiled step graphs, run state and configuration,
//! used across the parser, validator, compiler, engine and router.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod diagnostic;
pub mod error;
pub mod graph;
pub mod run;
pub mod workflow;
