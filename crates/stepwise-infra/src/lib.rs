//! Infrastructure layer for stepwise.
//!
//! Contains implementations of the ports defined in `stepwise-core`:
//! in-memory and filesystem stores for workflow definitions and run records,
//! the `config.toml` loader, and the HTTP action dispatcher.

pub mod config;
pub mod storage;
pub mod workflow;
