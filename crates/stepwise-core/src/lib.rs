//! Workflow compiler, execution engine and repository trait definitions for
//! Stepwise.
//!
//! This crate defines the "ports" (repository traits and the action
//! dispatcher) that the infrastructure layer implements. It depends only on
//! `stepwise-types` -- never on `stepwise-infra` or any I/O crate.

pub mod event;
pub mod repository;
pub mod service;
pub mod workflow;
