//! Long-running services built on the workflow engine.

pub mod trigger;

pub use trigger::TriggerService;
