//! Workflow compiler and execution state machine.
//!
//! Compile time (pure, synchronous):
//! - `parser` -- YAML source document -> `WorkflowDefinition`, collecting errors/warnings
//! - `validator` -- structural and semantic checks on a definition
//! - `compiler` -- validated definition -> `ExecutableStepGraph`
//! - `dag` -- transition graph analysis (cycles, reachability)
//! - `cron` -- 5-field cron parsing and normalization
//!
//! Run time (async):
//! - `template` -- `{{path}}` placeholder resolution
//! - `context` -- run context assembly and placeholder roots
//! - `filter` -- single-predicate trigger filters
//! - `dispatcher` -- the `ActionDispatcher` port plus in-process dispatchers
//! - `executor` -- the `WorkflowEngine` step walker
//! - `trigger` -- activation -> workflow matching
//! - `scheduler` -- cron jobs publishing schedule ticks

pub mod compiler;
pub mod context;
pub mod cron;
pub mod dag;
pub mod dispatcher;
pub mod executor;
pub mod filter;
pub mod parser;
pub mod scheduler;
pub mod template;
pub mod trigger;
pub mod validator;

pub use compiler::{compile, compile_source, CompileOutcome, CompiledWorkflow, WorkflowError};
pub use dispatcher::{ActionDispatcher, DispatchError, EchoDispatcher, RegistryDispatcher};
pub use executor::{EngineError, RunOutcome, RunReport, StepFailure, WorkflowEngine};
pub use parser::{parse, ParseOutcome};
pub use trigger::{DeployedWorkflow, RouteMatch, TriggerRouter};
pub use validator::{validate, ValidationReport};
