//! Workflow engine: sequential walk of an executable step graph.
//!
//! The `WorkflowEngine` interprets one `ExecutableStepGraph` per run. Steps
//! run strictly one after another because later placeholders may read earlier
//! outputs.
//!
//! # Execution flow
//!
//! 1. Start at the graph's entry step.
//! 2. Check for cancellation; refuse to revisit a step.
//! 3. Resolve `{{...}}` placeholders in the action args against the run context.
//! 4. Dispatch the action and await its outcome.
//! 5. Success: record the output, follow `on_success` or finish.
//!    Failure: follow `on_failure` or fail the run at this step.
//!
//! A broken graph (a revisit or a transition to a missing step) aborts the
//! run with `RunOutcome::Aborted`; the report still carries the context and
//! trace so the run can be stored like any other.

use std::collections::HashSet;

use chrono::Utc;
use serde_json::Value;
use stepwise_types::graph::ExecutableStepGraph;
use stepwise_types::run::{RunContext, RunRecord, RunStatus, StepOutputs, StepRecord, StepStatus};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::dispatcher::{ActionDispatcher, DispatchError};
use super::template::{resolve_args, TemplateError};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a single step attempt failed. Either way the failure is routed
/// through the step's `on_failure`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StepFailure {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Template(#[from] TemplateError),
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// A terminal step succeeded. `outputs` holds the successful steps of the
    /// final path, i.e. those executed since the last failure transition.
    Completed { outputs: StepOutputs },
    /// A step failed with no `on_failure` transition.
    Failed {
        failed_step: String,
        error: StepFailure,
    },
    /// Cancelled between steps.
    Cancelled { last_completed_step: Option<String> },
    /// The graph itself is broken. Never routed through `on_failure`.
    Aborted { error: EngineError },
}

/// A finished run: its outcome plus the final context and trace.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub context: RunContext,
}

impl RunReport {
    pub fn run_id(&self) -> Uuid {
        self.context.metadata.run_id
    }

    pub fn workflow(&self) -> &str {
        &self.context.metadata.workflow
    }

    pub fn status(&self) -> RunStatus {
        match self.outcome {
            RunOutcome::Completed { .. } => RunStatus::Completed,
            RunOutcome::Failed { .. } | RunOutcome::Aborted { .. } => RunStatus::Failed,
            RunOutcome::Cancelled { .. } => RunStatus::Cancelled,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Completed { .. })
    }

    /// Persistable summary of the run.
    pub fn to_record(&self) -> RunRecord {
        let (failed_step, error) = match &self.outcome {
            RunOutcome::Failed { failed_step, error } => {
                (Some(failed_step.clone()), Some(error.to_string()))
            }
            RunOutcome::Aborted { error } => (Some(error.step_id().to_string()), Some(error.to_string())),
            _ => (None, None),
        };
        RunRecord {
            status: self.status(),
            failed_step,
            error,
            finished_at: self.context.trace.last().map(|r| r.finished_at),
            context: self.context.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// EngineError
// ---------------------------------------------------------------------------

/// Structural errors: the graph itself is broken. Always fatal to the run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// The walk reached a step this run already executed.
    #[error("run {run_id} revisited step '{step_id}'")]
    Revisit { run_id: Uuid, step_id: String },

    /// A transition named a step the graph does not contain.
    #[error("run {run_id} reached unknown step '{step_id}'")]
    UnknownStep { run_id: Uuid, step_id: String },
}

impl EngineError {
    /// The step the walk was about to enter.
    pub fn step_id(&self) -> &str {
        match self {
            EngineError::Revisit { step_id, .. } | EngineError::UnknownStep { step_id, .. } => step_id,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Executes step graphs against an injected [`ActionDispatcher`].
///
/// Holds no per-run state, so one engine serves any number of concurrent
/// runs.
pub struct WorkflowEngine<D> {
    dispatcher: D,
}

impl<D: ActionDispatcher> WorkflowEngine<D> {
    pub fn new(dispatcher: D) -> Self {
        Self { dispatcher }
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    /// Run `graph` to completion.
    pub async fn execute(&self, graph: &ExecutableStepGraph, run: RunContext) -> RunReport {
        self.execute_with_cancel(graph, run, &CancellationToken::new())
            .await
    }

    /// Run `graph`, stopping between steps once `cancel` fires.
    pub async fn execute_with_cancel(
        &self,
        graph: &ExecutableStepGraph,
        mut run: RunContext,
        cancel: &CancellationToken,
    ) -> RunReport {
        let run_id = run.run_id();
        tracing::info!(
            run_id = %run_id,
            workflow = graph.workflow.as_str(),
            trigger = run.metadata.trigger_source.as_str(),
            "workflow run started"
        );

        let mut visited: HashSet<String> = HashSet::new();
        // Successful steps since the last failure transition.
        let mut path: Vec<String> = Vec::new();
        let mut current = graph.entry.clone();

        loop {
            if cancel.is_cancelled() {
                let last_completed_step = run.last_completed_step().map(String::from);
                tracing::info!(run_id = %run_id, ?last_completed_step, "workflow run cancelled");
                return RunReport {
                    outcome: RunOutcome::Cancelled { last_completed_step },
                    context: run,
                };
            }

            if !visited.insert(current.clone()) {
                return aborted(
                    run,
                    EngineError::Revisit {
                        run_id,
                        step_id: current,
                    },
                );
            }

            let Some(step) = graph.step(&current) else {
                return aborted(
                    run,
                    EngineError::UnknownStep {
                        run_id,
                        step_id: current,
                    },
                );
            };

            let started_at = Utc::now();
            tracing::debug!(
                run_id = %run_id,
                step_id = step.id.as_str(),
                action = %step.action,
                "dispatching step"
            );

            let result: Result<Value, StepFailure> = match resolve_args(&step.action.args, &run) {
                Ok(args) => self
                    .dispatcher
                    .dispatch(&step.action.subject, &step.action.predicate, args)
                    .await
                    .map_err(StepFailure::from),
                Err(e) => Err(e.into()),
            };
            let finished_at = Utc::now();

            match result {
                Ok(output) => {
                    run.step_outputs.insert(step.id.clone(), output);
                    run.trace.push(StepRecord {
                        step_id: step.id.clone(),
                        status: StepStatus::Succeeded,
                        error: None,
                        started_at,
                        finished_at,
                    });
                    path.push(step.id.clone());

                    match &step.on_success {
                        Some(next) => current = next.clone(),
                        None => {
                            let mut outputs = StepOutputs::new();
                            for id in &path {
                                if let Some(value) = run.step_outputs.get(id) {
                                    outputs.insert(id.clone(), value.clone());
                                }
                            }
                            tracing::info!(
                                run_id = %run_id,
                                workflow = graph.workflow.as_str(),
                                steps = run.trace.len(),
                                "workflow run completed"
                            );
                            return RunReport {
                                outcome: RunOutcome::Completed { outputs },
                                context: run,
                            };
                        }
                    }
                }
                Err(error) => {
                    tracing::warn!(
                        run_id = %run_id,
                        step_id = step.id.as_str(),
                        error = %error,
                        "step failed"
                    );
                    run.trace.push(StepRecord {
                        step_id: step.id.clone(),
                        status: StepStatus::Failed,
                        error: Some(error.to_string()),
                        started_at,
                        finished_at,
                    });

                    match &step.on_failure {
                        Some(next) => {
                            path.clear();
                            current = next.clone();
                        }
                        None => {
                            tracing::info!(
                                run_id = %run_id,
                                workflow = graph.workflow.as_str(),
                                failed_step = step.id.as_str(),
                                "workflow run failed"
                            );
                            return RunReport {
                                outcome: RunOutcome::Failed {
                                    failed_step: step.id.clone(),
                                    error,
                                },
                                context: run,
                            };
                        }
                    }
                }
            }
        }
    }
}

fn aborted(run: RunContext, error: EngineError) -> RunReport {
    tracing::error!(
        run_id = %run.run_id(),
        workflow = run.metadata.workflow.as_str(),
        error = %error,
        "workflow run aborted"
    );
    RunReport {
        outcome: RunOutcome::Aborted { error },
        context: run,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
