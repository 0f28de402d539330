//! Trigger router: matches inbound activations to deployed workflows.
//!
//! `TriggerRouter` is the registry of deployed workflows. For each inbound
//! `Activation` it selects every workflow with a matching trigger and builds
//! one fresh `RunContext` per match. Routing never mutates a definition or
//! its compiled graph.
//!
//! Matching rules:
//! - event: subject and predicate match exactly, and the optional filter
//!   evaluates true against the payload
//! - schedule: the tick's cron string equals the trigger's (after whitespace
//!   normalization); whether the tick was due is the scheduler's concern
//!
//! Within one workflow the first matching trigger (declaration order) starts
//! the run, so a workflow never runs twice for one activation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use stepwise_types::graph::ExecutableStepGraph;
use stepwise_types::run::{Activation, RunContext};
use stepwise_types::workflow::{TriggerSpec, WorkflowDefinition};
use tokio::sync::RwLock;

use super::compiler::CompiledWorkflow;
use super::context::new_run_context;
use super::cron::normalize_cron;
use super::filter::evaluate;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from router registry operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TriggerError {
    /// No deployed workflow carries this name.
    #[error("workflow '{0}' is not deployed")]
    NotDeployed(String),

    /// The definition and graph disagree on the workflow name.
    #[error("graph for '{graph}' does not belong to workflow '{workflow}'")]
    Mismatch { workflow: String, graph: String },
}

// ---------------------------------------------------------------------------
// DeployedWorkflow
// ---------------------------------------------------------------------------

/// A workflow ready to be activated: its definition (for triggers) plus the
/// compiled graph the engine walks.
#[derive(Debug, Clone, PartialEq)]
pub struct DeployedWorkflow {
    pub definition: WorkflowDefinition,
    pub graph: ExecutableStepGraph,
}

impl DeployedWorkflow {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// The first trigger matching `activation`, if any.
    pub fn matching_trigger(&self, activation: &Activation) -> Option<&TriggerSpec> {
        self.definition
            .triggers
            .iter()
            .find(|trigger| trigger_matches(trigger, activation))
    }
}

impl From<CompiledWorkflow> for DeployedWorkflow {
    fn from(compiled: CompiledWorkflow) -> Self {
        Self {
            definition: compiled.definition,
            graph: compiled.graph,
        }
    }
}

/// Whether one trigger matches one activation.
pub fn trigger_matches(trigger: &TriggerSpec, activation: &Activation) -> bool {
    match (trigger, activation) {
        (TriggerSpec::Event(t), Activation::Event(e)) => {
            t.subject == e.subject
                && t.predicate == e.predicate
                && t.filter.as_ref().is_none_or(|f| evaluate(f, &e.payload))
        }
        (TriggerSpec::Schedule(s), Activation::Schedule(tick)) => {
            normalize_cron(&s.cron) == normalize_cron(&tick.cron)
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// RouteMatch
// ---------------------------------------------------------------------------

/// One run to start: the workflow plus its freshly created context.
#[derive(Debug, Clone)]
pub struct RouteMatch {
    pub workflow: Arc<DeployedWorkflow>,
    pub context: RunContext,
}

// ---------------------------------------------------------------------------
// TriggerRouter
// ---------------------------------------------------------------------------

/// Registry of deployed workflows keyed by name.
///
/// Cheap to clone; clones share the registry.
#[derive(Debug, Clone, Default)]
pub struct TriggerRouter {
    workflows: Arc<RwLock<BTreeMap<String, Arc<DeployedWorkflow>>>>,
}

impl TriggerRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deploy a workflow, replacing any deployed workflow of the same name.
    /// Returns the replaced workflow.
    pub async fn deploy(
        &self,
        workflow: impl Into<DeployedWorkflow>,
    ) -> Result<Option<Arc<DeployedWorkflow>>, TriggerError> {
        let workflow = workflow.into();
        if workflow.definition.name != workflow.graph.workflow {
            return Err(TriggerError::Mismatch {
                workflow: workflow.definition.name.clone(),
                graph: workflow.graph.workflow.clone(),
            });
        }

        let name = workflow.definition.name.clone();
        let trigger_count = workflow.definition.triggers.len();
        let replaced = self
            .workflows
            .write()
            .await
            .insert(name.clone(), Arc::new(workflow));

        tracing::info!(
            workflow = name.as_str(),
            trigger_count,
            replaced = replaced.is_some(),
            "deployed workflow"
        );
        Ok(replaced)
    }

    /// Remove a deployed workflow.
    pub async fn undeploy(&self, name: &str) -> Result<Arc<DeployedWorkflow>, TriggerError> {
        let removed = self
            .workflows
            .write()
            .await
            .remove(name)
            .ok_or_else(|| TriggerError::NotDeployed(name.to_string()))?;
        tracing::info!(workflow = name, "undeployed workflow");
        Ok(removed)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<DeployedWorkflow>> {
        self.workflows.read().await.get(name).cloned()
    }

    /// Deployed workflows, ordered by name.
    pub async fn workflows(&self) -> Vec<Arc<DeployedWorkflow>> {
        self.workflows.read().await.values().cloned().collect()
    }

    pub async fn workflow_count(&self) -> usize {
        self.workflows.read().await.len()
    }

    /// Distinct normalized cron strings across all schedule triggers.
    pub async fn cron_expressions(&self) -> Vec<String> {
        let workflows = self.workflows.read().await;
        let crons: BTreeSet<String> = workflows
            .values()
            .flat_map(|w| w.definition.triggers.iter())
            .filter_map(|t| match t {
                TriggerSpec::Schedule(s) => Some(normalize_cron(&s.cron)),
                TriggerSpec::Event(_) => None,
            })
            .collect();
        crons.into_iter().collect()
    }

    /// Select the workflows `activation` starts, one `RouteMatch` each, in
    /// workflow name order.
    ///
    /// A match whose context template cannot be resolved is skipped with a
    /// warning.
    pub async fn route(&self, activation: &Activation) -> Vec<RouteMatch> {
        let workflows = self.workflows.read().await;
        let mut matches = Vec::new();

        for workflow in workflows.values() {
            let Some(trigger) = workflow.matching_trigger(activation) else {
                continue;
            };
            match new_run_context(workflow.name(), trigger, activation) {
                Ok(context) => {
                    tracing::debug!(
                        workflow = workflow.name(),
                        run_id = %context.run_id(),
                        trigger = trigger.source_label().as_str(),
                        "activation matched"
                    );
                    matches.push(RouteMatch {
                        workflow: Arc::clone(workflow),
                        context,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        workflow = workflow.name(),
                        activation = activation.source_label().as_str(),
                        error = %e,
                        "skipping match: context template failed"
                    );
                }
            }
        }

        tracing::debug!(
            activation = activation.source_label().as_str(),
            matched = matches.len(),
            "activation routed"
        );
        matches
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
