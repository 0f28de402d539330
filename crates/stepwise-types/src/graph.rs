//! Executable step graph: the compiler's output.
//!
//! A graph is built once per compile and shared read-only by every run of the
//! workflow. Step order is declaration order; the entry step is the first.

use serde::{Deserialize, Serialize};

use crate::workflow::ActionTemplate;

/// A lowered step: the action template plus its resolved transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledStep {
    pub id: String,
    pub action: ActionTemplate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
    /// Placeholder paths referenced by the action args, in order of appearance.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub placeholders: Vec<String>,
}

impl CompiledStep {
    /// Whether a successful dispatch ends the run.
    pub fn is_terminal(&self) -> bool {
        self.on_success.is_none()
    }
}

/// Ordered, immutable step graph for one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutableStepGraph {
    /// Name of the workflow this graph was compiled from.
    pub workflow: String,
    /// Id of the step every run starts at.
    pub entry: String,
    /// Steps in declaration order.
    pub steps: Vec<CompiledStep>,
    /// Hex SHA-256 over workflow name, entry and steps. Identical sources
    /// compile to identical fingerprints.
    pub fingerprint: String,
}

impl ExecutableStepGraph {
    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&CompiledStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Step ids in declaration order.
    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().map(|s| s.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
