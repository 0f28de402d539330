//! Lowering of validated definitions into executable step graphs.
//!
//! Compilation is a direct structural mapping: steps keep their declaration
//! order and their action templates stay unresolved (placeholders only mean
//! something against a future run). Beyond the mapping the compiler records
//! the entry step, the placeholders each step references, and a content
//! fingerprint used as a cache key.

use std::collections::HashSet;

use serde::Serialize;
use sha2::{Digest, Sha256};
use stepwise_types::diagnostic::Diagnostic;
use stepwise_types::graph::{CompiledStep, ExecutableStepGraph};
use stepwise_types::workflow::WorkflowDefinition;
use thiserror::Error;

use super::context::RESERVED_ROOTS;
use super::dag::TransitionGraph;
use super::parser::parse;
use super::template::collect_placeholders;
use super::validator::validate;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// A compile pipeline stage failed.
///
/// Each variant carries every diagnostic that stage produced.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WorkflowError {
    #[error("parse failed: {}", join(.0))]
    Parse(Vec<Diagnostic>),

    #[error("validation failed: {}", join(.0))]
    Validation(Vec<Diagnostic>),

    #[error("compile failed: {}", join(.0))]
    Compile(Vec<Diagnostic>),
}

impl WorkflowError {
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            WorkflowError::Parse(d) | WorkflowError::Validation(d) | WorkflowError::Compile(d) => d,
        }
    }
}

fn join(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

// ---------------------------------------------------------------------------
// Compile
// ---------------------------------------------------------------------------

/// Result of compiling one definition.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileOutcome {
    pub graph: Option<ExecutableStepGraph>,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

/// Lower a definition into an `ExecutableStepGraph`.
///
/// Callers validate first. Only the invariants the engine depends on
/// (a trigger and an entry step exist, ids are unique, transitions resolve)
/// are re-checked here.
pub fn compile(def: &WorkflowDefinition) -> CompileOutcome {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    if def.triggers.is_empty() {
        errors.push(Diagnostic::new("triggers", "cannot compile a workflow without triggers"));
    }
    let Some(entry) = def.entry_step() else {
        errors.push(Diagnostic::new("steps", "cannot compile a workflow without steps"));
        return CompileOutcome {
            graph: None,
            errors,
            warnings,
        };
    };

    let mut ids = HashSet::new();
    for (i, step) in def.steps.iter().enumerate() {
        if !ids.insert(step.id.as_str()) {
            errors.push(Diagnostic::new(
                format!("steps[{i}].id"),
                format!("duplicate step id '{}'", step.id),
            ));
        }
    }
    for (i, step) in def.steps.iter().enumerate() {
        for target in step.transitions() {
            if !ids.contains(target) {
                errors.push(Diagnostic::new(
                    format!("steps[{i}]"),
                    format!("transition target '{target}' does not exist"),
                ));
            }
        }
    }
    if !errors.is_empty() {
        return CompileOutcome {
            graph: None,
            errors,
            warnings,
        };
    }

    for unreachable in TransitionGraph::build(&def.steps).unreachable_from(&entry.id) {
        warnings.push(Diagnostic::new(
            format!("steps.{unreachable}"),
            format!("step '{unreachable}' is not reachable from entry step '{}'", entry.id),
        ));
    }

    let steps: Vec<CompiledStep> = def
        .steps
        .iter()
        .map(|step| {
            let placeholders = collect_placeholders(&step.action.args);
            for placeholder in &placeholders {
                let root = placeholder.split('.').next().unwrap_or_default().trim();
                if !root.is_empty() && !RESERVED_ROOTS.contains(&root) && !ids.contains(root) {
                    warnings.push(Diagnostic::new(
                        format!("steps.{}.action", step.id),
                        format!("placeholder '{{{{{placeholder}}}}}' does not name a known root or step"),
                    ));
                }
            }
            CompiledStep {
                id: step.id.clone(),
                action: step.action.clone(),
                on_success: step.on_success.clone(),
                on_failure: step.on_failure.clone(),
                placeholders,
            }
        })
        .collect();

    let fingerprint = fingerprint(&def.name, &entry.id, &steps);
    tracing::debug!(
        workflow = def.name.as_str(),
        steps = steps.len(),
        %fingerprint,
        "workflow compiled"
    );

    CompileOutcome {
        graph: Some(ExecutableStepGraph {
            workflow: def.name.clone(),
            entry: entry.id.clone(),
            steps,
            fingerprint,
        }),
        errors,
        warnings,
    }
}

/// Hex SHA-256 over the canonical JSON form of the graph body.
fn fingerprint(workflow: &str, entry: &str, steps: &[CompiledStep]) -> String {
    #[derive(Serialize)]
    struct Canonical<'a> {
        workflow: &'a str,
        entry: &'a str,
        steps: &'a [CompiledStep],
    }

    let canonical = Canonical {
        workflow,
        entry,
        steps,
    };
    // Serializing plain data into a Vec cannot fail.
    let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
    format!("{:x}", Sha256::digest(&bytes))
}

// ---------------------------------------------------------------------------
// Full pipeline
// ---------------------------------------------------------------------------

/// A definition together with its compiled graph.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledWorkflow {
    pub definition: WorkflowDefinition,
    pub graph: ExecutableStepGraph,
    /// Parser and compiler warnings, in that order.
    pub warnings: Vec<Diagnostic>,
}

/// Parse, validate and compile a source document.
pub fn compile_source(source: &str) -> Result<CompiledWorkflow, WorkflowError> {
    let parsed = parse(source);
    let Some(definition) = parsed.workflow else {
        return Err(WorkflowError::Parse(parsed.errors));
    };

    let report = validate(&definition);
    if !report.valid() {
        return Err(WorkflowError::Validation(report.errors));
    }

    let compiled = compile(&definition);
    let Some(graph) = compiled.graph else {
        return Err(WorkflowError::Compile(compiled.errors));
    };

    let mut warnings = parsed.warnings;
    warnings.extend(compiled.warnings);
    Ok(CompiledWorkflow {
        definition,
        graph,
        warnings,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_types::workflow::{ActionTemplate, StepSpec, TriggerSpec};

    const SOURCE: &str = r#"
name: order-flow
triggers:
  - kind: event
    event: Order.created
steps:
  - id: check-inventory
    action: Inventory.check
    args: { order: "{{trigger.id}}" }
    on_success: process-payment
    on_failure: notify-team
  - id: process-payment
    action: Payment.charge
    args: { reserved: "{{check-inventory.ok}}" }
    on_success: send-confirmation
    on_failure: notify-team
  - id: send-confirmation
    action: Email.send
    on_failure: notify-team
  - id: notify-team
    action: Team.notify
"#;

    fn step(id: &str) -> StepSpec {
        StepSpec::new(id, ActionTemplate::new("Svc", "call"))
    }

    #[test]
    fn lowers_in_declaration_order() {
        let compiled = compile_source(SOURCE).unwrap();
        let graph = &compiled.graph;
        assert_eq!(graph.workflow, "order-flow");
        assert_eq!(graph.entry, "check-inventory");
        assert_eq!(
            graph.step_ids().collect::<Vec<_>>(),
            vec!["check-inventory", "process-payment", "send-confirmation", "notify-team"]
        );
        let payment = graph.step("process-payment").unwrap();
        assert_eq!(payment.on_failure.as_deref(), Some("notify-team"));
        assert_eq!(payment.placeholders, vec!["check-inventory.ok"]);
        assert!(graph.step("notify-team").unwrap().is_terminal());
        assert!(compiled.warnings.is_empty(), "{:?}", compiled.warnings);
    }

    #[test]
    fn compilation_is_deterministic() {
        let a = compile_source(SOURCE).unwrap();
        let b = compile_source(SOURCE).unwrap();
        assert_eq!(a.graph, b.graph);
        assert_eq!(a.graph.fingerprint.len(), 64);
    }

    #[test]
    fn fingerprint_tracks_content() {
        let a = compile_source(SOURCE).unwrap();
        let changed = SOURCE.replace("Team.notify", "Team.page");
        let b = compile_source(&changed).unwrap();
        assert_ne!(a.graph.fingerprint, b.graph.fingerprint);
    }

    #[test]
    fn zero_triggers_never_compiles() {
        let source = "name: w\ntriggers: []\nsteps:\n  - { id: a, action: S.p }\n";
        let err = compile_source(source).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(_)));

        let def = WorkflowDefinition::new("w").with_step(step("a"));
        let outcome = compile(&def);
        assert!(outcome.graph.is_none());
        assert_eq!(outcome.errors.len(), 1);
    }

    #[test]
    fn rechecks_dangling_transitions() {
        let def = WorkflowDefinition::new("w")
            .with_trigger(TriggerSpec::schedule("0 9 * * *"))
            .with_step(step("a").with_success("missing"));
        let outcome = compile(&def);
        assert!(outcome.graph.is_none());
        assert_eq!(
            outcome.errors[0].to_string(),
            "steps[0]: transition target 'missing' does not exist"
        );
    }

    #[test]
    fn warns_about_unreachable_steps_and_unknown_roots() {
        let def = WorkflowDefinition::new("w")
            .with_trigger(TriggerSpec::schedule("0 9 * * *"))
            .with_step(
                StepSpec::new("a", ActionTemplate::new("S", "p").with_arg("x", "{{ghost.value}}")),
            )
            .with_step(step("orphan"));
        let outcome = compile(&def);
        assert!(outcome.graph.is_some());
        let warnings: Vec<String> = outcome.warnings.iter().map(|d| d.to_string()).collect();
        assert_eq!(
            warnings,
            vec![
                "steps.orphan: step 'orphan' is not reachable from entry step 'a'",
                "steps.a.action: placeholder '{{ghost.value}}' does not name a known root or step",
            ]
        );
    }

    #[test]
    fn pipeline_reports_stage_of_failure() {
        let err = compile_source("name: [").unwrap_err();
        assert!(matches!(err, WorkflowError::Parse(_)));
        assert!(err.to_string().starts_with("parse failed: malformed document"));

        let cyclic = r#"
name: w
triggers: [{ kind: event, event: A.b }]
steps:
  - { id: a, action: S.p, on_success: b }
  - { id: b, action: S.p, on_success: a }
"#;
        let err = compile_source(cyclic).unwrap_err();
        assert!(matches!(err, WorkflowError::Validation(ref d) if d.len() == 1));
    }
}
