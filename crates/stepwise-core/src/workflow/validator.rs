//! Structural and semantic validation of a `WorkflowDefinition`.
//!
//! Independent of source syntax: definitions built in code go through the
//! same checks as parsed documents. All failures are reported, not just the
//! first.

use std::collections::HashSet;

use stepwise_types::diagnostic::Diagnostic;
use stepwise_types::workflow::{TriggerSpec, WorkflowDefinition};

use super::context::RESERVED_ROOTS;
use super::cron::validate_cron;
use super::dag::TransitionGraph;

/// Result of validating one definition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub errors: Vec<Diagnostic>,
}

impl ValidationReport {
    pub fn valid(&self) -> bool {
        self.errors.is_empty()
    }

    fn error(&mut self, path: impl Into<String>, message: impl Into<String>) {
        self.errors.push(Diagnostic::new(path, message));
    }
}

/// Validate a definition.
///
/// Checks, in order:
/// 1. at least one trigger
/// 2. at least one step; step ids non-empty, well-formed and unique
/// 3. every `on_success` / `on_failure` names a declared step
/// 4. no cycle reachable from the entry step, so every run visits a step at
///    most once (several steps may share a failure target); unreachable
///    steps are left to the compiler's warnings
/// 5. schedule triggers carry a valid 5-field cron expression; event
///    triggers carry a non-empty subject and predicate
pub fn validate(def: &WorkflowDefinition) -> ValidationReport {
    let mut report = ValidationReport::default();

    if def.name.trim().is_empty() {
        report.error("name", "workflow name must not be empty");
    }

    // 1. Triggers
    if def.triggers.is_empty() {
        report.error("triggers", "workflow must declare at least one trigger");
    }

    // 2. Steps and ids
    if def.steps.is_empty() {
        report.error("steps", "workflow must declare at least one step");
    }
    let mut seen: HashSet<&str> = HashSet::new();
    for (i, step) in def.steps.iter().enumerate() {
        let path = format!("steps[{i}].id");
        // Malformed ids are still declared; transitions to them are not "unknown".
        let first = seen.insert(step.id.as_str());
        if let Err(problem) = check_step_id(&step.id) {
            report.error(&path, problem);
        } else if !first {
            report.error(&path, format!("duplicate step id '{}'", step.id));
        }
    }

    // 3. Transitions
    for (i, step) in def.steps.iter().enumerate() {
        let targets = [
            ("on_success", step.on_success.as_deref()),
            ("on_failure", step.on_failure.as_deref()),
        ];
        for (field, target) in targets {
            if let Some(target) = target {
                if !seen.contains(target) {
                    report.error(
                        format!("steps[{i}].{field}"),
                        format!("step '{}' transitions to unknown step '{target}'", step.id),
                    );
                }
            }
        }
    }

    // 4. Single-pass walk
    let graph = TransitionGraph::build(&def.steps);
    let unreachable: HashSet<&str> = match def.entry_step() {
        Some(entry) => graph.unreachable_from(&entry.id).into_iter().collect(),
        None => HashSet::new(),
    };
    for cycle in graph.cycles() {
        if unreachable.contains(cycle[0]) {
            continue;
        }
        let Some(first) = def.steps.iter().position(|s| s.id == cycle[0]) else {
            continue;
        };
        let message = if cycle.len() == 1 {
            format!("step '{}' transitions to itself; a run may visit each step at most once", cycle[0])
        } else {
            let names: Vec<String> = cycle.iter().map(|id| format!("'{id}'")).collect();
            format!(
                "steps {} form a cycle; a run may visit each step at most once",
                names.join(", ")
            )
        };
        report.error(format!("steps[{first}]"), message);
    }

    // 5. Trigger well-formedness
    for (i, trigger) in def.triggers.iter().enumerate() {
        match trigger {
            TriggerSpec::Schedule(schedule) => {
                if let Err(e) = validate_cron(&schedule.cron) {
                    report.error(format!("triggers[{i}].cron"), e.to_string());
                }
            }
            TriggerSpec::Event(event) => {
                if event.subject.trim().is_empty() {
                    report.error(format!("triggers[{i}].subject"), "event subject must not be empty");
                }
                if event.predicate.trim().is_empty() {
                    report.error(
                        format!("triggers[{i}].predicate"),
                        "event predicate must not be empty",
                    );
                }
            }
        }
    }

    report
}

/// Step ids double as placeholder roots (`{{check-inventory.ok}}`), so they
/// may not contain dots, braces or whitespace, nor shadow a reserved root.
fn check_step_id(id: &str) -> Result<(), String> {
    if id.is_empty() {
        return Err("step id must not be empty".to_string());
    }
    if id.chars().any(|c| c == '.' || c == '{' || c == '}' || c.is_whitespace()) {
        return Err(format!(
            "step id '{id}' may not contain '.', braces or whitespace"
        ));
    }
    if RESERVED_ROOTS.contains(&id) {
        return Err(format!("step id '{id}' is reserved for placeholders"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
