//! Workflow document parser.
//!
//! Reads a YAML (or JSON) document into a `WorkflowDefinition`. The document
//! is first loaded as a generic YAML tree and then walked field by field, so
//! every fault is collected with its location (`steps[1].on_failure`) instead
//! of stopping at the first one. Parsing is pure: no I/O, and identical input
//! always produces an identical outcome.
//!
//! Document shape:
//!
//! ```yaml
//! name: order-flow
//! description: Reserve stock and charge new orders
//! triggers:
//!   - kind: event
//!     event: Order.created           # or subject: / predicate:
//!     filter: "total > 0"
//!     context:
//!       order_id: "{{payload.id}}"
//!   - kind: schedule
//!     cron: "0 9 * * *"
//! steps:
//!   - id: check-inventory
//!     action: Inventory.check        # or { subject, predicate, args }
//!     args: { sku: "{{trigger.sku}}" }
//!     on_success: process-payment
//!     on_failure: notify-team
//! ```

use serde_json::{Map, Value as Json};
use serde_yaml_ng::Value as Yaml;
use stepwise_types::diagnostic::Diagnostic;
use stepwise_types::workflow::{
    split_target, ActionTemplate, EventTrigger, FilterExpr, ScheduleTrigger, StepSpec,
    TriggerSpec, WorkflowDefinition,
};

const ROOT_FIELDS: &[&str] = &["name", "description", "triggers", "steps"];
const EVENT_FIELDS: &[&str] = &[
    "kind",
    "type",
    "event",
    "subject",
    "predicate",
    "filter",
    "context",
    "contextTemplate",
    "context_template",
];
const SCHEDULE_FIELDS: &[&str] = &["kind", "type", "cron"];
const STEP_FIELDS: &[&str] = &[
    "id",
    "action",
    "args",
    "on_success",
    "onSuccess",
    "on_failure",
    "onFailure",
];
const ACTION_FIELDS: &[&str] = &["subject", "predicate", "args"];

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of parsing one document.
///
/// `workflow` is `Some` only when `errors` is empty. Warnings (unknown
/// fields and the like) never block parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseOutcome {
    pub workflow: Option<WorkflowDefinition>,
    pub errors: Vec<Diagnostic>,
    pub warnings: Vec<Diagnostic>,
}

impl ParseOutcome {
    pub fn is_ok(&self) -> bool {
        self.workflow.is_some()
    }
}

/// Parse a workflow document.
pub fn parse(source: &str) -> ParseOutcome {
    let mut walker = Walker::default();

    let workflow = match serde_yaml_ng::from_str::<Yaml>(source) {
        Ok(doc) => walker.document(&doc),
        Err(e) => {
            walker.error("", format!("malformed document: {e}"));
            None
        }
    };

    let workflow = if walker.errors.is_empty() { workflow } else { None };
    ParseOutcome {
        workflow,
        errors: walker.errors,
        warnings: walker.warnings,
    }
}

// ---------------------------------------------------------------------------
// Tree walker
// ---------------------------------------------------------------------------

/// Entries of one YAML mapping, with the mapping's location.
struct Fields<'a> {
    path: String,
    entries: Vec<(&'a str, &'a Yaml)>,
}

impl<'a> Fields<'a> {
    fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(k, _)| *k == name)
    }
}

fn child(parent: &str, key: &str) -> String {
    if parent.is_empty() {
        key.to_string()
    } else {
        format!("{parent}.{key}")
    }
}

fn describe(value: &Yaml) -> &'static str {
    match value {
        Yaml::Null => "null",
        Yaml::Bool(_) => "a boolean",
        Yaml::Number(_) => "a number",
        Yaml::String(_) => "a string",
        Yaml::Sequence(_) => "a list",
        Yaml::Mapping(_) => "a mapping",
        Yaml::Tagged(_) => "a tagged value",
    }
}

#[derive(Default)]
struct Walker {
    errors: Vec<Diagnostic>,
    warnings: Vec<Diagnostic>,
}

impl Walker {
    fn error(&mut self, path: &str, message: impl Into<String>) {
        self.errors.push(if path.is_empty() {
            Diagnostic::document(message)
        } else {
            Diagnostic::new(path, message)
        });
    }

    fn warn(&mut self, path: &str, message: impl Into<String>) {
        self.warnings.push(if path.is_empty() {
            Diagnostic::document(message)
        } else {
            Diagnostic::new(path, message)
        });
    }

    // -- generic accessors --------------------------------------------------

    fn fields<'a>(&mut self, value: &'a Yaml, path: &str) -> Option<Fields<'a>> {
        let Yaml::Mapping(mapping) = value else {
            self.error(path, format!("expected a mapping, found {}", describe(value)));
            return None;
        };

        let mut entries = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            match key.as_str() {
                Some(key) => entries.push((key, value)),
                None => self.error(
                    path,
                    format!("field names must be strings, found {}", describe(key)),
                ),
            }
        }
        Some(Fields {
            path: path.to_string(),
            entries,
        })
    }

    fn warn_unknown(&mut self, fields: &Fields<'_>, known: &[&str]) {
        for (key, _) in &fields.entries {
            if !known.contains(key) {
                self.warn(&child(&fields.path, key), format!("unknown field '{key}' ignored"));
            }
        }
    }

    /// Find a field under any of its accepted names.
    fn pick<'a>(&mut self, fields: &Fields<'a>, names: &[&str]) -> Option<(String, &'a Yaml)> {
        let found: Vec<&(&str, &Yaml)> = fields
            .entries
            .iter()
            .filter(|(k, _)| names.contains(k))
            .collect();

        let (key, value) = found.first()?;
        if found.len() > 1 {
            let spellings: Vec<String> = found.iter().map(|(k, _)| format!("'{k}'")).collect();
            self.error(
                &child(&fields.path, key),
                format!("conflicting fields {} (use one)", spellings.join(" and ")),
            );
        }
        Some((child(&fields.path, key), *value))
    }

    fn required<'a>(&mut self, fields: &Fields<'a>, names: &[&str]) -> Option<(String, &'a Yaml)> {
        let found = self.pick(fields, names);
        if found.is_none() {
            self.error(
                &fields.path,
                format!("missing required field '{}'", names[0]),
            );
        }
        found
    }

    fn string(&mut self, path: &str, value: &Yaml) -> Option<String> {
        match value {
            Yaml::String(s) => Some(s.clone()),
            other => {
                self.error(path, format!("expected a string, found {}", describe(other)));
                None
            }
        }
    }

    fn required_string(&mut self, fields: &Fields<'_>, names: &[&str]) -> Option<String> {
        let (path, value) = self.required(fields, names)?;
        self.string(&path, value)
    }

    /// Absent and `null` both read as `None`.
    fn optional_string(&mut self, fields: &Fields<'_>, names: &[&str]) -> Option<String> {
        match self.pick(fields, names)? {
            (_, Yaml::Null) => None,
            (path, value) => self.string(&path, value),
        }
    }

    fn sequence<'a>(&mut self, path: &str, value: &'a Yaml) -> &'a [Yaml] {
        match value {
            Yaml::Sequence(items) => items,
            Yaml::Null => &[],
            other => {
                self.error(path, format!("expected a list, found {}", describe(other)));
                &[]
            }
        }
    }

    fn args(&mut self, path: &str, value: &Yaml) -> Map<String, Json> {
        match value {
            Yaml::Null => Map::new(),
            Yaml::Mapping(_) => match serde_json::to_value(value) {
                Ok(Json::Object(map)) => map,
                Ok(_) => Map::new(),
                Err(e) => {
                    self.error(path, format!("arguments cannot be represented as JSON: {e}"));
                    Map::new()
                }
            },
            other => {
                self.error(path, format!("expected a mapping, found {}", describe(other)));
                Map::new()
            }
        }
    }

    // -- document structure -------------------------------------------------

    fn document(&mut self, doc: &Yaml) -> Option<WorkflowDefinition> {
        let fields = self.fields(doc, "")?;
        self.warn_unknown(&fields, ROOT_FIELDS);

        let name = self.required_string(&fields, &["name"]);
        if name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            self.error("name", "workflow name must not be empty");
        }
        let description = self.optional_string(&fields, &["description"]);

        let triggers = match self.required(&fields, &["triggers"]) {
            Some((path, value)) => self.triggers(&path, value),
            None => Vec::new(),
        };
        let steps = match self.required(&fields, &["steps"]) {
            Some((path, value)) => self.steps(&path, value),
            None => Vec::new(),
        };

        Some(WorkflowDefinition {
            name: name?,
            description,
            triggers,
            steps,
        })
    }

    fn triggers(&mut self, path: &str, value: &Yaml) -> Vec<TriggerSpec> {
        let mut triggers: Vec<TriggerSpec> = Vec::new();
        for (i, item) in self.sequence(path, value).iter().enumerate() {
            let item_path = format!("{path}[{i}]");
            let Some(trigger) = self.trigger(&item_path, item) else {
                continue;
            };
            if let Some(j) = triggers.iter().position(|t| *t == trigger) {
                self.error(&item_path, format!("duplicate of {path}[{j}]"));
            }
            triggers.push(trigger);
        }
        triggers
    }

    fn trigger(&mut self, path: &str, value: &Yaml) -> Option<TriggerSpec> {
        let fields = self.fields(value, path)?;
        let kind = self.required_string(&fields, &["kind", "type"])?;
        match kind.as_str() {
            "event" => self.event_trigger(&fields).map(TriggerSpec::Event),
            "schedule" => self.schedule_trigger(&fields).map(TriggerSpec::Schedule),
            other => {
                self.error(
                    &child(path, "kind"),
                    format!("unknown trigger kind '{other}' (expected 'event' or 'schedule')"),
                );
                None
            }
        }
    }

    fn event_trigger(&mut self, fields: &Fields<'_>) -> Option<EventTrigger> {
        self.warn_unknown(fields, EVENT_FIELDS);

        let (subject, predicate) = match self.optional_string(fields, &["event"]) {
            Some(target) => {
                let event_path = child(&fields.path, "event");
                if fields.has("subject") || fields.has("predicate") {
                    self.error(
                        &event_path,
                        "use either 'event' or 'subject'/'predicate', not both",
                    );
                }
                match split_target(&target) {
                    Some((s, p)) => (Some(s.to_string()), Some(p.to_string())),
                    None => {
                        self.error(
                            &event_path,
                            format!("event '{target}' must have the form Subject.predicate"),
                        );
                        (None, None)
                    }
                }
            }
            None => (
                self.required_string(fields, &["subject"]),
                self.required_string(fields, &["predicate"]),
            ),
        };

        let filter = self
            .optional_string(fields, &["filter"])
            .and_then(|raw| match raw.parse::<FilterExpr>() {
                Ok(filter) => Some(filter),
                Err(e) => {
                    self.error(&child(&fields.path, "filter"), e.to_string());
                    None
                }
            });

        let mut trigger = EventTrigger::new(subject?, predicate?);
        trigger.filter = filter;

        if let Some((path, value)) =
            self.pick(fields, &["context", "contextTemplate", "context_template"])
        {
            if !matches!(value, Yaml::Null) {
                let entries = self.fields(value, &path)?;
                for (key, template) in &entries.entries {
                    if let Some(template) = self.string(&child(&path, key), template) {
                        trigger = trigger.with_context(*key, template);
                    }
                }
            }
        }

        Some(trigger)
    }

    fn schedule_trigger(&mut self, fields: &Fields<'_>) -> Option<ScheduleTrigger> {
        self.warn_unknown(fields, SCHEDULE_FIELDS);
        let cron = self.required_string(fields, &["cron"])?;
        Some(ScheduleTrigger { cron })
    }

    fn steps(&mut self, path: &str, value: &Yaml) -> Vec<StepSpec> {
        self.sequence(path, value)
            .iter()
            .enumerate()
            .filter_map(|(i, item)| self.step(&format!("{path}[{i}]"), item))
            .collect()
    }

    fn step(&mut self, path: &str, value: &Yaml) -> Option<StepSpec> {
        let fields = self.fields(value, path)?;
        self.warn_unknown(&fields, STEP_FIELDS);

        let id = self.required_string(&fields, &["id"]);
        let action = self.action(&fields);
        let on_success = self.optional_string(&fields, &["on_success", "onSuccess"]);
        let on_failure = self.optional_string(&fields, &["on_failure", "onFailure"]);

        Some(StepSpec {
            id: id?,
            action: action?,
            on_success,
            on_failure,
        })
    }

    /// `action: Subject.predicate` with sibling `args`, or
    /// `action: { subject, predicate, args }`.
    fn action(&mut self, fields: &Fields<'_>) -> Option<ActionTemplate> {
        let (path, value) = self.required(fields, &["action"])?;
        let sibling_args = self.pick(fields, &["args"]);

        match value {
            Yaml::String(target) => {
                let args = match &sibling_args {
                    Some((args_path, args)) => self.args(args_path, args),
                    None => Map::new(),
                };
                let Some((subject, predicate)) = split_target(target) else {
                    self.error(
                        &path,
                        format!("action '{target}' must have the form Subject.predicate"),
                    );
                    return None;
                };
                let mut action = ActionTemplate::new(subject, predicate);
                action.args = args;
                Some(action)
            }
            Yaml::Mapping(_) => {
                if let Some((args_path, _)) = &sibling_args {
                    self.error(
                        args_path,
                        "'args' belongs inside the action mapping when the action is a mapping",
                    );
                }
                let inner = self.fields(value, &path)?;
                self.warn_unknown(&inner, ACTION_FIELDS);
                let subject = self.required_string(&inner, &["subject"]);
                let predicate = self.required_string(&inner, &["predicate"]);
                let args = match self.pick(&inner, &["args"]) {
                    Some((args_path, args)) => self.args(&args_path, args),
                    None => Map::new(),
                };
                let mut action = ActionTemplate::new(subject?, predicate?);
                action.args = args;
                Some(action)
            }
            other => {
                self.error(
                    &path,
                    format!(
                        "expected 'Subject.predicate' or a mapping, found {}",
                        describe(other)
                    ),
                );
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
