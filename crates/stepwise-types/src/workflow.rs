//! Workflow definition model.
//!
//! `WorkflowDefinition` is the in-memory shape of an authored workflow: a name,
//! the triggers that start it, and the ordered steps that make up its step
//! graph. These types carry no behaviour beyond construction helpers; parsing,
//! validation and compilation live in `stepwise-core`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// An authored workflow.
///
/// Immutable once compiled: edits require a fresh compile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name, unique within a deployment.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Activation triggers. A workflow without triggers never compiles.
    #[serde(default)]
    pub triggers: Vec<TriggerSpec>,
    /// Steps in declaration order. The first step is the entry point.
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

impl WorkflowDefinition {
    /// Create an empty definition with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            triggers: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_trigger(mut self, trigger: impl Into<TriggerSpec>) -> Self {
        self.triggers.push(trigger.into());
        self
    }

    pub fn with_step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    /// The step a run starts at: the first step in declaration order.
    pub fn entry_step(&self) -> Option<&StepSpec> {
        self.steps.first()
    }

    /// Look up a step by id.
    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.id == id)
    }
}

// ---------------------------------------------------------------------------
// Triggers
// ---------------------------------------------------------------------------

/// How a workflow is activated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerSpec {
    /// A named domain event (`Subject.predicate`).
    Event(EventTrigger),
    /// A 5-field cron schedule.
    Schedule(ScheduleTrigger),
}

impl TriggerSpec {
    /// Event trigger matching `subject.predicate` with no filter.
    pub fn event(subject: impl Into<String>, predicate: impl Into<String>) -> Self {
        TriggerSpec::Event(EventTrigger::new(subject, predicate))
    }

    /// Schedule trigger for a 5-field cron expression.
    pub fn schedule(cron: impl Into<String>) -> Self {
        TriggerSpec::Schedule(ScheduleTrigger { cron: cron.into() })
    }

    /// Short label used in logs and run metadata, e.g. `Order.created` or `cron:0 9 * * *`.
    pub fn source_label(&self) -> String {
        match self {
            TriggerSpec::Event(e) => format!("{}.{}", e.subject, e.predicate),
            TriggerSpec::Schedule(s) => format!("cron:{}", s.cron),
        }
    }
}

/// Activation on a named domain event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventTrigger {
    pub subject: String,
    pub predicate: String,
    /// Optional single-predicate filter evaluated against the event payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterExpr>,
    /// Context entries (key -> `{{placeholder}}` template) resolved when a run starts.
    #[serde(
        rename = "context",
        default,
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub context_template: BTreeMap<String, String>,
}

impl EventTrigger {
    pub fn new(subject: impl Into<String>, predicate: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            filter: None,
            context_template: BTreeMap::new(),
        }
    }

    pub fn with_filter(mut self, filter: FilterExpr) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, template: impl Into<String>) -> Self {
        self.context_template.insert(key.into(), template.into());
        self
    }
}

impl From<EventTrigger> for TriggerSpec {
    fn from(trigger: EventTrigger) -> Self {
        TriggerSpec::Event(trigger)
    }
}

/// Activation on a time schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTrigger {
    /// 5-field cron expression (minute hour day-of-month month day-of-week).
    pub cron: String,
}

impl From<ScheduleTrigger> for TriggerSpec {
    fn from(trigger: ScheduleTrigger) -> Self {
        TriggerSpec::Schedule(trigger)
    }
}

// ---------------------------------------------------------------------------
// Trigger filters
// ---------------------------------------------------------------------------

/// Comparison operator of a trigger filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl FilterOp {
    /// Longest tokens first so `>=` is not read as `>`.
    const TOKENS: [(&'static str, FilterOp); 6] = [
        ("==", FilterOp::Eq),
        ("!=", FilterOp::Ne),
        (">=", FilterOp::Ge),
        ("<=", FilterOp::Le),
        (">", FilterOp::Gt),
        ("<", FilterOp::Lt),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "==",
            FilterOp::Ne => "!=",
            FilterOp::Gt => ">",
            FilterOp::Ge => ">=",
            FilterOp::Lt => "<",
            FilterOp::Le => "<=",
        }
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced when reading a filter expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterParseError {
    #[error("filter is empty")]
    Empty,

    #[error("filter '{0}' has no comparison operator (expected one of == != > >= < <=)")]
    MissingOperator(String),

    #[error("filter '{0}' has an invalid field path")]
    InvalidPath(String),

    #[error("filter '{0}' has no value to compare against")]
    MissingValue(String),

    #[error("filter value '{0}' is not a number, boolean, null, or quoted string")]
    InvalidLiteral(String),
}

/// A single-predicate comparison against an activation payload:
/// `<path> <op> <literal>`, e.g. `total >= 100` or `payload.status == 'paid'`.
///
/// The path is rooted at the payload; a leading `payload.` is accepted and
/// dropped. An empty path addresses the whole payload.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpr {
    pub path: Vec<String>,
    pub op: FilterOp,
    pub value: Value,
}

impl FilterExpr {
    pub fn new(path: &str, op: FilterOp, value: Value) -> Self {
        Self {
            path: split_path(path),
            op,
            value,
        }
    }
}

fn split_path(path: &str) -> Vec<String> {
    if path.is_empty() || path == "payload" {
        return Vec::new();
    }
    let trimmed = path.strip_prefix("payload.").unwrap_or(path);
    trimmed.split('.').map(str::to_string).collect()
}

fn parse_literal(raw: &str, source: &str) -> Result<Value, FilterParseError> {
    if raw.is_empty() {
        return Err(FilterParseError::MissingValue(source.to_string()));
    }
    if let Some(inner) = raw.strip_prefix('\'') {
        return match inner.strip_suffix('\'') {
            Some(s) if !s.contains('\'') => Ok(Value::String(s.to_string())),
            _ => Err(FilterParseError::InvalidLiteral(raw.to_string())),
        };
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ (Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null)) => Ok(v),
        _ => Err(FilterParseError::InvalidLiteral(raw.to_string())),
    }
}

impl FromStr for FilterExpr {
    type Err = FilterParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let source = s.trim();
        if source.is_empty() {
            return Err(FilterParseError::Empty);
        }

        let path_end = source
            .find(|c: char| c.is_whitespace() || matches!(c, '=' | '!' | '<' | '>'))
            .ok_or_else(|| FilterParseError::MissingOperator(source.to_string()))?;
        let raw_path = &source[..path_end];
        if raw_path.is_empty()
            || raw_path.starts_with('.')
            || raw_path.ends_with('.')
            || raw_path.contains("..")
        {
            return Err(FilterParseError::InvalidPath(source.to_string()));
        }

        let rest = source[path_end..].trim_start();
        let (op, rest) = FilterOp::TOKENS
            .iter()
            .find_map(|(token, op)| rest.strip_prefix(token).map(|r| (*op, r)))
            .ok_or_else(|| FilterParseError::MissingOperator(source.to_string()))?;

        let value = parse_literal(rest.trim(), source)?;

        Ok(Self {
            path: split_path(raw_path),
            op,
            value,
        })
    }
}

impl fmt::Display for FilterExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str("payload")?;
        } else {
            f.write_str(&self.path.join("."))?;
        }
        write!(f, " {} ", self.op)?;
        match &self.value {
            Value::String(s) if !s.contains('\'') => write!(f, "'{s}'"),
            other => write!(f, "{other}"),
        }
    }
}

impl Serialize for FilterExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FilterExpr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// Split a `Subject.predicate` target at its last dot.
///
/// Subjects may be namespaced (`billing.Invoice.issue`); the predicate is
/// always the final segment. Returns `None` when either side is empty.
pub fn split_target(target: &str) -> Option<(&str, &str)> {
    let (subject, predicate) = target.trim().rsplit_once('.')?;
    if subject.is_empty() || predicate.is_empty() {
        return None;
    }
    Some((subject, predicate))
}

/// A `Subject.predicate(args)` invocation template.
///
/// String values inside `args` may contain `{{path}}` placeholders, resolved
/// against the run context just before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTemplate {
    pub subject: String,
    pub predicate: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub args: Map<String, Value>,
}

impl ActionTemplate {
    pub fn new(subject: impl Into<String>, predicate: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            args: Map::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for ActionTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.subject, self.predicate)
    }
}

/// One node in the step graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSpec {
    /// Unique within the workflow; also the key for this step's output.
    pub id: String,
    pub action: ActionTemplate,
    /// Next step after success. `None` ends the run successfully.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,
    /// Next step after failure. `None` fails the run at this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
}

impl StepSpec {
    pub fn new(id: impl Into<String>, action: ActionTemplate) -> Self {
        Self {
            id: id.into(),
            action,
            on_success: None,
            on_failure: None,
        }
    }

    pub fn with_success(mut self, next: impl Into<String>) -> Self {
        self.on_success = Some(next.into());
        self
    }

    pub fn with_failure(mut self, next: impl Into<String>) -> Self {
        self.on_failure = Some(next.into());
        self
    }

    /// Both transition targets, success first.
    pub fn transitions(&self) -> impl Iterator<Item = &str> {
        self.on_success
            .as_deref()
            .into_iter()
            .chain(self.on_failure.as_deref())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // -----------------------------------------------------------------------
    // Filter expressions
    // -----------------------------------------------------------------------

    #[test]
    fn filter_parses_string_equality() {
        let f: FilterExpr = "status == 'paid'".parse().unwrap();
        assert_eq!(f.path, vec!["status"]);
        assert_eq!(f.op, FilterOp::Eq);
        assert_eq!(f.value, json!("paid"));
    }

    #[test]
    fn filter_strips_payload_prefix_and_reads_numbers() {
        let f: FilterExpr = "payload.order.total>=100.5".parse().unwrap();
        assert_eq!(f.path, vec!["order", "total"]);
        assert_eq!(f.op, FilterOp::Ge);
        assert_eq!(f.value, json!(100.5));
    }

    #[test]
    fn filter_accepts_double_quoted_bool_and_null() {
        let f: FilterExpr = r#"region != "eu""#.parse().unwrap();
        assert_eq!(f.value, json!("eu"));
        let f: FilterExpr = "flagged == true".parse().unwrap();
        assert_eq!(f.value, json!(true));
        let f: FilterExpr = "deleted_at == null".parse().unwrap();
        assert_eq!(f.value, Value::Null);
    }

    #[test]
    fn filter_rejects_compound_expressions() {
        let err = "a == 1 && b == 2".parse::<FilterExpr>().unwrap_err();
        assert!(matches!(err, FilterParseError::InvalidLiteral(_)), "got: {err:?}");
    }

    #[test]
    fn filter_rejects_missing_operator_and_value() {
        assert!(matches!(
            "status".parse::<FilterExpr>().unwrap_err(),
            FilterParseError::MissingOperator(_)
        ));
        assert!(matches!(
            "status ==".parse::<FilterExpr>().unwrap_err(),
            FilterParseError::MissingValue(_)
        ));
        assert!(matches!(
            "status ~ 'x'".parse::<FilterExpr>().unwrap_err(),
            FilterParseError::MissingOperator(_)
        ));
        assert_eq!("  ".parse::<FilterExpr>().unwrap_err(), FilterParseError::Empty);
    }

    #[test]
    fn filter_rejects_bare_words() {
        let err = "status == paid".parse::<FilterExpr>().unwrap_err();
        assert!(matches!(err, FilterParseError::InvalidLiteral(_)));
    }

    #[test]
    fn filter_display_reparses_to_same_expression() {
        for src in ["status == 'paid'", "total > 10", "payload != null", "a.b <= -3"] {
            let f: FilterExpr = src.parse().unwrap();
            let again: FilterExpr = f.to_string().parse().unwrap();
            assert_eq!(f, again, "{src}");
        }
    }

    // -----------------------------------------------------------------------
    // Targets and builders
    // -----------------------------------------------------------------------

    #[test]
    fn split_target_uses_last_dot() {
        assert_eq!(split_target("Order.created"), Some(("Order", "created")));
        assert_eq!(
            split_target("billing.Invoice.issue"),
            Some(("billing.Invoice", "issue"))
        );
        assert_eq!(split_target("Order"), None);
        assert_eq!(split_target(".created"), None);
        assert_eq!(split_target("Order."), None);
    }

    #[test]
    fn builders_assemble_definition() {
        let def = WorkflowDefinition::new("order-flow")
            .with_trigger(EventTrigger::new("Order", "created").with_context("id", "{{trigger.id}}"))
            .with_trigger(TriggerSpec::schedule("0 9 * * *"))
            .with_step(
                StepSpec::new("a", ActionTemplate::new("Inventory", "check").with_arg("sku", "x"))
                    .with_success("b")
                    .with_failure("c"),
            )
            .with_step(StepSpec::new("b", ActionTemplate::new("Payment", "charge")))
            .with_step(StepSpec::new("c", ActionTemplate::new("Team", "notify")));

        assert_eq!(def.entry_step().map(|s| s.id.as_str()), Some("a"));
        assert_eq!(def.step("a").unwrap().transitions().collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(def.triggers[0].source_label(), "Order.created");
        assert_eq!(def.triggers[1].source_label(), "cron:0 9 * * *");
    }

    #[test]
    fn trigger_serializes_with_kind_tag() {
        let trigger: TriggerSpec = EventTrigger::new("Order", "created")
            .with_filter("total > 5".parse().unwrap())
            .into();
        let value = serde_json::to_value(&trigger).unwrap();
        assert_eq!(value["kind"], json!("event"));
        assert_eq!(value["filter"], json!("total > 5"));
        assert!(value.get("context").is_none());

        let parsed: TriggerSpec = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, trigger);
    }
}
