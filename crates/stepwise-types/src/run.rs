//! Activations and per-run state.
//!
//! An `Activation` is what arrives from the outside world (a domain event or a
//! schedule tick). Each matching workflow gets its own fresh `RunContext`,
//! which the execution engine fills in as steps complete.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::workflow::TriggerSpec;

// ---------------------------------------------------------------------------
// Activations
// ---------------------------------------------------------------------------

/// An inbound notification that may start workflow runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Activation {
    Event(EventActivation),
    Schedule(ScheduleTick),
}

impl Activation {
    /// The data placeholders see under the `trigger` root.
    ///
    /// Events expose their payload; ticks expose `{ cron, fired_at }`.
    pub fn payload(&self) -> Value {
        match self {
            Activation::Event(e) => e.payload.clone(),
            Activation::Schedule(t) => json!({
                "cron": t.cron,
                "fired_at": t.fired_at.to_rfc3339(),
            }),
        }
    }

    pub fn source_label(&self) -> String {
        match self {
            Activation::Event(e) => format!("{}.{}", e.subject, e.predicate),
            Activation::Schedule(t) => format!("cron:{}", t.cron),
        }
    }
}

/// A domain event raised by the event source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventActivation {
    pub subject: String,
    pub predicate: String,
    #[serde(default)]
    pub payload: Value,
}

impl EventActivation {
    pub fn new(subject: impl Into<String>, predicate: impl Into<String>, payload: Value) -> Self {
        Self {
            subject: subject.into(),
            predicate: predicate.into(),
            payload,
        }
    }
}

impl From<EventActivation> for Activation {
    fn from(event: EventActivation) -> Self {
        Activation::Event(event)
    }
}

/// A fired schedule tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTick {
    pub cron: String,
    pub fired_at: DateTime<Utc>,
}

impl From<ScheduleTick> for Activation {
    fn from(tick: ScheduleTick) -> Self {
        Activation::Schedule(tick)
    }
}

// ---------------------------------------------------------------------------
// Step outputs
// ---------------------------------------------------------------------------

/// Step outputs keyed by step id, in execution order.
///
/// Append-only: a step id can be recorded once. Serializes as a JSON object
/// whose key order is the execution order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOutputs {
    entries: Vec<(String, Value)>,
}

impl StepOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a step's output. Returns `false` (and keeps the first value)
    /// when the step already has one.
    pub fn insert(&mut self, step_id: impl Into<String>, value: Value) -> bool {
        let step_id = step_id.into();
        if self.contains(&step_id) {
            return false;
        }
        self.entries.push((step_id, value));
        true
    }

    pub fn get(&self, step_id: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(id, _)| id == step_id)
            .map(|(_, v)| v)
    }

    pub fn contains(&self, step_id: &str) -> bool {
        self.entries.iter().any(|(id, _)| id == step_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(id, v)| (id.as_str(), v))
    }

    /// Step ids in execution order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy into a JSON object (key order follows `serde_json`'s map).
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(id, v)| (id.clone(), v.clone()))
                .collect::<Map<String, Value>>(),
        )
    }
}

impl Serialize for StepOutputs {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, value) in &self.entries {
            map.serialize_entry(id, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for StepOutputs {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = StepOutputs;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of step id to output")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut outputs = StepOutputs::new();
                while let Some((id, value)) = access.next_entry::<String, Value>()? {
                    outputs.insert(id, value);
                }
                Ok(outputs)
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

// ---------------------------------------------------------------------------
// Run context
// ---------------------------------------------------------------------------

/// Identity and provenance of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    /// UUIDv7 run id.
    pub run_id: Uuid,
    pub workflow: String,
    pub started_at: DateTime<Utc>,
    /// Label of the activation that started the run (e.g. `Order.created`).
    pub trigger_source: String,
}

/// Outcome of a single step attempt within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
}

/// Trace entry for one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Mutable state of one workflow run.
///
/// Created fresh per run and touched only by the execution engine.
/// `step_outputs` is append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub metadata: RunMetadata,
    /// The trigger that matched.
    pub trigger: TriggerSpec,
    /// Activation data visible to placeholders under `trigger`.
    pub payload: Value,
    /// Author-supplied context merged with activation data.
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub step_outputs: StepOutputs,
    /// Every executed step, failures included.
    #[serde(default)]
    pub trace: Vec<StepRecord>,
}

impl RunContext {
    /// Fresh context for a run of `workflow` started by `activation`.
    pub fn new(workflow: impl Into<String>, trigger: TriggerSpec, activation: &Activation) -> Self {
        Self {
            metadata: RunMetadata {
                run_id: Uuid::now_v7(),
                workflow: workflow.into(),
                started_at: Utc::now(),
                trigger_source: activation.source_label(),
            },
            trigger,
            payload: activation.payload(),
            context: Map::new(),
            step_outputs: StepOutputs::new(),
            trace: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }

    pub fn run_id(&self) -> Uuid {
        self.metadata.run_id
    }

    /// Id of the most recent step that completed successfully.
    pub fn last_completed_step(&self) -> Option<&str> {
        self.trace
            .iter()
            .rev()
            .find(|r| r.status == StepStatus::Succeeded)
            .map(|r| r.step_id.as_str())
    }
}

// ---------------------------------------------------------------------------
// Run records
// ---------------------------------------------------------------------------

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Persistable summary of a run, keyed by run id in a run store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub context: RunContext,
}

impl RunRecord {
    pub fn run_id(&self) -> Uuid {
        self.context.metadata.run_id
    }

    pub fn workflow(&self) -> &str {
        &self.context.metadata.workflow
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
