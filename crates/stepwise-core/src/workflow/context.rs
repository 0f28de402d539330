//! Run context construction and placeholder scopes.
//!
//! A run's `context` is assembled from activation data (the event's subject
//! and predicate, or the tick's cron and fire time) plus the trigger's
//! author-supplied context template. During execution, action arguments are
//! resolved against the whole `RunContext` through the roots listed in
//! [`RESERVED_ROOTS`], with any other first segment read as a step id.

use serde_json::{json, Map, Value};
use stepwise_types::run::{Activation, EventActivation, RunContext};
use stepwise_types::workflow::{EventTrigger, TriggerSpec};

use super::template::{descend, resolve_str, PlaceholderScope, TemplateError};

/// Placeholder roots that never name a step.
pub const RESERVED_ROOTS: [&str; 4] = ["trigger", "context", "steps", "run"];

// ---------------------------------------------------------------------------
// Run-time scope
// ---------------------------------------------------------------------------

/// Roots:
/// - `trigger.<path>` -- activation payload (or `{ cron, fired_at }` for ticks)
/// - `context.<key>.<path>` -- the run context map
/// - `steps.<id>.<path>` or `<id>.<path>` -- a completed step's output
/// - `run.<field>` -- run id, workflow, started_at, trigger_source
impl PlaceholderScope for RunContext {
    fn lookup(&self, path: &[&str]) -> Option<Value> {
        let (root, rest) = path.split_first()?;
        match *root {
            "trigger" => descend(&self.payload, rest).cloned(),
            "context" => {
                let (key, rest) = rest.split_first()?;
                descend(self.context.get(*key)?, rest).cloned()
            }
            "steps" => {
                let (id, rest) = rest.split_first()?;
                descend(self.step_outputs.get(id)?, rest).cloned()
            }
            "run" => {
                let meta = json!({
                    "id": self.metadata.run_id.to_string(),
                    "workflow": self.metadata.workflow,
                    "started_at": self.metadata.started_at.to_rfc3339(),
                    "trigger_source": self.metadata.trigger_source,
                });
                descend(&meta, rest).cloned()
            }
            id => descend(self.step_outputs.get(id)?, rest).cloned(),
        }
    }
}

/// Scope for context templates, evaluated before a run exists.
///
/// Both `payload.<path>` and `trigger.<path>` address the activation payload.
pub struct ActivationScope<'a> {
    payload: &'a Value,
}

impl<'a> ActivationScope<'a> {
    pub fn new(payload: &'a Value) -> Self {
        Self { payload }
    }
}

impl PlaceholderScope for ActivationScope<'_> {
    fn lookup(&self, path: &[&str]) -> Option<Value> {
        let (root, rest) = path.split_first()?;
        match *root {
            "payload" | "trigger" => descend(self.payload, rest).cloned(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Context assembly
// ---------------------------------------------------------------------------

/// Build the context map for an event-triggered run.
///
/// Starts with `subject` and `predicate` of the event, then layers the
/// resolved context template on top (author keys win).
pub fn event_context(
    trigger: &EventTrigger,
    event: &EventActivation,
) -> Result<Map<String, Value>, TemplateError> {
    let mut context = Map::new();
    context.insert("subject".to_string(), Value::String(event.subject.clone()));
    context.insert("predicate".to_string(), Value::String(event.predicate.clone()));

    let scope = ActivationScope::new(&event.payload);
    for (key, template) in &trigger.context_template {
        context.insert(key.clone(), resolve_str(template, &scope)?);
    }
    Ok(context)
}

/// Create a fresh run context for `workflow`, started by `activation`
/// through `trigger`.
pub fn new_run_context(
    workflow: &str,
    trigger: &TriggerSpec,
    activation: &Activation,
) -> Result<RunContext, TemplateError> {
    let context = match (trigger, activation) {
        (TriggerSpec::Event(t), Activation::Event(e)) => event_context(t, e)?,
        (_, Activation::Schedule(tick)) => {
            let mut context = Map::new();
            context.insert("cron".to_string(), Value::String(tick.cron.clone()));
            context.insert(
                "fired_at".to_string(),
                Value::String(tick.fired_at.to_rfc3339()),
            );
            context
        }
        (_, Activation::Event(e)) => {
            let mut context = Map::new();
            context.insert("subject".to_string(), Value::String(e.subject.clone()));
            context.insert("predicate".to_string(), Value::String(e.predicate.clone()));
            context
        }
    };

    Ok(RunContext::new(workflow, trigger.clone(), activation).with_context(context))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stepwise_types::run::ScheduleTick;

    fn order_event() -> EventActivation {
        EventActivation::new(
            "Order",
            "created",
            json!({ "id": "o-1", "customer": { "email": "a@b.c" }, "total": 42 }),
        )
    }

    fn run_context() -> RunContext {
        let trigger = EventTrigger::new("Order", "created").with_context("email", "{{payload.customer.email}}");
        let mut ctx = new_run_context(
            "order-flow",
            &TriggerSpec::Event(trigger),
            &Activation::Event(order_event()),
        )
        .unwrap();
        ctx.step_outputs
            .insert("check-inventory", json!({ "ok": true, "reserved": [1, 2] }));
        ctx
    }

    fn look(ctx: &RunContext, path: &str) -> Option<Value> {
        let segments: Vec<&str> = path.split('.').collect();
        ctx.lookup(&segments)
    }

    #[test]
    fn event_context_merges_activation_and_template() {
        let ctx = run_context();
        assert_eq!(ctx.context["subject"], json!("Order"));
        assert_eq!(ctx.context["predicate"], json!("created"));
        assert_eq!(ctx.context["email"], json!("a@b.c"));
    }

    #[test]
    fn author_keys_override_activation_data() {
        let trigger = EventTrigger::new("Order", "created").with_context("subject", "custom");
        let ctx = event_context(&trigger, &order_event()).unwrap();
        assert_eq!(ctx["subject"], json!("custom"));
    }

    #[test]
    fn context_template_failure_is_reported() {
        let trigger = EventTrigger::new("Order", "created").with_context("x", "{{payload.nope}}");
        let err = event_context(&trigger, &order_event()).unwrap_err();
        assert_eq!(err, TemplateError::Unresolved("payload.nope".to_string()));
    }

    #[test]
    fn lookup_covers_every_root() {
        let ctx = run_context();
        assert_eq!(look(&ctx, "trigger.total"), Some(json!(42)));
        assert_eq!(look(&ctx, "context.email"), Some(json!("a@b.c")));
        assert_eq!(look(&ctx, "steps.check-inventory.ok"), Some(json!(true)));
        assert_eq!(look(&ctx, "check-inventory.reserved.1"), Some(json!(2)));
        assert_eq!(look(&ctx, "run.workflow"), Some(json!("order-flow")));
        assert_eq!(
            look(&ctx, "run.id"),
            Some(json!(ctx.metadata.run_id.to_string()))
        );
        assert_eq!(look(&ctx, "check-inventory"), Some(json!({ "ok": true, "reserved": [1, 2] })));
    }

    #[test]
    fn lookup_misses_return_none() {
        let ctx = run_context();
        assert_eq!(look(&ctx, "process-payment.id"), None);
        assert_eq!(look(&ctx, "steps"), None);
        assert_eq!(look(&ctx, "context"), None);
        assert_eq!(look(&ctx, "trigger.customer.phone"), None);
    }

    #[test]
    fn schedule_context_carries_tick() {
        let fired_at = Utc::now();
        let activation = Activation::Schedule(ScheduleTick {
            cron: "0 9 * * *".to_string(),
            fired_at,
        });
        let ctx = new_run_context("nightly", &TriggerSpec::schedule("0 9 * * *"), &activation).unwrap();
        assert_eq!(ctx.context["cron"], json!("0 9 * * *"));
        assert_eq!(look(&ctx, "trigger.cron"), Some(json!("0 9 * * *")));
        assert_eq!(ctx.metadata.trigger_source, "cron:0 9 * * *");
    }
}
