//! The action dispatch port and in-process dispatchers.
//!
//! The engine performs every `Subject.predicate(args)` call through an
//! [`ActionDispatcher`]; it never interprets the result beyond storing it.
//! Concrete transports (HTTP and the like) live in `stepwise-infra`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{json, Map, Value};

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// Errors reported by a dispatcher. Every variant is an ordinary step
/// failure, eligible for `on_failure` routing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("action {action} failed: {message}")]
    Failed { action: String, message: String },

    #[error("action {action} timed out after {}s", timeout.as_secs_f64())]
    Timeout { action: String, timeout: Duration },

    #[error("no handler for action {0}")]
    UnknownAction(String),
}

impl DispatchError {
    pub fn failed(subject: &str, predicate: &str, message: impl Into<String>) -> Self {
        DispatchError::Failed {
            action: format!("{subject}.{predicate}"),
            message: message.into(),
        }
    }
}

/// Performs one semantic action and returns its JSON result.
///
/// Uses native async fn in traits (RPITIT), so implementations write plain
/// `async fn dispatch(...)`. Timeouts and retries are the implementation's
/// business.
pub trait ActionDispatcher: Send + Sync {
    fn dispatch(
        &self,
        subject: &str,
        predicate: &str,
        args: Map<String, Value>,
    ) -> impl Future<Output = Result<Value, DispatchError>> + Send;
}

impl<D: ActionDispatcher> ActionDispatcher for Arc<D> {
    fn dispatch(
        &self,
        subject: &str,
        predicate: &str,
        args: Map<String, Value>,
    ) -> impl Future<Output = Result<Value, DispatchError>> + Send {
        (**self).dispatch(subject, predicate, args)
    }
}

// ---------------------------------------------------------------------------
// Registry dispatcher
// ---------------------------------------------------------------------------

/// Handler invoked for one `Subject.predicate`.
pub type ActionHandler =
    Arc<dyn Fn(Map<String, Value>) -> BoxFuture<'static, Result<Value, String>> + Send + Sync>;

/// Lookup table of `Subject.predicate` -> async handler.
///
/// Records every dispatched action name so embedders and tests can see what
/// ran. An optional timeout bounds each handler call.
#[derive(Default)]
pub struct RegistryDispatcher {
    handlers: HashMap<String, ActionHandler>,
    timeout: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl RegistryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Register an async handler. A later registration for the same action
    /// replaces the earlier one.
    pub fn register<F, Fut>(&mut self, action: impl Into<String>, handler: F)
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        let boxed: ActionHandler =
            Arc::new(move |args| -> BoxFuture<'static, Result<Value, String>> {
                Box::pin(handler(args))
            });
        self.handlers.insert(action.into(), boxed);
    }

    /// Builder form of [`register`](Self::register).
    pub fn on<F, Fut>(mut self, action: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Map<String, Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, String>> + Send + 'static,
    {
        self.register(action, handler);
        self
    }

    /// Names of dispatched actions, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

impl ActionDispatcher for RegistryDispatcher {
    async fn dispatch(
        &self,
        subject: &str,
        predicate: &str,
        args: Map<String, Value>,
    ) -> Result<Value, DispatchError> {
        let action = format!("{subject}.{predicate}");
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(action.clone());
        }

        let handler = self
            .handlers
            .get(&action)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownAction(action.clone()))?;

        let call = handler(args);
        let result = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, call)
                .await
                .map_err(|_| DispatchError::Timeout {
                    action: action.clone(),
                    timeout,
                })?,
            None => call.await,
        };

        result.map_err(|message| DispatchError::Failed { action, message })
    }
}

impl std::fmt::Debug for RegistryDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut actions: Vec<&String> = self.handlers.keys().collect();
        actions.sort();
        f.debug_struct("RegistryDispatcher")
            .field("actions", &actions)
            .field("timeout", &self.timeout)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Echo dispatcher
// ---------------------------------------------------------------------------

/// Succeeds for every action, returning `{ subject, predicate, args }`.
///
/// Used for dry runs where no real endpoints exist.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoDispatcher;

impl ActionDispatcher for EchoDispatcher {
    async fn dispatch(
        &self,
        subject: &str,
        predicate: &str,
        args: Map<String, Value>,
    ) -> Result<Value, DispatchError> {
        tracing::debug!(subject, predicate, "echo dispatch");
        Ok(json!({
            "subject": subject,
            "predicate": predicate,
            "args": args,
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[tokio::test]
    async fn registry_routes_to_handler() {
        let dispatcher = RegistryDispatcher::new()
            .on("Inventory.check", |args| async move { Ok(json!({ "ok": true, "sku": args["sku"] })) });

        let out = dispatcher
            .dispatch("Inventory", "check", args(json!({ "sku": "x-1" })))
            .await
            .unwrap();
        assert_eq!(out, json!({ "ok": true, "sku": "x-1" }));
        assert_eq!(dispatcher.calls(), vec!["Inventory.check"]);
    }

    #[tokio::test]
    async fn handler_error_becomes_failed() {
        let dispatcher =
            RegistryDispatcher::new().on("Payment.charge", |_| async { Err("card declined".to_string()) });
        let err = dispatcher
            .dispatch("Payment", "charge", Map::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            DispatchError::Failed {
                action: "Payment.charge".to_string(),
                message: "card declined".to_string()
            }
        );
        assert_eq!(err.to_string(), "action Payment.charge failed: card declined");
    }

    #[tokio::test]
    async fn unknown_action_is_reported_and_recorded() {
        let dispatcher = RegistryDispatcher::new();
        let err = dispatcher.dispatch("Ghost", "boo", Map::new()).await.unwrap_err();
        assert_eq!(err, DispatchError::UnknownAction("Ghost.boo".to_string()));
        assert_eq!(dispatcher.calls(), vec!["Ghost.boo"]);
    }

    #[tokio::test]
    async fn slow_handler_times_out() {
        let dispatcher = RegistryDispatcher::new()
            .with_timeout(Duration::from_millis(20))
            .on("Slow.call", |_| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(Value::Null)
            });
        let err = dispatcher.dispatch("Slow", "call", Map::new()).await.unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { ref action, .. } if action == "Slow.call"));
    }

    #[tokio::test]
    async fn arc_forwards_to_inner() {
        let dispatcher = Arc::new(RegistryDispatcher::new().on("A.b", |_| async { Ok(json!(1)) }));
        assert_eq!(dispatcher.dispatch("A", "b", Map::new()).await.unwrap(), json!(1));
    }

    #[tokio::test]
    async fn echo_returns_call_shape() {
        let out = EchoDispatcher
            .dispatch("Team", "notify", args(json!({ "msg": "hi" })))
            .await
            .unwrap();
        assert_eq!(
            out,
            json!({ "subject": "Team", "predicate": "notify", "args": { "msg": "hi" } })
        );
    }
}
