//! Trigger service: activation in, independent workflow runs out.
//!
//! `TriggerService` subscribes to the activation bus, asks the
//! [`TriggerRouter`] which workflows an activation starts, and spawns one
//! engine run per match. Runs share nothing but the engine (which holds no
//! per-run state) and a semaphore bounding how many run at once. Finished
//! runs are announced on a broadcast channel of [`RunReport`]s.

use std::sync::Arc;

use stepwise_types::run::Activation;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::workflow::dispatcher::ActionDispatcher;
use crate::workflow::executor::{RunReport, WorkflowEngine};
use crate::workflow::trigger::{RouteMatch, TriggerRouter};

/// Capacity of the run report channel.
const REPORT_CHANNEL_CAPACITY: usize = 256;

/// Routes activations to workflow runs.
pub struct TriggerService<D> {
    router: TriggerRouter,
    engine: Arc<WorkflowEngine<D>>,
    permits: Arc<Semaphore>,
    reports: broadcast::Sender<RunReport>,
    cancel: CancellationToken,
}

impl<D: ActionDispatcher + 'static> TriggerService<D> {
    /// Create a service executing at most `max_concurrent_runs` runs at once
    /// (at least one).
    pub fn new(router: TriggerRouter, engine: WorkflowEngine<D>, max_concurrent_runs: usize) -> Self {
        let (reports, _) = broadcast::channel(REPORT_CHANNEL_CAPACITY);
        Self {
            router,
            engine: Arc::new(engine),
            permits: Arc::new(Semaphore::new(max_concurrent_runs.max(1))),
            reports,
            cancel: CancellationToken::new(),
        }
    }

    pub fn router(&self) -> &TriggerRouter {
        &self.router
    }

    pub fn engine(&self) -> &WorkflowEngine<D> {
        &self.engine
    }

    /// Receive a report for every run that finishes from now on.
    pub fn subscribe_reports(&self) -> broadcast::Receiver<RunReport> {
        self.reports.subscribe()
    }

    /// Token cancelled by [`shutdown`](Self::shutdown). In-flight runs stop
    /// before their next step.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Route one activation and spawn a run per match.
    pub async fn handle(&self, activation: &Activation) -> Vec<JoinHandle<RunReport>> {
        let matches = self.router.route(activation).await;
        if matches.is_empty() {
            tracing::debug!(
                activation = activation.source_label().as_str(),
                "no workflow matched"
            );
        }
        matches.into_iter().map(|m| self.spawn_run(m)).collect()
    }

    /// Route one activation and wait for every run it started.
    ///
    /// A run task that panicked is logged and omitted.
    pub async fn dispatch(&self, activation: &Activation) -> Vec<RunReport> {
        let mut results = Vec::new();
        for handle in self.handle(activation).await {
            match handle.await {
                Ok(report) => results.push(report),
                Err(e) => tracing::error!(error = %e, "workflow run task failed"),
            }
        }
        results
    }

    /// Consume activations from `receiver` until shutdown or until every
    /// sender is gone.
    pub async fn run(&self, mut receiver: broadcast::Receiver<Activation>) {
        tracing::info!("trigger service started");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                received = receiver.recv() => match received {
                    Ok(activation) => {
                        // Runs are detached; results arrive on the report channel.
                        drop(self.handle(&activation).await);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "trigger service lagged; activations dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        tracing::info!("trigger service stopped");
    }

    /// Stop consuming activations and cancel in-flight runs between steps.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn spawn_run(&self, route: RouteMatch) -> JoinHandle<RunReport> {
        let engine = Arc::clone(&self.engine);
        let permits = Arc::clone(&self.permits);
        let reports = self.reports.clone();
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            // The semaphore is never closed, so acquire only fails if it is.
            let _permit = permits.acquire_owned().await.ok();
            let RouteMatch { workflow, context } = route;
            let report = engine
                .execute_with_cancel(&workflow.graph, context, &cancel)
                .await;
            // No subscribers is fine; the caller may still await the handle.
            let _ = reports.send(report.clone());
            report
        })
    }
}

impl<D> std::fmt::Debug for TriggerService<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerService")
            .field("available_permits", &self.permits.available_permits())
            .field("report_receivers", &self.reports.receiver_count())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;
    use stepwise_types::run::{EventActivation, RunStatus};

    use crate::event::EventBus;
    use crate::workflow::compiler::compile_source;
    use crate::workflow::dispatcher::RegistryDispatcher;

    const FLOW: &str = r#"
name: greet
triggers:
  - kind: event
    event: User.created
steps:
  - id: hello
    action: Mail.send
    args: { to: "{{trigger.email}}" }
"#;

    async fn service() -> TriggerService<RegistryDispatcher> {
        let router = TriggerRouter::new();
        router.deploy(compile_source(FLOW).unwrap()).await.unwrap();
        let dispatcher = RegistryDispatcher::new()
            .on("Mail.send", |args| async move { Ok(json!({ "sent_to": args["to"] })) });
        TriggerService::new(router, WorkflowEngine::new(dispatcher), 2)
    }

    fn user_created() -> Activation {
        EventActivation::new("User", "created", json!({ "email": "a@example.com" })).into()
    }

    #[tokio::test]
    async fn dispatch_runs_each_match() {
        let service = service().await;
        let results = service.dispatch(&user_created()).await;
        assert_eq!(results.len(), 1);
        let report = &results[0];
        assert_eq!(report.status(), RunStatus::Completed);
        assert_eq!(
            report.context.step_outputs.get("hello"),
            Some(&json!({ "sent_to": "a@example.com" }))
        );
    }

    #[tokio::test]
    async fn unmatched_activation_starts_nothing() {
        let service = service().await;
        let activation: Activation = EventActivation::new("User", "deleted", json!({})).into();
        assert!(service.dispatch(&activation).await.is_empty());
        assert!(service.engine().dispatcher().calls().is_empty());
    }

    #[tokio::test]
    async fn run_loop_publishes_reports_until_shutdown() {
        let service = Arc::new(service().await);
        let bus = EventBus::new(16);
        let mut reports = service.subscribe_reports();

        let runner = {
            let service = Arc::clone(&service);
            let receiver = bus.subscribe();
            tokio::spawn(async move { service.run(receiver).await })
        };

        bus.publish(user_created());
        let report = tokio::time::timeout(Duration::from_secs(5), reports.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.workflow(), "greet");

        service.shutdown();
        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_cancels_new_runs() {
        let service = service().await;
        service.shutdown();
        let results = service.dispatch(&user_created()).await;
        assert_eq!(results[0].status(), RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn broken_graph_still_reports_the_run() {
        use stepwise_types::graph::{CompiledStep, ExecutableStepGraph};
        use stepwise_types::workflow::{ActionTemplate, StepSpec, TriggerSpec, WorkflowDefinition};

        use crate::workflow::executor::{EngineError, RunOutcome};
        use crate::workflow::trigger::DeployedWorkflow;

        // Deployed without validation: the only step points at a missing one.
        let definition = WorkflowDefinition::new("dangling")
            .with_trigger(TriggerSpec::event("Order", "created"))
            .with_step(StepSpec::new("a", ActionTemplate::new("Mail", "send")).with_success("ghost"));
        let graph = ExecutableStepGraph {
            workflow: "dangling".to_string(),
            entry: "a".to_string(),
            steps: vec![CompiledStep {
                id: "a".to_string(),
                action: ActionTemplate::new("Mail", "send"),
                on_success: Some("ghost".to_string()),
                on_failure: None,
                placeholders: Vec::new(),
            }],
            fingerprint: String::new(),
        };
        let router = TriggerRouter::new();
        router.deploy(DeployedWorkflow { definition, graph }).await.unwrap();
        let dispatcher = RegistryDispatcher::new().on("Mail.send", |_| async { Ok(json!(true)) });
        let service = TriggerService::new(router, WorkflowEngine::new(dispatcher), 1);
        let mut reports = service.subscribe_reports();

        let activation: Activation = EventActivation::new("Order", "created", json!({})).into();
        let results = service.dispatch(&activation).await;
        assert_eq!(results.len(), 1);

        let report = reports.try_recv().unwrap();
        assert_eq!(report.run_id(), results[0].run_id());
        assert_eq!(report.status(), RunStatus::Failed);
        assert!(matches!(
            &report.outcome,
            RunOutcome::Aborted { error: EngineError::UnknownStep { step_id, .. } } if step_id == "ghost"
        ));
        let record = report.to_record();
        assert_eq!(record.failed_step.as_deref(), Some("ghost"));
        assert_eq!(record.context.trace.len(), 1);
    }
}
