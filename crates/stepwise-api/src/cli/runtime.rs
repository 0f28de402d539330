//! Commands that execute workflows: `run`, `emit`, `serve`, and `runs` for
//! reading back what they stored.
//!
//! Every finished run is persisted through the run store.

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use console::style;
use serde_json::{json, Value};
use stepwise_core::event::EventBus;
use stepwise_core::repository::RunStore;
use stepwise_core::service::TriggerService;
use stepwise_core::workflow::scheduler::CronScheduler;
use stepwise_core::workflow::{compile_source, RunOutcome, RunReport, TriggerRouter, WorkflowEngine};
use stepwise_types::run::{Activation, EventActivation, RunRecord, ScheduleTick, StepOutputs};
use stepwise_types::workflow::{split_target, TriggerSpec};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use super::document::read_source;
use super::output::{print_diagnostics, print_json, print_run, print_run_table};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Activations
// ---------------------------------------------------------------------------

/// `--payload` as JSON, `{}` when absent.
pub fn parse_payload(raw: Option<&str>) -> Result<Value> {
    match raw {
        Some(raw) => serde_json::from_str(raw).context("invalid JSON payload"),
        None => Ok(json!({})),
    }
}

/// An event activation from a `Subject.predicate` argument.
pub fn event_activation(event: &str, payload: Value) -> Result<Activation> {
    let (subject, predicate) = split_target(event)
        .with_context(|| format!("expected an event as Subject.predicate, got '{event}'"))?;
    Ok(EventActivation::new(subject, predicate, payload).into())
}

/// An activation that satisfies `trigger` (filters aside). Schedule
/// triggers get a tick fired now.
fn activation_for(trigger: &TriggerSpec, payload: Value) -> Activation {
    match trigger {
        TriggerSpec::Event(e) => EventActivation::new(&e.subject, &e.predicate, payload).into(),
        TriggerSpec::Schedule(s) => ScheduleTick {
            cron: s.cron.clone(),
            fired_at: Utc::now(),
        }
        .into(),
    }
}

fn success_outputs(report: &RunReport) -> Option<&StepOutputs> {
    match &report.outcome {
        RunOutcome::Completed { outputs } => Some(outputs),
        _ => None,
    }
}

async fn persist(state: &AppState, report: &RunReport) -> Result<RunRecord> {
    let record = report.to_record();
    state
        .runs
        .save_run(&record)
        .await
        .with_context(|| format!("failed to save run {}", record.run_id()))?;
    Ok(record)
}

fn report_json(report: &RunReport, record: &RunRecord) -> Value {
    json!({
        "run": record,
        "outputs": success_outputs(report),
    })
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Compile one document and execute it once.
pub async fn run(
    state: &AppState,
    file: &Path,
    event: Option<&str>,
    payload: Option<&str>,
    echo: bool,
    json: bool,
) -> Result<()> {
    let source = read_source(file).await?;
    let compiled = compile_source(&source).map_err(|e| {
        print_diagnostics(e.diagnostics(), &[]);
        anyhow!("{} failed to compile", file.display())
    })?;

    let payload = parse_payload(payload)?;
    let activation = match event {
        Some(event) => event_activation(event, payload)?,
        None => {
            let trigger = compiled
                .definition
                .triggers
                .first()
                .context("workflow declares no triggers")?;
            activation_for(trigger, payload)
        }
    };

    let name = compiled.definition.name.clone();
    let router = TriggerRouter::new();
    router.deploy(compiled).await?;
    let route = router
        .route(&activation)
        .await
        .into_iter()
        .next()
        .with_context(|| {
            format!(
                "{} does not match any trigger of '{name}'",
                activation.source_label()
            )
        })?;

    let engine = WorkflowEngine::new(state.dispatcher(echo));
    let report = engine.execute(&route.workflow.graph, route.context).await;
    let record = persist(state, &report).await?;

    if json {
        print_json(&report_json(&report, &record))?;
    } else {
        print_run(&record, success_outputs(&report));
    }

    if !report.is_success() {
        bail!("run {} {}", record.run_id(), record.status);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Emit
// ---------------------------------------------------------------------------

/// Route one event across every deployed workflow and wait for the runs.
pub async fn emit(
    state: &AppState,
    event: &str,
    payload: Option<&str>,
    echo: bool,
    json: bool,
) -> Result<()> {
    let activation = event_activation(event, parse_payload(payload)?)?;
    let router = state.router().await?;
    let service = TriggerService::new(
        router,
        WorkflowEngine::new(state.dispatcher(echo)),
        state.config.max_concurrent_runs,
    );

    let reports = service.dispatch(&activation).await;
    if reports.is_empty() && !json {
        println!();
        println!("  No workflow matched {}.", style(activation.source_label()).cyan());
        println!();
        return Ok(());
    }

    let mut unsuccessful = 0;
    let mut out = Vec::new();
    for report in reports {
        let record = persist(state, &report).await?;
        if !report.is_success() {
            unsuccessful += 1;
        }
        if json {
            out.push(report_json(&report, &record));
        } else {
            print_run(&record, success_outputs(&report));
        }
    }

    if json {
        print_json(&out)?;
    }
    if unsuccessful > 0 {
        bail!("{unsuccessful} run(s) did not complete");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// Show one stored run by id, or the recent runs of a workflow.
pub async fn runs(state: &AppState, target: &str, limit: usize, json: bool) -> Result<()> {
    if let Ok(run_id) = target.parse::<Uuid>() {
        let record = state
            .runs
            .get_run(&run_id)
            .await
            .context("failed to read run")?
            .with_context(|| format!("run {run_id} not found"))?;
        if json {
            return print_json(&record);
        }
        print_run(&record, None);
        return Ok(());
    }

    let records = state
        .runs
        .list_runs(target, limit)
        .await
        .context("failed to list runs")?;

    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!();
        println!("  No runs for workflow '{target}'.");
        println!();
        return Ok(());
    }
    print_run_table(&records);
    Ok(())
}

// ---------------------------------------------------------------------------
// Serve
// ---------------------------------------------------------------------------

/// Drive schedule triggers until Ctrl+C / SIGTERM, persisting every report.
pub async fn serve(state: &AppState, echo: bool) -> Result<()> {
    let router = state.router().await?;
    let workflows = router.workflow_count().await;

    let bus = EventBus::new(state.config.event_bus_capacity);
    let scheduler = CronScheduler::new(bus.clone());
    scheduler.start().await?;
    scheduler.sync(&router.cron_expressions().await).await?;
    let schedules = scheduler.job_count().await;

    let service = Arc::new(TriggerService::new(
        router,
        WorkflowEngine::new(state.dispatcher(echo)),
        state.config.max_concurrent_runs,
    ));
    let token = service.cancellation_token();

    let persister = {
        let mut reports = service.subscribe_reports();
        let runs = state.runs.clone();
        let token = token.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    received = reports.recv() => match received {
                        Ok(report) => {
                            let record = report.to_record();
                            match runs.save_run(&record).await {
                                Ok(()) => tracing::info!(
                                    run_id = %record.run_id(),
                                    workflow = record.workflow(),
                                    status = %record.status,
                                    "run finished"
                                ),
                                Err(e) => tracing::error!(run_id = %record.run_id(), error = %e, "failed to save run"),
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "run reports dropped before saving");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    };

    let runner = {
        let service = Arc::clone(&service);
        let receiver = bus.subscribe();
        tokio::spawn(async move { service.run(receiver).await })
    };

    println!();
    println!(
        "  {} Serving {} workflow(s), {} schedule(s)",
        style("*").green().bold(),
        workflows,
        schedules
    );
    println!("  Data dir: {}", style(state.data_dir.display()).dim());
    println!("  Press Ctrl+C to stop.");
    println!();

    crate::shutdown_signal().await;

    service.shutdown();
    scheduler.stop().await?;
    if let Err(e) = runner.await {
        tracing::error!(error = %e, "trigger service task failed");
    }
    if let Err(e) = persister.await {
        tracing::error!(error = %e, "report persister task failed");
    }

    println!("\n  Stopped.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stepwise_types::config::GlobalConfig;
    use stepwise_types::run::RunStatus;
    use tempfile::TempDir;

    const GREET: &str = r#"
name: greet
triggers:
  - kind: event
    event: User.created
steps:
  - id: hello
    action: Mail.send
    args: { to: "{{trigger.email}}" }
"#;

    async fn state_with(workflows: &[(&str, &str)]) -> (TempDir, AppState) {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("workflows");
        std::fs::create_dir_all(&dir).unwrap();
        for (file, source) in workflows {
            std::fs::write(dir.join(file), source).unwrap();
        }
        let state = AppState::init(tmp.path().to_path_buf(), GlobalConfig::default())
            .await
            .unwrap();
        (tmp, state)
    }

    #[test]
    fn event_argument_must_have_a_predicate() {
        assert!(event_activation("Order", json!({})).is_err());
        let activation = event_activation("Order.created", json!({ "id": 1 })).unwrap();
        assert_eq!(activation.source_label(), "Order.created");
    }

    #[test]
    fn payload_defaults_to_empty_object() {
        assert_eq!(parse_payload(None).unwrap(), json!({}));
        assert_eq!(parse_payload(Some("[1, 2]")).unwrap(), json!([1, 2]));
        assert!(parse_payload(Some("{oops")).is_err());
    }

    #[test]
    fn schedule_trigger_gets_a_tick() {
        let activation = activation_for(&TriggerSpec::schedule("0 9 * * *"), json!({}));
        assert_eq!(activation.source_label(), "cron:0 9 * * *");
    }

    #[tokio::test]
    async fn run_with_echo_persists_the_record() {
        let (tmp, state) = state_with(&[]).await;
        let file = tmp.path().join("greet.yaml");
        std::fs::write(&file, GREET).unwrap();

        run(&state, &file, None, Some(r#"{"email":"a@example.com"}"#), true, true)
            .await
            .unwrap();

        let records = state.runs.list_runs("greet", 10).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, RunStatus::Completed);
        assert_eq!(
            records[0].context.step_outputs.get("hello").unwrap()["args"]["to"],
            "a@example.com"
        );
    }

    #[tokio::test]
    async fn run_rejects_event_the_workflow_does_not_handle() {
        let (tmp, state) = state_with(&[]).await;
        let file = tmp.path().join("greet.yaml");
        std::fs::write(&file, GREET).unwrap();

        let err = run(&state, &file, Some("User.deleted"), None, true, true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not match any trigger"));
    }

    #[tokio::test]
    async fn emit_runs_deployed_workflows() {
        let (_tmp, state) = state_with(&[("greet.yaml", GREET)]).await;

        emit(&state, "User.created", Some(r#"{"email":"b@example.com"}"#), true, true)
            .await
            .unwrap();
        emit(&state, "User.deleted", None, true, true).await.unwrap();

        let records = state.runs.list_runs("greet", 10).await.unwrap();
        assert_eq!(records.len(), 1);

        let id = records[0].run_id().to_string();
        runs(&state, &id, 10, true).await.unwrap();
        assert!(runs(&state, &Uuid::now_v7().to_string(), 10, true).await.is_err());
    }
}
