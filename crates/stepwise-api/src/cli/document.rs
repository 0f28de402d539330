//! Commands working on workflow documents: `check`, `compile`, `list`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use stepwise_core::repository::DefinitionStore;
use stepwise_core::workflow::cron::next_fire;
use stepwise_core::workflow::{compile, compile_source, parse, validate, ParseOutcome};
use stepwise_types::workflow::TriggerSpec;

use super::output::{print_diagnostics, print_json};
use crate::state::AppState;

pub async fn read_source(file: &Path) -> Result<String> {
    tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))
}

// ---------------------------------------------------------------------------
// Check
// ---------------------------------------------------------------------------

/// Run parse, validate and compile, reporting every diagnostic. Fails when
/// any stage produced an error.
pub async fn check(file: &Path, json: bool) -> Result<()> {
    let source = read_source(file).await?;
    let ParseOutcome {
        workflow,
        mut errors,
        mut warnings,
    } = parse(&source);

    if let Some(def) = &workflow {
        let report = validate(def);
        if report.valid() {
            let compiled = compile(def);
            errors.extend(compiled.errors);
            warnings.extend(compiled.warnings);
        } else {
            errors.extend(report.errors);
        }
    }
    let valid = errors.is_empty();

    if json {
        print_json(&serde_json::json!({
            "file": file.display().to_string(),
            "workflow": workflow.as_ref().map(|w| w.name.as_str()),
            "valid": valid,
            "errors": errors,
            "warnings": warnings,
        }))?;
    } else {
        println!();
        print_diagnostics(&errors, &warnings);
        match (&workflow, valid) {
            (Some(def), true) => println!(
                "  {} '{}' is valid ({} steps, {} triggers)",
                style("✓").green(),
                style(&def.name).cyan(),
                def.steps.len(),
                def.triggers.len()
            ),
            _ => println!(
                "  {} {} has {} error(s)",
                style("✗").red(),
                file.display(),
                errors.len()
            ),
        }
        println!();
    }

    if !valid {
        bail!("{} is not a valid workflow", file.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Compile
// ---------------------------------------------------------------------------

/// Print the compiled step graph as JSON. Diagnostics go to stderr.
pub async fn compile_file(file: &Path) -> Result<()> {
    let source = read_source(file).await?;
    match compile_source(&source) {
        Ok(compiled) => {
            print_diagnostics(&[], &compiled.warnings);
            print_json(&compiled.graph)
        }
        Err(e) => {
            print_diagnostics(e.diagnostics(), &[]);
            bail!("{} failed to compile", file.display());
        }
    }
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// Trigger label, with the next fire time for schedules.
fn trigger_summary(trigger: &TriggerSpec) -> String {
    let label = trigger.source_label();
    match trigger {
        TriggerSpec::Schedule(s) => match next_fire(&s.cron, Utc::now()) {
            Ok(Some(next)) => format!("{label} (next {})", next.format("%Y-%m-%d %H:%M UTC")),
            _ => label,
        },
        TriggerSpec::Event(_) => label,
    }
}

pub async fn list(state: &AppState, json: bool) -> Result<()> {
    let defs = state
        .definitions
        .list_definitions()
        .await
        .context("failed to list workflows")?;

    if json {
        let out: Vec<_> = defs
            .iter()
            .map(|d| {
                serde_json::json!({
                    "name": d.name,
                    "description": d.description,
                    "triggers": d.triggers.iter().map(|t| t.source_label()).collect::<Vec<_>>(),
                    "steps": d.steps.len(),
                    "entry": d.entry_step().map(|s| s.id.as_str()),
                    "valid": validate(d).valid(),
                })
            })
            .collect();
        return print_json(&out);
    }

    if defs.is_empty() {
        println!();
        println!("  No workflows in {}.", state.definitions.dir().display());
        println!(
            "  Add a document there, then check it with: {}",
            style("stepwise check <file.yaml>").dim()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Triggers"),
            Cell::new("Steps"),
            Cell::new("Entry"),
            Cell::new("Valid"),
        ]);

    for d in &defs {
        let valid = validate(d).valid();
        let triggers: Vec<String> = d.triggers.iter().map(trigger_summary).collect();
        table.add_row(vec![
            Cell::new(&d.name),
            Cell::new(triggers.join("\n")),
            Cell::new(d.steps.len()),
            Cell::new(d.entry_step().map(|s| s.id.as_str()).unwrap_or("-")),
            if valid {
                Cell::new("yes").fg(Color::Green)
            } else {
                Cell::new("no").fg(Color::Red)
            },
        ]);
    }

    println!();
    println!("  Workflows in {}", style(state.definitions.dir().display()).dim());
    println!("{table}");
    println!();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn check_rejects_dangling_transition() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("bad.yaml");
        std::fs::write(
            &file,
            r#"
name: bad
triggers: [{ kind: event, event: A.b }]
steps:
  - { id: a, action: X.y, on_failure: nowhere }
"#,
        )
        .unwrap();

        assert!(check(&file, true).await.is_err());
    }

    #[tokio::test]
    async fn check_accepts_valid_document() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("ok.yaml");
        std::fs::write(
            &file,
            r#"
name: ok
triggers: [{ kind: schedule, cron: "0 9 * * 1" }]
steps:
  - { id: report, action: Reports.build }
"#,
        )
        .unwrap();

        check(&file, true).await.unwrap();
        compile_file(&file).await.unwrap();
    }

    #[test]
    fn schedule_summary_includes_next_fire() {
        let summary = trigger_summary(&TriggerSpec::schedule("0 9 * * *"));
        assert!(summary.starts_with("cron:0 9 * * * (next "), "{summary}");
        assert_eq!(trigger_summary(&TriggerSpec::event("A", "b")), "A.b");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let err = read_source(Path::new("/definitely/not/here.yaml")).await.unwrap_err();
        assert!(err.to_string().starts_with("failed to read"));
    }
}
