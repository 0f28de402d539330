//! Shared styled / JSON output helpers.

use anyhow::Result;
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use stepwise_types::diagnostic::Diagnostic;
use stepwise_types::run::{RunRecord, RunStatus, StepOutputs, StepStatus};

pub fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_diagnostics(errors: &[Diagnostic], warnings: &[Diagnostic]) {
    for d in errors {
        eprintln!("  {} {d}", style("error").red().bold());
    }
    for d in warnings {
        eprintln!("  {} {d}", style("warning").yellow().bold());
    }
}

pub fn styled_status(status: RunStatus) -> String {
    let s = status.to_string();
    match status {
        RunStatus::Completed => style(s).green().to_string(),
        RunStatus::Failed => style(s).red().to_string(),
        RunStatus::Cancelled => style(s).yellow().to_string(),
        RunStatus::Running => style(s).cyan().to_string(),
    }
}

/// Print one run: header, step trace, and the final outputs when given.
pub fn print_run(record: &RunRecord, outputs: Option<&StepOutputs>) {
    let meta = &record.context.metadata;
    println!();
    println!(
        "  {} '{}' {}",
        style("Run").bold(),
        style(&meta.workflow).cyan(),
        styled_status(record.status)
    );
    println!("  Run ID:  {}", meta.run_id);
    println!("  Trigger: {}", meta.trigger_source);
    println!("  Started: {}", meta.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
    if let Some(step) = &record.failed_step {
        println!("  Failed at: {}", style(step).red());
    }
    if let Some(error) = &record.error {
        println!("  Error: {error}");
    }

    if !record.context.trace.is_empty() {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Step").fg(Color::Cyan),
                Cell::new("Status"),
                Cell::new("Duration"),
                Cell::new("Error"),
            ]);
        for entry in &record.context.trace {
            let status = match entry.status {
                StepStatus::Succeeded => Cell::new("succeeded").fg(Color::Green),
                StepStatus::Failed => Cell::new("failed").fg(Color::Red),
            };
            let millis = (entry.finished_at - entry.started_at).num_milliseconds();
            table.add_row(vec![
                Cell::new(&entry.step_id),
                status,
                Cell::new(format!("{millis}ms")),
                Cell::new(entry.error.as_deref().unwrap_or("")),
            ]);
        }
        println!();
        println!("{table}");
    }

    if let Some(outputs) = outputs.filter(|o| !o.is_empty()) {
        println!();
        println!("  {}", style("Outputs").bold());
        for (step, value) in outputs.iter() {
            println!("  {} {value}", style(format!("{step}:")).dim());
        }
    }
    println!();
}

/// Table of stored runs, newest first.
pub fn print_run_table(records: &[RunRecord]) {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Run ID").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Trigger"),
            Cell::new("Started"),
            Cell::new("Failed Step"),
        ]);

    for r in records {
        let status_color = match r.status {
            RunStatus::Completed => Color::Green,
            RunStatus::Failed => Color::Red,
            RunStatus::Cancelled => Color::Yellow,
            RunStatus::Running => Color::Cyan,
        };
        let meta = &r.context.metadata;
        table.add_row(vec![
            Cell::new(meta.run_id.to_string()),
            Cell::new(r.status.to_string()).fg(status_color),
            Cell::new(&meta.trigger_source),
            Cell::new(meta.started_at.format("%Y-%m-%d %H:%M:%S").to_string()),
            Cell::new(r.failed_step.as_deref().unwrap_or("-")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
}
