//! CLI command definitions for the `stepwise` binary.
//!
//! Uses clap derive macros for argument parsing. Document commands (`check`,
//! `compile`, `run`) take a file path; deployment commands (`emit`, `list`,
//! `runs`, `serve`) work on the workflows directory under the data dir.

pub mod document;
pub mod output;
pub mod runtime;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Compile and run event-driven workflows.
#[derive(Parser)]
#[command(name = "stepwise", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans to stdout through OpenTelemetry.
    #[arg(long, global = true)]
    pub otel: bool,

    /// Data directory (defaults to ~/.stepwise).
    #[arg(long, global = true, env = "STEPWISE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse and validate a workflow document, printing every diagnostic.
    Check {
        /// Path to the workflow document (YAML or JSON).
        file: PathBuf,
    },

    /// Compile a workflow document and print its step graph as JSON.
    Compile {
        /// Path to the workflow document.
        file: PathBuf,
    },

    /// Execute one workflow document once.
    Run {
        /// Path to the workflow document.
        file: PathBuf,

        /// Event to activate with, as `Subject.predicate`. Defaults to the
        /// workflow's first trigger.
        #[arg(long)]
        event: Option<String>,

        /// JSON payload for the activation.
        #[arg(long)]
        payload: Option<String>,

        /// Answer every action with its own arguments instead of calling
        /// the configured endpoints.
        #[arg(long)]
        echo: bool,
    },

    /// Route an event to every deployed workflow and run each match.
    Emit {
        /// Event as `Subject.predicate`.
        event: String,

        /// JSON payload for the event.
        #[arg(long)]
        payload: Option<String>,

        /// Answer every action with its own arguments.
        #[arg(long)]
        echo: bool,
    },

    /// List deployed workflows and their triggers.
    #[command(alias = "ls")]
    List,

    /// Show recent runs of a workflow, or a single run by id.
    Runs {
        /// Workflow name or run UUID.
        target: String,

        /// Maximum number of runs to display.
        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Run scheduled workflows until interrupted.
    Serve {
        /// Answer every action with its own arguments.
        #[arg(long)]
        echo: bool,
    },

    /// Generate shell completions.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}
