//! stepwise CLI entry point.
//!
//! Binary name: `stepwise`
//!
//! Parses CLI arguments, loads configuration, initializes tracing, then
//! dispatches to the command handler.

mod cli;
mod state;

use clap::Parser;
use clap_complete::generate;
use stepwise_infra::config::{load_global_config, resolve_data_dir};
use stepwise_observe::tracing_setup::{init_tracing, shutdown_tracing, TracingOptions};

use cli::{Cli, Commands};
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Shell completions don't need config or state
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "stepwise", &mut std::io::stdout());
        return Ok(());
    }

    // The log format comes from config.toml, so config loads before the
    // subscriber exists.
    let data_dir = resolve_data_dir(cli.data_dir.clone());
    let config = load_global_config(&data_dir).await;

    let options = TracingOptions {
        format: config.log_format,
        otel: cli.otel,
        ..TracingOptions::from_verbosity(cli.verbose, cli.quiet)
    };
    init_tracing(&options).map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = dispatch(cli, data_dir, config).await;
    shutdown_tracing();
    result
}

async fn dispatch(
    cli: Cli,
    data_dir: std::path::PathBuf,
    config: stepwise_types::config::GlobalConfig,
) -> anyhow::Result<()> {
    match cli.command {
        Commands::Check { file } => cli::document::check(&file, cli.json).await,

        Commands::Compile { file } => cli::document::compile_file(&file).await,

        Commands::Run {
            file,
            event,
            payload,
            echo,
        } => {
            let state = AppState::init(data_dir, config).await?;
            cli::runtime::run(
                &state,
                &file,
                event.as_deref(),
                payload.as_deref(),
                echo,
                cli.json,
            )
            .await
        }

        Commands::Emit {
            event,
            payload,
            echo,
        } => {
            let state = AppState::init(data_dir, config).await?;
            cli::runtime::emit(&state, &event, payload.as_deref(), echo, cli.json).await
        }

        Commands::List => {
            let state = AppState::init(data_dir, config).await?;
            cli::document::list(&state, cli.json).await
        }

        Commands::Runs { target, limit } => {
            let state = AppState::init(data_dir, config).await?;
            cli::runtime::runs(&state, &target, limit, cli.json).await
        }

        Commands::Serve { echo } => {
            let state = AppState::init(data_dir, config).await?;
            cli::runtime::serve(&state, echo).await
        }

        Commands::Completions { .. } => unreachable!("handled above"),
    }
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
