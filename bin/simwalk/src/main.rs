//! ---
//! sw_section: "01-entrypoint"
//! sw_subsection: "binary"
//! sw_type: "source"
//! sw_scope: "code"
//! sw_description: "Binary entrypoint for the simwalk harness."
//! sw_version: "v0.1.0"
//! sw_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::Parser;
use simwalk_common::config::HarnessConfig;
use simwalk_common::logging::{init_tracing, LogFormat};
use simwalk_core::{CommandServiceBridge, HarnessError, Orchestrator, TokioSpawner};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Unrecognised argument shape (`EX_USAGE`).
const EXIT_INVALID_ARGUMENTS: u8 = 64;
/// Setup failed before any subsystem was started.
const EXIT_ABORTED: u8 = 3;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Simulated walking validation harness",
    long_about = "Brings up the simulated robot stack, runs one walking test and checks that \
                  the robot ended where it started in the lateral and vertical axes."
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "FORMAT", help = "Stdout log format (structured-json | pretty)")]
    log_format: Option<LogFormat>,

    #[arg(long, value_name = "FILE", help = "Write a JSON run summary to this path")]
    summary: Option<PathBuf>,

    /// Mode tokens followed by the three launcher-supplied tokens, e.g.
    /// `vel on_spot pattern_generator __name:=x __log:=y`.
    #[arg(
        value_name = "ARGS",
        num_args = 0..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("simwalk: {err:#}");
            ExitCode::from(EXIT_ABORTED)
        }
    }
}

async fn run(cli: Cli) -> Result<u8> {
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        if !path.exists() {
            bail!("configuration file {} not found", path.display());
        }
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/simwalk.toml"));

    let loaded = HarnessConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    if let Some(summary) = cli.summary {
        config.validation.summary_path = Some(summary);
    }
    init_tracing("simwalk", &config.logging)?;
    match &loaded.source {
        Some(path) => info!(path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using built-in defaults"),
    }

    let (interrupt_tx, interrupt_rx) = mpsc::channel(8);
    let forwarder = tokio::spawn(forward_interrupts(interrupt_tx));

    let bridge = CommandServiceBridge::from_config(&config.bridge);
    let mut orchestrator = Orchestrator::new(config, Arc::new(TokioSpawner), Arc::new(bridge))
        .with_interrupts(interrupt_rx);
    let outcome = orchestrator.run(&cli.args).await;
    forwarder.abort();

    let report = match outcome {
        Ok(report) => report,
        Err(err @ HarnessError::InvalidArguments { .. }) => {
            eprintln!("simwalk: {err}");
            return Ok(EXIT_INVALID_ARGUMENTS);
        }
        Err(err) => return Err(err.into()),
    };
    println!("{} {}: {}", report.run_id, report.mode, report.verdict);
    if let Some(err) = report.verdict.as_error() {
        eprintln!("simwalk: {err}");
    }
    Ok(report.exit_code())
}

/// Relay Ctrl-C to the orchestrator instead of terminating the harness.
/// Bring-up is aborted by it; a running test process is left to finish.
async fn forward_interrupts(tx: mpsc::Sender<()>) {
    loop {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "interrupt listener unavailable");
            return;
        }
        if tx.send(()).await.is_err() {
            return;
        }
    }
}
