//! ---
//! sw_section: "01-core-functionality"
//! sw_subsection: "module"
//! sw_type: "source"
//! sw_scope: "code"
//! sw_description: "Shared primitives and utilities for the harness runtime."
//! sw_version: "v0.1.0"
//! sw_owner: "tbd"
//! ---
use anyhow::Result;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "SIMWALK_LOG";

/// Keeps the file writer's worker alive for the life of the process.
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Available log formats for the harness.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "structured-json" | "json" => Ok(LogFormat::StructuredJson),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(format!("unknown log format: {}", other)),
        }
    }
}

/// Filter from `SIMWALK_LOG`, then `RUST_LOG`, finally `info`.
fn env_filter() -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(directive).unwrap_or_else(|err| {
            eprintln!("invalid {LOG_ENV} directive ({err}); defaulting to info logging");
            EnvFilter::new("info")
        }),
        Err(_) => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

/// Initialize the tracing subscriber based on configuration and environment variables.
///
/// Stdout carries either structured JSON or a pretty human format and is
/// written synchronously, so log lines and the final verdict line keep their
/// order. A daily rolling JSON file keeps the full record of every run.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    std::fs::create_dir_all(&config.directory)?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    let file_appender = daily(&config.directory, format!("{prefix}.log"));
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let _ = FILE_GUARD.set(file_guard);

    let fmt_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(std::io::stdout)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(std::io::stdout)
            .boxed(),
    };

    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer)
        .with(file_layer)
        .try_init()
        .ok();

    info!(
        service = %service_name,
        log_dir = %config.directory.display(),
        format = ?config.format,
        "tracing initialised"
    );
    Ok(())
}
