//! ---
//! sw_section: "03-logging"
//! sw_subsection: "module"
//! sw_type: "source"
//! sw_scope: "code"
//! sw_description: "Structured lifecycle logging adapters."
//! sw_version: "v0.1.0"
//! sw_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Lifecycle event helpers shared by the harness crates.

use tracing::Level;
use tracing_subscriber::{fmt as subscriber_fmt, prelude::*, EnvFilter, Registry};

pub mod macros;

/// Initialize a baseline tracing subscriber suitable for tests and tooling.
pub fn init() {
    let _ = Registry::default()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(subscriber_fmt::layer())
        .try_init();
}

/// Structured logging context propagated by the convenience macros.
#[derive(Debug, Default, Clone)]
pub struct LogContext<'a> {
    /// Identifier of the harness run.
    pub run: Option<&'a str>,
    /// Orchestrator state the event belongs to.
    pub stage: Option<&'a str>,
    /// Subsystem the event concerns.
    pub subsystem: Option<&'a str>,
    /// Resolved walk mode.
    pub mode: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Create an empty logging context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a run identifier.
    pub fn with_run(mut self, run: &'a str) -> Self {
        self.run = Some(run);
        self
    }

    /// Attach an orchestrator stage.
    pub fn with_stage(mut self, stage: &'a str) -> Self {
        self.stage = Some(stage);
        self
    }

    /// Attach a subsystem name.
    pub fn with_subsystem(mut self, subsystem: &'a str) -> Self {
        self.subsystem = Some(subsystem);
        self
    }

    /// Attach a mode descriptor.
    pub fn with_mode(mut self, mode: &'a str) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// High-level outcome used when emitting lifecycle log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// The step completed successfully.
    Success,
    /// The step failed or was aborted.
    Fault,
}

impl SystemEventOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Emit a standardized lifecycle event with a success/fault outcome.
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let default_ctx = LogContext::default();
    let ctx = context.unwrap_or(&default_ctx);
    // `tracing::event!` needs a constant level, hence the split.
    match outcome {
        SystemEventOutcome::Success => tracing::event!(
            Level::INFO,
            event,
            outcome = outcome.as_str(),
            run = ctx.run.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            subsystem = ctx.subsystem.unwrap_or(""),
            mode = ctx.mode.unwrap_or(""),
            message = %message
        ),
        SystemEventOutcome::Fault => tracing::event!(
            Level::ERROR,
            event,
            outcome = outcome.as_str(),
            run = ctx.run.unwrap_or(""),
            stage = ctx.stage.unwrap_or(""),
            subsystem = ctx.subsystem.unwrap_or(""),
            mode = ctx.mode.unwrap_or(""),
            message = %message
        ),
    }
}
