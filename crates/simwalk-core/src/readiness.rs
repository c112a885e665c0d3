//! ---
//! sw_section: "02-orchestration"
//! sw_subsection: "module"
//! sw_type: "source"
//! sw_scope: "code"
//! sw_description: "Readiness preconditions gating subsystem startup."
//! sw_version: "v0.1.0"
//! sw_owner: "tbd"
//! ---
use std::fmt;
use std::time::Duration;

use simwalk_common::config::PreconditionConfig;
use simwalk_common::time::duration_to_millis;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::bridge::ServiceBridge;

/// Condition that must hold before the next subsystem may start.
#[derive(Debug, Clone, PartialEq)]
pub enum Precondition {
    /// The named service answers introspection requests.
    ServiceCallable(String),
    /// A fixed settle period.
    Settle(Duration),
}

impl From<&PreconditionConfig> for Precondition {
    fn from(value: &PreconditionConfig) -> Self {
        match value {
            PreconditionConfig::Service { service } => {
                Precondition::ServiceCallable(service.clone())
            }
            // Negative or non-finite values are rejected when the config loads.
            PreconditionConfig::Settle { settle_secs } => {
                Precondition::Settle(Duration::try_from_secs_f64(*settle_secs).unwrap_or_default())
            }
        }
    }
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precondition::ServiceCallable(service) => write!(f, "service {service}"),
            Precondition::Settle(duration) => write!(f, "settle {duration:?}"),
        }
    }
}

/// Result of a successful readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessOutcome {
    pub attempts: u32,
    pub waited: Duration,
}

/// Why a readiness wait gave up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessFailure {
    TimedOut {
        attempts: u32,
        waited: Duration,
        last_error: Option<String>,
    },
    /// The owning process exited while the wait was in progress.
    ProcessExited { code: i32 },
}

/// Poll `precondition` until it holds or `timeout` elapses.
///
/// `exited_abnormally` is consulted every `poll_interval`, during settle
/// periods too; returning `Some(code)` aborts the wait because the subsystem
/// has died.
pub async fn await_precondition<F>(
    bridge: &dyn ServiceBridge,
    precondition: &Precondition,
    timeout: Duration,
    poll_interval: Duration,
    mut exited_abnormally: F,
) -> Result<ReadinessOutcome, ReadinessFailure>
where
    F: FnMut() -> Option<i32> + Send,
{
    let start = Instant::now();
    match precondition {
        Precondition::Settle(duration) => {
            let deadline = start + *duration;
            let mut attempts = 0u32;
            loop {
                attempts = attempts.saturating_add(1);
                if let Some(code) = exited_abnormally() {
                    return Err(ReadinessFailure::ProcessExited { code });
                }
                let now = Instant::now();
                if now >= deadline {
                    return Ok(ReadinessOutcome {
                        attempts,
                        waited: start.elapsed(),
                    });
                }
                sleep(poll_interval.min(deadline - now)).await;
            }
        }
        Precondition::ServiceCallable(service) => {
            let mut attempts = 0u32;
            let mut last_error = None;
            loop {
                attempts = attempts.saturating_add(1);
                match bridge.is_callable(service).await {
                    Ok(true) => {
                        return Ok(ReadinessOutcome {
                            attempts,
                            waited: start.elapsed(),
                        })
                    }
                    Ok(false) => {}
                    Err(err) => {
                        debug!(
                            service = %service,
                            attempts,
                            elapsed_ms = duration_to_millis(start.elapsed()),
                            error = %err,
                            "readiness check errored"
                        );
                        last_error = Some(err.to_string());
                    }
                }
                if let Some(code) = exited_abnormally() {
                    return Err(ReadinessFailure::ProcessExited { code });
                }
                if start.elapsed() >= timeout {
                    return Err(ReadinessFailure::TimedOut {
                        attempts,
                        waited: start.elapsed(),
                        last_error,
                    });
                }
                sleep(poll_interval).await;
            }
        }
    }
}
