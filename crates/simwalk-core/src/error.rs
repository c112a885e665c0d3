//! ---
//! sw_section: "02-orchestration"
//! sw_subsection: "module"
//! sw_type: "source"
//! sw_scope: "code"
//! sw_description: "Error taxonomy for harness runs."
//! sw_version: "v0.1.0"
//! sw_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, HarnessError>;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("unrecognised argument shape ({} tokens): [{}]", .args.len(), .args.join(", "))]
    InvalidArguments { args: Vec<String> },
    #[error("subsystem {subsystem} failed to launch: {reason}")]
    LaunchFailure { subsystem: String, reason: String },
    #[error("subsystem {subsystem} not ready after {waited:?} waiting for {condition}")]
    ReadinessTimeout {
        subsystem: String,
        condition: String,
        waited: Duration,
    },
    #[error("test process exited with {}", describe_exit(.exit_code))]
    ProcessFailure { exit_code: Option<i32> },
    #[error("final pose did not converge: distance {distance:.5} >= tolerance {tolerance}")]
    ValidationFailure { distance: f64, tolerance: f64 },
    #[error("unable to write report {}: {source}", .path.display())]
    ReportWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("service call {service} failed: {reason}")]
    ServiceCall { service: String, reason: String },
    #[error("interrupted during {phase}")]
    Interrupted { phase: &'static str },
    #[error("configuration error: {0}")]
    Config(String),
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("code {code}"),
        None => "an unknown status".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_arguments_lists_every_token() {
        let err = HarnessError::InvalidArguments {
            args: vec!["vel".into(), "walk".into(), "x".into()],
        };
        let message = err.to_string();
        assert!(message.contains("3 tokens"), "{message}");
        assert!(message.contains("vel, walk, x"), "{message}");
    }

    #[test]
    fn process_failure_renders_missing_code() {
        let err = HarnessError::ProcessFailure { exit_code: None };
        assert!(err.to_string().contains("unknown status"));
        let err = HarnessError::ProcessFailure { exit_code: Some(4) };
        assert!(err.to_string().contains("code 4"));
    }
}
