//! ---
//! sw_section: "02-orchestration"
//! sw_subsection: "module"
//! sw_type: "source"
//! sw_scope: "code"
//! sw_description: "Request/response access to simulator services."
//! sw_version: "v0.1.0"
//! sw_owner: "tbd"
//! ---
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use simwalk_common::config::BridgeConfig;
use tokio::process::Command;
use tracing::debug;

use crate::error::{HarnessError, Result};
use crate::validation::Position;

pub const MODEL_STATE_SERVICE: &str = "/gazebo/get_model_state";

/// Opaque service transport towards the simulator and the control stack.
#[async_trait]
pub trait ServiceBridge: Send + Sync {
    /// Whether `service` is currently registered and callable.
    async fn is_callable(&self, service: &str) -> Result<bool>;

    /// Invoke a service taking and returning an empty message.
    async fn call_empty(&self, service: &str) -> Result<()>;

    /// Current position of a simulated entity.
    async fn model_position(&self, model: &str) -> Result<Position>;
}

/// Bridge that shells out to a service command-line tool (`rosservice` style).
#[derive(Debug, Clone)]
pub struct CommandServiceBridge {
    program: String,
    call_timeout: Duration,
    model_state_service: String,
}

impl CommandServiceBridge {
    pub fn new(program: impl Into<String>, call_timeout: Duration) -> Self {
        Self {
            program: program.into(),
            call_timeout,
            model_state_service: MODEL_STATE_SERVICE.to_owned(),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        Self::new(config.program.clone(), config.call_timeout)
            .with_model_state_service(config.model_state_service.clone())
    }

    pub fn with_model_state_service(mut self, service: impl Into<String>) -> Self {
        self.model_state_service = service.into();
        self
    }

    async fn invoke(&self, service: &str, args: &[&str]) -> Result<Output> {
        let call_error = |reason: String| HarnessError::ServiceCall {
            service: service.to_owned(),
            reason,
        };
        let output = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();
        match tokio::time::timeout(self.call_timeout, output).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(err)) => Err(call_error(format!("unable to run {}: {err}", self.program))),
            Err(_) => Err(call_error(format!(
                "no reply within {:?}",
                self.call_timeout
            ))),
        }
    }
}

#[async_trait]
impl ServiceBridge for CommandServiceBridge {
    async fn is_callable(&self, service: &str) -> Result<bool> {
        let output = self.invoke(service, &["info", service]).await?;
        debug!(service, callable = output.status.success(), "service probe");
        Ok(output.status.success())
    }

    async fn call_empty(&self, service: &str) -> Result<()> {
        let output = self.invoke(service, &["call", service]).await?;
        if output.status.success() {
            Ok(())
        } else {
            Err(HarnessError::ServiceCall {
                service: service.to_owned(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            })
        }
    }

    async fn model_position(&self, model: &str) -> Result<Position> {
        let request = format!("model_name: {model}");
        let service = self.model_state_service.as_str();
        let output = self.invoke(service, &["call", service, &request]).await?;
        if !output.status.success() {
            return Err(HarnessError::ServiceCall {
                service: service.to_owned(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        parse_model_state(&String::from_utf8_lossy(&output.stdout)).map_err(|reason| {
            HarnessError::ServiceCall {
                service: service.to_owned(),
                reason,
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct ModelStateReply {
    pose: PoseReply,
    #[serde(default)]
    success: Option<serde_yaml::Value>,
    #[serde(default)]
    status_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PoseReply {
    position: Position,
}

/// Extract `pose.position` from a YAML model-state reply.
pub fn parse_model_state(raw: &str) -> std::result::Result<Position, String> {
    let reply: ModelStateReply =
        serde_yaml::from_str(raw).map_err(|err| format!("malformed model state reply: {err}"))?;
    // Python-style `True` may surface as a bool or as a plain string.
    let succeeded = match &reply.success {
        None => true,
        Some(serde_yaml::Value::Bool(flag)) => *flag,
        Some(serde_yaml::Value::String(flag)) => flag.eq_ignore_ascii_case("true"),
        Some(_) => false,
    };
    if !succeeded {
        return Err(format!(
            "model state query rejected: {}",
            reply.status_message.unwrap_or_default()
        ));
    }
    Ok(reply.pose.position)
}
