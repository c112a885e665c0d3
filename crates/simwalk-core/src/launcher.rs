//! ---
//! sw_section: "02-orchestration"
//! sw_subsection: "module"
//! sw_type: "source"
//! sw_scope: "code"
//! sw_description: "Sequential start, readiness gating and teardown of external subsystems."
//! sw_version: "v0.1.0"
//! sw_owner: "tbd"
//! ---
use std::sync::Arc;

use indexmap::IndexMap;
use simwalk_common::config::{Stage, SubsystemConfig, TestProcessConfig, TimeoutConfig};
use simwalk_logging::{sw_debug, sw_error, sw_info, sw_warn, LogContext};

use crate::bridge::ServiceBridge;
use crate::error::{HarnessError, Result};
use crate::mode::WalkMode;
use crate::process::{SharedProcess, Spawner};
use crate::readiness::{await_precondition, Precondition, ReadinessFailure};

/// Command line plus extra environment for a process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    pub argv: Vec<String>,
    pub env: IndexMap<String, String>,
}

impl CommandSpec {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            env: IndexMap::new(),
        }
    }

    pub fn with_env(mut self, env: IndexMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn program(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }
}

/// Everything needed to start one subsystem and decide it is ready.
#[derive(Debug, Clone, PartialEq)]
pub struct SubsystemSpec {
    pub name: String,
    pub stage: Stage,
    pub command: CommandSpec,
    pub readiness: Vec<Precondition>,
}

impl SubsystemSpec {
    pub fn from_config(stage: Stage, config: &SubsystemConfig) -> Self {
        Self {
            name: stage.as_str().to_owned(),
            stage,
            command: CommandSpec::new(config.command.clone()).with_env(config.env.clone()),
            readiness: config.readiness.iter().map(Precondition::from).collect(),
        }
    }

    /// The walking test process for `mode`:
    /// `<runner> <package> <executable> <mode args..> __name:=<node>`.
    pub fn test_process(mode: &WalkMode, config: &TestProcessConfig) -> Self {
        let mut argv = vec![
            config.runner.clone(),
            config.package.clone(),
            mode.executable().to_owned(),
        ];
        argv.extend(mode.args());
        argv.push(format!("__name:={}", mode.node_name()));
        Self {
            name: Stage::TestProcess.as_str().to_owned(),
            stage: Stage::TestProcess,
            command: CommandSpec::new(argv),
            readiness: Vec::new(),
        }
    }
}

/// A subsystem the launcher has started.
#[derive(Debug, Clone)]
struct Subsystem {
    spec: SubsystemSpec,
    handle: SharedProcess,
    stopped: bool,
}

/// Starts subsystems one at a time and owns them until teardown.
pub struct SubsystemLauncher {
    spawner: Arc<dyn Spawner>,
    bridge: Arc<dyn ServiceBridge>,
    timeouts: TimeoutConfig,
    run: String,
    subsystems: Vec<Subsystem>,
    stopped: Vec<String>,
}

impl SubsystemLauncher {
    pub fn new(
        spawner: Arc<dyn Spawner>,
        bridge: Arc<dyn ServiceBridge>,
        timeouts: TimeoutConfig,
    ) -> Self {
        Self {
            spawner,
            bridge,
            timeouts,
            run: String::new(),
            subsystems: Vec::new(),
            stopped: Vec::new(),
        }
    }

    /// Tag log lines with the owning run.
    pub fn with_run(mut self, run: impl Into<String>) -> Self {
        self.run = run.into();
        self
    }

    fn context<'a>(&'a self, name: &'a str) -> LogContext<'a> {
        LogContext::new().with_run(&self.run).with_subsystem(name)
    }

    fn find(&self, name: &str) -> Option<&Subsystem> {
        self.subsystems.iter().find(|s| s.spec.name == name)
    }

    /// Start `spec` and wait for each of its preconditions in order.
    ///
    /// The subsystem must still be running, or have exited with code 0, once
    /// its readiness chain is done.
    pub async fn launch(&mut self, spec: SubsystemSpec) -> Result<SharedProcess> {
        let name = spec.name.clone();
        let stage = spec.stage;
        let readiness = spec.readiness.clone();
        let handle = self.start(spec).await?;
        for precondition in &readiness {
            self.await_ready(&name, precondition).await?;
        }
        // The supervisor owns the test process exit status.
        if stage != Stage::TestProcess {
            let reason = match handle.try_exit() {
                Ok(None) | Ok(Some(0)) => None,
                Ok(Some(code)) => Some(format!("exited with code {code} during startup")),
                Err(err) => Some(format!("exit status unreadable during startup: {err}")),
            };
            if let Some(reason) = reason {
                sw_error!(context = self.context(&name), "subsystem died: {reason}");
                return Err(HarnessError::LaunchFailure {
                    subsystem: name,
                    reason,
                });
            }
        }
        Ok(handle)
    }

    /// Spawn the subsystem process. Starting a name twice returns the
    /// existing handle.
    pub async fn start(&mut self, spec: SubsystemSpec) -> Result<SharedProcess> {
        if let Some(existing) = self.find(&spec.name) {
            sw_debug!(context = self.context(&spec.name), "subsystem already started");
            return Ok(existing.handle.clone());
        }
        let failure = |reason: String| HarnessError::LaunchFailure {
            subsystem: spec.name.clone(),
            reason,
        };
        let spawned =
            tokio::time::timeout(self.timeouts.startup, self.spawner.spawn(&spec.command)).await;
        let handle = match spawned {
            Ok(Ok(handle)) => handle,
            Ok(Err(err)) => return Err(failure(err.to_string())),
            Err(_) => {
                return Err(failure(format!(
                    "not started within {:?}",
                    self.timeouts.startup
                )))
            }
        };
        // The supervisor owns the test process exit status.
        if spec.stage != Stage::TestProcess {
            if let Ok(Some(code)) = handle.try_exit() {
                if code != 0 {
                    return Err(failure(format!("exited immediately with code {code}")));
                }
            }
        }
        sw_info!(
            context = self.context(&spec.name),
            "subsystem started: {} (pid {:?})",
            spec.command.argv.join(" "),
            handle.id()
        );
        self.subsystems.push(Subsystem {
            spec,
            handle: handle.clone(),
            stopped: false,
        });
        Ok(handle)
    }

    /// Block until `precondition` holds for the already started subsystem `name`.
    pub async fn await_ready(&self, name: &str, precondition: &Precondition) -> Result<()> {
        let handle = self.find(name).map(|s| s.handle.clone());
        let exited_abnormally = move || {
            handle
                .as_ref()
                .and_then(|h| h.try_exit().ok().flatten())
                .filter(|code| *code != 0)
        };
        let outcome = await_precondition(
            self.bridge.as_ref(),
            precondition,
            self.timeouts.readiness,
            self.timeouts.readiness_poll,
            exited_abnormally,
        )
        .await;
        match outcome {
            Ok(outcome) => {
                sw_info!(
                    context = self.context(name),
                    "{precondition} satisfied after {} attempt(s) in {:?}",
                    outcome.attempts,
                    outcome.waited
                );
                Ok(())
            }
            Err(ReadinessFailure::TimedOut {
                attempts,
                waited,
                last_error,
            }) => {
                sw_error!(
                    context = self.context(name),
                    "{precondition} not satisfied after {attempts} attempt(s): {}",
                    last_error.as_deref().unwrap_or("never callable")
                );
                Err(HarnessError::ReadinessTimeout {
                    subsystem: name.to_owned(),
                    condition: precondition.to_string(),
                    waited,
                })
            }
            Err(ReadinessFailure::ProcessExited { code }) => Err(HarnessError::LaunchFailure {
                subsystem: name.to_owned(),
                reason: format!("exited with code {code} while waiting for {precondition}"),
            }),
        }
    }

    /// Stop one subsystem. Never fails; repeated calls are no-ops.
    pub async fn stop(&mut self, name: &str) {
        let grace = self.timeouts.stop_grace;
        let Some(index) = self.subsystems.iter().position(|s| s.spec.name == name) else {
            return;
        };
        if self.subsystems[index].stopped {
            return;
        }
        self.subsystems[index].stopped = true;
        self.stopped.push(name.to_owned());
        let handle = self.subsystems[index].handle.clone();
        match handle.shutdown(grace).await {
            Ok(()) => sw_info!(context = self.context(name), "subsystem stopped"),
            Err(err) => sw_warn!(
                context = self.context(name),
                "subsystem did not stop cleanly: {err}"
            ),
        }
    }

    /// Stop every started subsystem in reverse start order.
    pub async fn stop_all(&mut self) {
        let names: Vec<String> = self
            .subsystems
            .iter()
            .rev()
            .map(|s| s.spec.name.clone())
            .collect();
        for name in names {
            self.stop(&name).await;
        }
    }

    pub fn started_order(&self) -> Vec<String> {
        self.subsystems.iter().map(|s| s.spec.name.clone()).collect()
    }

    pub fn stopped_order(&self) -> &[String] {
        &self.stopped
    }
}
