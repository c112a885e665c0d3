//! ---
//! sw_section: "04-testing"
//! sw_subsection: "module"
//! sw_type: "source"
//! sw_scope: "code"
//! sw_description: "Deterministic fakes for subsystem processes and simulator services."
//! sw_version: "v0.1.0"
//! sw_owner: "tbd"
//! ---
//! Scripted stand-ins for the external world of a simwalk run.
//!
//! Every fake writes into a shared [`Journal`] so tests can assert on the
//! exact interleaving of spawns, readiness probes, service calls and stops.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use simwalk_common::config::{HarnessConfig, PreconditionConfig, SubsystemConfig};
use simwalk_core::{
    CommandSpec, HarnessError, Position, ProcessHandle, Result, ServiceBridge, SharedProcess,
    Spawner,
};
use tracing::debug;

pub const PAUSE_SERVICE: &str = "/gazebo/pause_physics";
pub const GAINS_SERVICE: &str = "/gains/arm_left_1_joint/set_parameters";

/// Something a fake observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Spawned { program: String, argv: Vec<String> },
    Probe { service: String, ready: bool },
    Called { service: String },
    PoseQueried { model: String },
    Stopped { program: String },
}

/// Ordered record shared by all fakes of one test.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<Event>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, event: Event) {
        self.0.lock().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    /// Programs in spawn order.
    pub fn spawned(&self) -> Vec<String> {
        self.filter(|event| match event {
            Event::Spawned { program, .. } => Some(program.clone()),
            _ => None,
        })
    }

    /// Programs in stop order, one entry per stop call.
    pub fn stopped(&self) -> Vec<String> {
        self.filter(|event| match event {
            Event::Stopped { program } => Some(program.clone()),
            _ => None,
        })
    }

    pub fn calls(&self) -> Vec<String> {
        self.filter(|event| match event {
            Event::Called { service } => Some(service.clone()),
            _ => None,
        })
    }

    /// Index of the first event matching `predicate`.
    pub fn position(&self, predicate: impl Fn(&Event) -> bool) -> Option<usize> {
        self.0.lock().iter().position(predicate)
    }

    pub fn spawn_index(&self, program: &str) -> Option<usize> {
        self.position(|event| matches!(event, Event::Spawned { program: p, .. } if p == program))
    }

    /// Index of the first successful probe of `service`.
    pub fn ready_index(&self, service: &str) -> Option<usize> {
        self.position(
            |event| matches!(event, Event::Probe { service: s, ready: true } if s == service),
        )
    }

    fn filter<T>(&self, pick: impl Fn(&Event) -> Option<T>) -> Vec<T> {
        self.0.lock().iter().filter_map(pick).collect()
    }
}

/// Behaviour of one fake program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessScript {
    /// Number of status checks answered with "running" before exiting.
    pub exit_after_polls: Option<u32>,
    pub exit_code: i32,
    pub fail_spawn: bool,
    pub hang_spawn: bool,
}

impl ProcessScript {
    pub const fn long_running() -> Self {
        Self {
            exit_after_polls: None,
            exit_code: 0,
            fail_spawn: false,
            hang_spawn: false,
        }
    }

    pub const fn exits_after(polls: u32, exit_code: i32) -> Self {
        Self {
            exit_after_polls: Some(polls),
            exit_code,
            fail_spawn: false,
            hang_spawn: false,
        }
    }

    pub const fn fails_to_spawn() -> Self {
        Self {
            fail_spawn: true,
            ..Self::long_running()
        }
    }

    pub const fn hangs_on_spawn() -> Self {
        Self {
            hang_spawn: true,
            ..Self::long_running()
        }
    }
}

impl Default for ProcessScript {
    fn default() -> Self {
        Self::long_running()
    }
}

#[derive(Debug)]
struct ScriptedState {
    polls: u32,
    exited: Option<i32>,
}

/// In-memory process following a [`ProcessScript`].
#[derive(Debug)]
pub struct ScriptedProcess {
    program: String,
    pid: u32,
    script: ProcessScript,
    state: Mutex<ScriptedState>,
    journal: Journal,
}

impl ScriptedProcess {
    pub fn new(
        program: impl Into<String>,
        pid: u32,
        script: ProcessScript,
        journal: Journal,
    ) -> Self {
        Self {
            program: program.into(),
            pid,
            script,
            state: Mutex::new(ScriptedState {
                polls: 0,
                exited: None,
            }),
            journal,
        }
    }
}

#[async_trait]
impl ProcessHandle for ScriptedProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn try_exit(&self) -> io::Result<Option<i32>> {
        let mut state = self.state.lock();
        if state.exited.is_some() {
            return Ok(state.exited);
        }
        if let Some(limit) = self.script.exit_after_polls {
            if state.polls >= limit {
                state.exited = Some(self.script.exit_code);
                return Ok(state.exited);
            }
        }
        state.polls += 1;
        Ok(None)
    }

    async fn shutdown(&self, _grace: Duration) -> io::Result<()> {
        self.journal.record(Event::Stopped {
            program: self.program.clone(),
        });
        let mut state = self.state.lock();
        if state.exited.is_none() {
            state.exited = Some(-1);
        }
        Ok(())
    }
}

/// Spawner handing out [`ScriptedProcess`]es keyed by `argv[0]`.
#[derive(Debug, Default)]
pub struct RecordingSpawner {
    journal: Journal,
    scripts: Mutex<HashMap<String, ProcessScript>>,
    next_pid: Mutex<u32>,
}

impl RecordingSpawner {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            scripts: Mutex::new(HashMap::new()),
            next_pid: Mutex::new(1000),
        }
    }

    /// Programs without a script run until stopped.
    pub fn script(self, program: impl Into<String>, script: ProcessScript) -> Self {
        self.scripts.lock().insert(program.into(), script);
        self
    }
}

#[async_trait]
impl Spawner for RecordingSpawner {
    async fn spawn(&self, command: &CommandSpec) -> io::Result<SharedProcess> {
        let program = command.program().unwrap_or_default().to_owned();
        let script = self.scripts.lock().get(&program).copied().unwrap_or_default();
        if script.hang_spawn {
            std::future::pending::<()>().await;
        }
        if script.fail_spawn {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{program}: command not found"),
            ));
        }
        let pid = {
            let mut next = self.next_pid.lock();
            *next += 1;
            *next
        };
        debug!(program = %program, pid, "scripted process spawned");
        self.journal.record(Event::Spawned {
            program: program.clone(),
            argv: command.argv.clone(),
        });
        Ok(Arc::new(ScriptedProcess::new(
            program,
            pid,
            script,
            self.journal.clone(),
        )))
    }
}

/// When a service starts answering probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceScript {
    ReadyAfter(u32),
    Never,
}

/// Service bridge with scripted readiness, failures and final pose.
#[derive(Debug, Default)]
pub struct ScriptedBridge {
    journal: Journal,
    services: Mutex<HashMap<String, ServiceScript>>,
    probes: Mutex<HashMap<String, u32>>,
    failing_calls: Mutex<Vec<String>>,
    pose: Mutex<Option<Position>>,
}

impl ScriptedBridge {
    pub fn new(journal: Journal) -> Self {
        Self {
            journal,
            ..Self::default()
        }
    }

    /// Unscripted services are callable on the first probe.
    pub fn service(self, service: impl Into<String>, script: ServiceScript) -> Self {
        self.services.lock().insert(service.into(), script);
        self
    }

    pub fn failing_call(self, service: impl Into<String>) -> Self {
        self.failing_calls.lock().push(service.into());
        self
    }

    pub fn final_pose(self, position: Position) -> Self {
        *self.pose.lock() = Some(position);
        self
    }
}

#[async_trait]
impl ServiceBridge for ScriptedBridge {
    async fn is_callable(&self, service: &str) -> Result<bool> {
        let attempt = {
            let mut probes = self.probes.lock();
            let count = probes.entry(service.to_owned()).or_insert(0);
            *count += 1;
            *count
        };
        let ready = match self.services.lock().get(service) {
            Some(ServiceScript::ReadyAfter(needed)) => attempt > *needed,
            Some(ServiceScript::Never) => false,
            None => true,
        };
        self.journal.record(Event::Probe {
            service: service.to_owned(),
            ready,
        });
        Ok(ready)
    }

    async fn call_empty(&self, service: &str) -> Result<()> {
        self.journal.record(Event::Called {
            service: service.to_owned(),
        });
        if self.failing_calls.lock().iter().any(|s| s == service) {
            return Err(HarnessError::ServiceCall {
                service: service.to_owned(),
                reason: "scripted failure".to_owned(),
            });
        }
        Ok(())
    }

    async fn model_position(&self, model: &str) -> Result<Position> {
        self.journal.record(Event::PoseQueried {
            model: model.to_owned(),
        });
        let pose = *self.pose.lock();
        pose.ok_or_else(|| HarnessError::ServiceCall {
            service: "/gazebo/get_model_state".to_owned(),
            reason: format!("model {model} does not exist"),
        })
    }
}

fn command(program: &str) -> Vec<String> {
    vec![program.to_owned()]
}

/// Configuration whose stages run distinct fake programs (`master`,
/// `sim_core`, `spawner`, `bringup`, `controller`) and whose artefacts land
/// in `artefacts`.
pub fn harness_config(artefacts: &Path) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    let subsystems = &mut config.subsystems;
    subsystems.master = SubsystemConfig::new(
        command("master"),
        vec![PreconditionConfig::Settle { settle_secs: 1.0 }],
    );
    subsystems.simulation_core = SubsystemConfig::new(
        command("sim_core"),
        vec![PreconditionConfig::Service {
            service: PAUSE_SERVICE.to_owned(),
        }],
    );
    subsystems.spawn = SubsystemConfig::new(
        command("spawner"),
        vec![
            PreconditionConfig::Service {
                service: GAINS_SERVICE.to_owned(),
            },
            PreconditionConfig::Settle { settle_secs: 5.0 },
        ],
    );
    subsystems.bringup = SubsystemConfig::new(command("bringup"), Vec::new());
    subsystems.controller = SubsystemConfig::new(
        command("controller"),
        vec![PreconditionConfig::Settle { settle_secs: 5.0 }],
    );
    config.validation.report_path = artefacts.join("output.dat");
    config
}
