//! ---
//! sw_section: "02-orchestration"
//! sw_subsection: "module"
//! sw_type: "source"
//! sw_scope: "code"
//! sw_description: "Run state machine: bring-up, supervision, validation and teardown."
//! sw_version: "v0.1.0"
//! sw_owner: "tbd"
//! ---
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use simwalk_common::config::{HarnessConfig, Stage};
use simwalk_logging::{log_system_event, LogContext, SystemEventOutcome};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{info, warn};
use uuid::Uuid;

use crate::bridge::ServiceBridge;
use crate::error::{HarnessError, Result};
use crate::launcher::{SubsystemLauncher, SubsystemSpec};
use crate::mode::{resolve, WalkMode};
use crate::process::Spawner;
use crate::supervisor::{Liveness, ProcessSupervisor, TestRun};
use crate::validation::{ConvergenceResult, ConvergenceValidator};

/// Position of a run in its strictly forward lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    MasterStarted,
    CoreStarted,
    Spawned,
    BroughtUp,
    ControllerStarted,
    Running,
    Finished,
    Validated,
    TornDown,
    Done,
    Aborted,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Idle => "idle",
            RunState::MasterStarted => "master_started",
            RunState::CoreStarted => "core_started",
            RunState::Spawned => "spawned",
            RunState::BroughtUp => "brought_up",
            RunState::ControllerStarted => "controller_started",
            RunState::Running => "running",
            RunState::Finished => "finished",
            RunState::Validated => "validated",
            RunState::TornDown => "torn_down",
            RunState::Done => "done",
            RunState::Aborted => "aborted",
        }
    }

    /// State reached once `stage` is started and ready.
    pub fn after(stage: Stage) -> Self {
        match stage {
            Stage::Master => RunState::MasterStarted,
            Stage::SimulationCore => RunState::CoreStarted,
            Stage::Spawn => RunState::Spawned,
            Stage::Bringup => RunState::BroughtUp,
            Stage::Controller => RunState::ControllerStarted,
            Stage::TestProcess => RunState::Running,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    ConvergenceFailed { distance: f64, tolerance: f64 },
    /// The test process exited non-zero or without a status.
    ProcessFailed { exit_code: Option<i32> },
    /// The test process succeeded but the final pose could not be read.
    ValidationUnavailable { reason: String },
    /// Bring-up failed before the test process was running.
    Aborted { reason: String },
}

impl Verdict {
    /// Process exit status for the harness binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            Verdict::Passed => 0,
            Verdict::ConvergenceFailed { .. } | Verdict::ValidationUnavailable { .. } => 1,
            Verdict::ProcessFailed { .. } => 2,
            Verdict::Aborted { .. } => 3,
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Passed)
    }

    /// Error kind for runs that completed but failed. Aborted runs and
    /// unavailable poses already surfaced their cause while running.
    pub fn as_error(&self) -> Option<HarnessError> {
        match self {
            Verdict::Passed => None,
            Verdict::ConvergenceFailed {
                distance,
                tolerance,
            } => Some(HarnessError::ValidationFailure {
                distance: *distance,
                tolerance: *tolerance,
            }),
            Verdict::ProcessFailed { exit_code } => Some(HarnessError::ProcessFailure {
                exit_code: *exit_code,
            }),
            Verdict::ValidationUnavailable { .. } | Verdict::Aborted { .. } => None,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Passed => f.write_str("passed"),
            Verdict::ConvergenceFailed {
                distance,
                tolerance,
            } => write!(f, "convergence failed (distance {distance:.5} >= {tolerance})"),
            Verdict::ProcessFailed {
                exit_code: Some(code),
            } => write!(f, "test process failed with code {code}"),
            Verdict::ProcessFailed { exit_code: None } => {
                f.write_str("test process ended without an exit status")
            }
            Verdict::ValidationUnavailable { reason } => {
                write!(f, "final pose unavailable: {reason}")
            }
            Verdict::Aborted { reason } => write!(f, "aborted: {reason}"),
        }
    }
}

/// One entry of the state trace.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StateEntry {
    pub state: RunState,
    pub at: DateTime<Utc>,
}

/// Everything recorded about one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub mode: WalkMode,
    pub trace: Vec<StateEntry>,
    pub started: Vec<String>,
    pub stopped: Vec<String>,
    pub test_run: Option<TestRun>,
    pub convergence: Option<ConvergenceResult>,
    pub verdict: Verdict,
    pub interrupts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn states(&self) -> Vec<RunState> {
        self.trace.iter().map(|entry| entry.state).collect()
    }

    pub fn final_state(&self) -> RunState {
        self.trace.last().map_or(RunState::Idle, |entry| entry.state)
    }

    pub fn exit_code(&self) -> u8 {
        self.verdict.exit_code()
    }
}

/// Mutable bookkeeping for the run in flight.
struct RunRecord {
    run_id: Uuid,
    run_label: String,
    mode: WalkMode,
    mode_label: String,
    trace: Vec<StateEntry>,
    test_run: Option<TestRun>,
    convergence: Option<ConvergenceResult>,
    interrupts: u32,
    started_at: DateTime<Utc>,
}

impl RunRecord {
    fn new(mode: WalkMode) -> Self {
        let run_id = Uuid::new_v4();
        let mode_label = mode.label();
        let mut record = Self {
            run_id,
            run_label: run_id.to_string(),
            mode,
            mode_label,
            trace: Vec::new(),
            test_run: None,
            convergence: None,
            interrupts: 0,
            started_at: Utc::now(),
        };
        record.enter(RunState::Idle, SystemEventOutcome::Success, "run created");
        record
    }

    fn state(&self) -> RunState {
        self.trace.last().map_or(RunState::Idle, |entry| entry.state)
    }

    fn enter(&mut self, state: RunState, outcome: SystemEventOutcome, message: &str) {
        self.trace.push(StateEntry {
            state,
            at: Utc::now(),
        });
        let ctx = LogContext::new()
            .with_run(&self.run_label)
            .with_stage(state.as_str())
            .with_mode(&self.mode_label);
        log_system_event(Some(&ctx), "run_state", message, outcome);
    }
}

enum Wake {
    Tick,
    Interrupt,
    Closed,
}

/// Drives one validation run from mode resolution to teardown.
pub struct Orchestrator {
    config: HarnessConfig,
    spawner: Arc<dyn Spawner>,
    bridge: Arc<dyn ServiceBridge>,
    interrupts: Option<mpsc::Receiver<()>>,
}

impl Orchestrator {
    pub fn new(
        config: HarnessConfig,
        spawner: Arc<dyn Spawner>,
        bridge: Arc<dyn ServiceBridge>,
    ) -> Self {
        Self {
            config,
            spawner,
            bridge,
            interrupts: None,
        }
    }

    /// Interrupt notifications. During bring-up an interrupt aborts the run;
    /// while the test process runs it is only counted.
    pub fn with_interrupts(mut self, interrupts: mpsc::Receiver<()>) -> Self {
        self.interrupts = Some(interrupts);
        self
    }

    /// Resolve `args` and execute the run.
    ///
    /// An unrecognised argument shape or an invalid configuration is returned
    /// as an error before anything is started; every other failure, an
    /// interrupted bring-up included, is part of the report.
    pub async fn run<S: AsRef<str>>(&mut self, args: &[S]) -> Result<RunReport> {
        let mode = resolve(args)?;
        self.config
            .validate()
            .map_err(|err| HarnessError::Config(format!("{err:#}")))?;
        Ok(self.run_mode(mode).await)
    }

    async fn run_mode(&mut self, mode: WalkMode) -> RunReport {
        let mut record = RunRecord::new(mode);
        info!(run = %record.run_id, mode = %record.mode, "run starting");
        let mut launcher = SubsystemLauncher::new(
            self.spawner.clone(),
            self.bridge.clone(),
            self.config.timeouts.clone(),
        )
        .with_run(record.run_label.clone());

        let mut interrupts = self.interrupts.take();
        let brought_up = tokio::select! {
            result = self.bring_up(&mut launcher, &mut record) => result,
            () = next_interrupt(&mut interrupts) => Err(HarnessError::Interrupted {
                phase: "bring-up",
            }),
        };
        self.interrupts = interrupts;

        let verdict = match brought_up {
            Ok(()) => self.execute(&mut launcher, &mut record).await,
            Err(err) => {
                let ctx = LogContext::new()
                    .with_run(&record.run_label)
                    .with_mode(&record.mode_label);
                log_system_event(
                    Some(&ctx),
                    "bring_up",
                    &err.to_string(),
                    SystemEventOutcome::Fault,
                );
                Verdict::Aborted {
                    reason: err.to_string(),
                }
            }
        };

        launcher.stop_all().await;
        record.enter(RunState::TornDown, SystemEventOutcome::Success, "teardown complete");
        let (terminal, outcome) = match verdict {
            Verdict::Aborted { .. } => (RunState::Aborted, SystemEventOutcome::Fault),
            Verdict::Passed => (RunState::Done, SystemEventOutcome::Success),
            _ => (RunState::Done, SystemEventOutcome::Fault),
        };
        record.enter(terminal, outcome, &verdict.to_string());

        let report = RunReport {
            run_id: record.run_id,
            mode: record.mode,
            trace: record.trace,
            started: launcher.started_order(),
            stopped: launcher.stopped_order().to_vec(),
            test_run: record.test_run,
            convergence: record.convergence,
            verdict,
            interrupts: record.interrupts,
            started_at: record.started_at,
            finished_at: Utc::now(),
        };
        if let Some(path) = &self.config.validation.summary_path {
            write_summary(path, &report);
        }
        info!(run = %report.run_id, verdict = %report.verdict, "run finished");
        report
    }

    /// Start every enabled dependency stage in order, pausing physics
    /// around the model spawn.
    async fn bring_up(
        &self,
        launcher: &mut SubsystemLauncher,
        record: &mut RunRecord,
    ) -> Result<()> {
        let physics = &self.config.physics;
        let mut paused = false;
        for (stage, subsystem) in self.config.subsystems.iter() {
            if subsystem.enabled {
                launcher
                    .launch(SubsystemSpec::from_config(stage, subsystem))
                    .await?;
            } else {
                info!(stage = %stage, "stage disabled; assuming it is provided externally");
            }
            match stage {
                Stage::SimulationCore if subsystem.enabled => {
                    self.bridge.call_empty(&physics.pause_service).await?;
                    paused = true;
                    sleep(physics.settle_after_pause()).await;
                }
                Stage::Spawn if paused => {
                    self.bridge.call_empty(&physics.unpause_service).await?;
                }
                _ => {}
            }
            if subsystem.enabled {
                record.enter(
                    RunState::after(stage),
                    SystemEventOutcome::Success,
                    &format!("{stage} ready"),
                );
            }
        }
        Ok(())
    }

    /// Launch the test process, wait for it, then judge the outcome.
    async fn execute(
        &mut self,
        launcher: &mut SubsystemLauncher,
        record: &mut RunRecord,
    ) -> Verdict {
        let spec = SubsystemSpec::test_process(&record.mode, &self.config.test_process);
        let handle = match launcher.start(spec).await {
            Ok(handle) => handle,
            Err(err) => {
                return Verdict::Aborted {
                    reason: err.to_string(),
                }
            }
        };
        record.enter(RunState::Running, SystemEventOutcome::Success, "test process running");

        let mut supervisor = ProcessSupervisor::new(record.mode.clone(), handle);
        let liveness = self.supervise(&mut supervisor, record).await;
        record.test_run = Some(supervisor.into_run());
        let exited_cleanly = liveness.exit_code == Some(0);
        record.enter(
            RunState::Finished,
            if exited_cleanly {
                SystemEventOutcome::Success
            } else {
                SystemEventOutcome::Fault
            },
            &format!("test process exited with {:?}", liveness.exit_code),
        );

        let validator = ConvergenceValidator::from_config(&self.config.validation);
        let model = &self.config.validation.model_name;
        let pose = self.bridge.model_position(model).await;
        let verdict = match pose {
            Ok(observed) => {
                let result = validator.validate(observed);
                record.convergence = Some(result);
                if !exited_cleanly {
                    Verdict::ProcessFailed {
                        exit_code: liveness.exit_code,
                    }
                } else if result.passed {
                    Verdict::Passed
                } else {
                    Verdict::ConvergenceFailed {
                        distance: result.distance,
                        tolerance: result.tolerance,
                    }
                }
            }
            Err(err) if !exited_cleanly => {
                warn!(model = %model, error = %err, "final pose unavailable");
                Verdict::ProcessFailed {
                    exit_code: liveness.exit_code,
                }
            }
            Err(err) => Verdict::ValidationUnavailable {
                reason: err.to_string(),
            },
        };
        record.enter(
            RunState::Validated,
            if verdict.is_pass() {
                SystemEventOutcome::Success
            } else {
                SystemEventOutcome::Fault
            },
            &verdict.to_string(),
        );
        verdict
    }

    /// Poll the test process at the supervision cadence until it exits.
    /// Interrupts are counted and logged; they never end the wait.
    async fn supervise(
        &mut self,
        supervisor: &mut ProcessSupervisor,
        record: &mut RunRecord,
    ) -> Liveness {
        let mut ticker = interval(self.config.timeouts.supervision_poll);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let liveness = supervisor.poll();
            if !liveness.alive {
                return liveness;
            }
            let wake = match self.interrupts.as_mut() {
                Some(interrupts) => tokio::select! {
                    _ = ticker.tick() => Wake::Tick,
                    received = interrupts.recv() => match received {
                        Some(()) => Wake::Interrupt,
                        None => Wake::Closed,
                    },
                },
                None => {
                    ticker.tick().await;
                    Wake::Tick
                }
            };
            match wake {
                Wake::Tick => {}
                Wake::Interrupt => {
                    record.interrupts = record.interrupts.saturating_add(1);
                    warn!(
                        run = %record.run_id,
                        state = %record.state(),
                        interrupts = record.interrupts,
                        "interrupt received; waiting for the test process to finish"
                    );
                }
                Wake::Closed => self.interrupts = None,
            }
        }
    }
}

/// Resolves on the next interrupt. Never resolves once the sender is gone.
async fn next_interrupt(interrupts: &mut Option<mpsc::Receiver<()>>) {
    loop {
        match interrupts.as_mut() {
            Some(receiver) => match receiver.recv().await {
                Some(()) => return,
                None => *interrupts = None,
            },
            None => std::future::pending::<()>().await,
        }
    }
}

fn write_summary(path: &Path, report: &RunReport) {
    let rendered = match serde_json::to_string_pretty(report) {
        Ok(rendered) => rendered,
        Err(err) => {
            warn!(error = %err, "run summary not serialised");
            return;
        }
    };
    if let Err(err) = fs::write(path, rendered) {
        warn!(path = %path.display(), error = %err, "run summary not written");
    }
}
