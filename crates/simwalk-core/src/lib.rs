//! ---
//! sw_section: "02-orchestration"
//! sw_subsection: "module"
//! sw_type: "source"
//! sw_scope: "code"
//! sw_description: "Run orchestration and lifecycle management."
//! sw_version: "v0.1.0"
//! sw_owner: "tbd"
//! ---
//! Core of the simwalk harness: resolves the walk mode from the argument
//! vector, brings the simulated stack up one subsystem at a time, supervises
//! the walking test process and validates the final pose of the robot.

pub mod bridge;
pub mod error;
pub mod launcher;
pub mod mode;
pub mod orchestrator;
pub mod process;
pub mod readiness;
pub mod supervisor;
pub mod validation;

pub use bridge::{CommandServiceBridge, ServiceBridge};
pub use error::{HarnessError, Result};
pub use launcher::{CommandSpec, SubsystemLauncher, SubsystemSpec};
pub use mode::{resolve, ArgumentShape, ControlKind, WalkMode};
pub use orchestrator::{Orchestrator, RunReport, RunState, StateEntry, Verdict};
pub use process::{ProcessHandle, SharedProcess, Spawner, TokioSpawner};
pub use readiness::Precondition;
pub use supervisor::{Liveness, ProcessSupervisor, TestRun};
pub use validation::{ConvergenceResult, ConvergenceValidator, Position, DEFAULT_TOLERANCE};
