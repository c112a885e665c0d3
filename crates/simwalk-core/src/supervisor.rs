//! ---
//! sw_section: "02-orchestration"
//! sw_subsection: "module"
//! sw_type: "source"
//! sw_scope: "code"
//! sw_description: "Non-blocking liveness tracking for the walking test process."
//! sw_version: "v0.1.0"
//! sw_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::mode::WalkMode;
use crate::process::SharedProcess;

/// Snapshot returned by [`ProcessSupervisor::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Liveness {
    pub alive: bool,
    /// Meaningful only once `alive` is false; `None` when the process
    /// vanished without a status (signal or lost handle).
    pub exit_code: Option<i32>,
}

impl Liveness {
    pub const RUNNING: Self = Self {
        alive: true,
        exit_code: None,
    };
}

/// One execution of the walking test process.
#[derive(Debug, Clone, Serialize)]
pub struct TestRun {
    pub mode: WalkMode,
    pub pid: Option<u32>,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Observes the test process without ever blocking on it.
#[derive(Debug)]
pub struct ProcessSupervisor {
    handle: SharedProcess,
    run: TestRun,
    terminal: Option<Liveness>,
}

impl ProcessSupervisor {
    pub fn new(mode: WalkMode, handle: SharedProcess) -> Self {
        let run = TestRun {
            mode,
            pid: handle.id(),
            exit_code: None,
            started_at: Utc::now(),
            finished_at: None,
        };
        Self {
            handle,
            run,
            terminal: None,
        }
    }

    /// Current liveness. Once terminal, the same answer is returned forever.
    pub fn poll(&mut self) -> Liveness {
        if let Some(terminal) = self.terminal {
            return terminal;
        }
        let exit_code = match self.handle.try_exit() {
            Ok(None) => return Liveness::RUNNING,
            Ok(Some(code)) => Some(code),
            Err(err) => {
                warn!(pid = ?self.run.pid, error = %err, "test process status unavailable");
                None
            }
        };
        let terminal = Liveness {
            alive: false,
            exit_code,
        };
        self.run.exit_code = exit_code;
        self.run.finished_at = Some(Utc::now());
        self.terminal = Some(terminal);
        info!(pid = ?self.run.pid, exit_code = ?exit_code, "test process finished");
        terminal
    }

    pub fn into_run(self) -> TestRun {
        self.run
    }
}
