//! ---
//! sw_section: "02-orchestration"
//! sw_subsection: "module"
//! sw_type: "source"
//! sw_scope: "code"
//! sw_description: "Child process handles used by the launcher and supervisor."
//! sw_version: "v0.1.0"
//! sw_owner: "tbd"
//! ---
use std::fmt::Debug;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use simwalk_common::time::duration_to_millis;
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::launcher::CommandSpec;

const EXIT_POLL: Duration = Duration::from_millis(50);
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Minimal contract the harness needs from a running process.
#[async_trait]
pub trait ProcessHandle: Send + Sync + Debug {
    /// Operating system identifier, when known.
    fn id(&self) -> Option<u32>;

    /// Non-blocking exit check: `Ok(None)` while the process runs.
    fn try_exit(&self) -> io::Result<Option<i32>>;

    /// Ask the process to stop, escalating to a kill once `grace` elapses.
    async fn shutdown(&self, grace: Duration) -> io::Result<()>;

    fn is_alive(&self) -> bool {
        matches!(self.try_exit(), Ok(None))
    }
}

pub type SharedProcess = Arc<dyn ProcessHandle>;

/// Creates processes from command descriptors.
#[async_trait]
pub trait Spawner: Send + Sync {
    async fn spawn(&self, command: &CommandSpec) -> io::Result<SharedProcess>;
}

/// Spawner backed by `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct TokioSpawner;

#[async_trait]
impl Spawner for TokioSpawner {
    async fn spawn(&self, command: &CommandSpec) -> io::Result<SharedProcess> {
        let (program, args) = command.argv.split_first().ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "empty command line")
        })?;
        let child = Command::new(program)
            .args(args)
            .envs(&command.env)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let pid = child.id();
        debug!(program = %program, pid = ?pid, "process spawned");
        Ok(Arc::new(ChildProcess {
            program: program.clone(),
            pid,
            child: Mutex::new(child),
        }))
    }
}

/// A `tokio::process::Child` shared between the launcher and the supervisor.
#[derive(Debug)]
pub struct ChildProcess {
    program: String,
    pid: Option<u32>,
    child: Mutex<Child>,
}

impl ChildProcess {
    async fn wait_for_exit(&self, limit: Duration) -> io::Result<bool> {
        let deadline = Instant::now() + limit;
        loop {
            if self.try_exit()?.is_some() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(EXIT_POLL).await;
        }
    }
}

#[async_trait]
impl ProcessHandle for ChildProcess {
    fn id(&self) -> Option<u32> {
        self.pid
    }

    fn try_exit(&self) -> io::Result<Option<i32>> {
        Ok(self.child.lock().try_wait()?.map(exit_code))
    }

    async fn shutdown(&self, grace: Duration) -> io::Result<()> {
        if self.try_exit()?.is_some() {
            return Ok(());
        }
        if let Some(pid) = self.pid {
            // Launch trees clean up their own children on SIGINT, not on SIGKILL.
            if let Err(err) = interrupt(pid) {
                warn!(program = %self.program, pid, error = %err, "failed to interrupt process");
            }
            if self.wait_for_exit(grace).await? {
                return Ok(());
            }
            warn!(
                program = %self.program,
                pid,
                grace_ms = duration_to_millis(grace),
                "process ignored interrupt; killing"
            );
        }
        if let Err(err) = self.child.lock().start_kill() {
            // Already reaped between the checks above.
            if err.kind() != io::ErrorKind::InvalidInput {
                return Err(err);
            }
        }
        if self.wait_for_exit(KILL_WAIT).await? {
            Ok(())
        } else {
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{} did not exit after kill", self.program),
            ))
        }
    }
}

/// Signal terminations have no code and are reported as `-1`.
pub fn exit_code(status: ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}

#[cfg(unix)]
fn interrupt(pid: u32) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = i32::try_from(pid).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, format!("pid {pid} out of range"))
    })?;
    kill(Pid::from_raw(pid), Signal::SIGINT).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn interrupt(_pid: u32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "interrupts are only delivered on unix",
    ))
}
