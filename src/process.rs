//! Child-process supervision seam.
//!
//! The scheduler drives tasks through the `Spawner`/`ProcessHandle` traits
//! so its admission and reaping semantics can be tested without real
//! processes. The shell implementation launches each task's command through
//! `/bin/bash -c` in its working directory, with `JOBUTILS_SKIPDONE=ON` in
//! the child environment so the task wrapper honors existing done-markers.

use std::path::Path;
use std::process::{Child, Command};

use anyhow::{Context, Result, bail};
use tracing::debug;

use crate::workflow::Stage;

/// Exit of a reaped task process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskExit {
    /// Exit code; `None` when the process was terminated by a signal.
    pub code: Option<i32>,
}

impl TaskExit {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A running task process owned by the scheduler until reap.
pub trait ProcessHandle {
    /// Non-blocking completion check.
    fn try_wait(&mut self) -> Result<Option<TaskExit>>;

    /// Force-terminate the process. Idempotent once the process has exited.
    fn kill(&mut self) -> Result<()>;
}

pub trait Spawner {
    type Handle: ProcessHandle;

    /// Launch a stage's command. `iteration` is the scheduling pass that
    /// admitted the task; dry runs echo intent instead of running the
    /// real command.
    fn spawn(&mut self, stage: &Stage, iteration: u64, dry_run: bool) -> Result<Self::Handle>;
}

/// Prepare a stage's working directory.
///
/// An empty path means the current directory and needs no preparation. A
/// path occupied by a non-directory is a refusal to spawn; a missing
/// directory is created one level deep.
pub fn ensure_workdir(cwd: &str) -> Result<()> {
    if cwd.is_empty() {
        return Ok(());
    }
    let path = Path::new(cwd);
    if path.exists() && !path.is_dir() {
        bail!("working directory '{cwd}' exists and is not a directory");
    }
    if !path.is_dir() {
        std::fs::create_dir(path)
            .with_context(|| format!("failed to create working directory '{cwd}'"))?;
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct ShellSpawner {
    shell: String,
}

impl ShellSpawner {
    pub fn new(shell: String) -> Self {
        Self { shell }
    }
}

impl Spawner for ShellSpawner {
    type Handle = ShellHandle;

    fn spawn(&mut self, stage: &Stage, iteration: u64, dry_run: bool) -> Result<ShellHandle> {
        ensure_workdir(&stage.cwd)?;

        let command_line = if dry_run {
            format!("echo ' {} : would do {}'", iteration, stage.name)
        } else {
            stage.cmd.clone()
        };

        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&command_line)
            .env("JOBUTILS_SKIPDONE", "ON");
        if !stage.cwd.is_empty() {
            command.current_dir(&stage.cwd);
        }

        debug!(stage = %stage.name, cwd = %stage.cwd, "spawning task process");
        let child = command
            .spawn()
            .with_context(|| format!("failed to spawn command for stage '{}'", stage.name))?;
        Ok(ShellHandle { child })
    }
}

pub struct ShellHandle {
    child: Child,
}

impl ProcessHandle for ShellHandle {
    fn try_wait(&mut self) -> Result<Option<TaskExit>> {
        let status = self
            .child
            .try_wait()
            .context("failed to poll task process")?;
        Ok(status.map(|status| TaskExit {
            code: status.code(),
        }))
    }

    fn kill(&mut self) -> Result<()> {
        match self.child.kill() {
            Ok(()) => Ok(()),
            // Already exited.
            Err(err) if err.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
            Err(err) => Err(err).context("failed to kill task process"),
        }
    }
}
