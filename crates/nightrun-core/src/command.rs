//! Shell-command execution services for actions.
//!
//! `RunContext` is handed to every task body; `run_command` logs the command
//! with its relevant environment and fails with the exit code on error.
//! `run_gated` additionally routes the command through the `resources`
//! wrapper so it runs with named locks and jobserver slots held.

use std::env;
use std::process::Command;

use crate::config::RunConfig;
use crate::error::{NightrunError, Result};
use crate::task::Task;

/// Environment variables worth echoing with every command, because task
/// bodies routinely depend on them.
const RELEVANT_ENV: &[&str] = &[
    "LD_LIBRARY_PATH",
    "PATH",
    "HOME",
    "XDG_CONFIG_HOME",
    "XDG_DATA_HOME",
    "XDG_CACHE_HOME",
];

/// Services available to a task body inside its forked worker process.
pub struct RunContext<'a> {
    pub config: &'a RunConfig,
}

impl RunContext<'_> {
    /// Log and run `cmdstr` through `sh -c`, erroring if it fails.
    pub fn run_command(&self, cmdstr: &str) -> Result<()> {
        self.log_command(cmdstr);
        let status = Command::new("sh")
            .args(["-c", cmdstr])
            .env("MAKE", &self.config.make_command)
            .env("NIGHTRUN_WORKDIR", &self.config.workdir)
            .status()?;
        exit_status_to_result(cmdstr, status)
    }

    /// Run `cmdstr` with `resources` named locks and `jobs` jobserver slots
    /// held, via the configured wrapper binary. Without a wrapper the
    /// command runs ungated.
    pub fn run_gated(&self, cmdstr: &str, resources: &[String], jobs: usize) -> Result<()> {
        let Some(helper) = self
            .config
            .resources_helper
            .as_ref()
            .filter(|_| jobs > 0 || !resources.is_empty())
        else {
            return self.run_command(cmdstr);
        };

        self.log_command(cmdstr);
        let mut cmd = Command::new(helper);
        if jobs > 0 {
            cmd.args(["-j", &jobs.to_string()]);
        }
        for resource in resources {
            cmd.args(["-r", resource]);
        }
        cmd.args(["--", "sh", "-c", cmdstr]);
        cmd.env("MAKE", &self.config.make_command);
        cmd.env("NIGHTRUN_WORKDIR", &self.config.workdir);
        let status = cmd.status()?;
        exit_status_to_result(cmdstr, status)
    }

    fn log_command(&self, cmdstr: &str) {
        let cwd = env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let environment: Vec<String> = RELEVANT_ENV
            .iter()
            .filter_map(|var| env::var(var).ok().map(|value| format!("{var}={value}")))
            .collect();
        tracing::info!(command = cmdstr, cwd, env = ?environment, "running command");
    }
}

fn exit_status_to_result(cmdstr: &str, status: std::process::ExitStatus) -> Result<()> {
    if status.success() {
        return Ok(());
    }
    match status.code() {
        Some(code) => Err(NightrunError::CommandFailed {
            command: cmdstr.to_string(),
            code,
        }),
        None => Err(NightrunError::CommandKilled {
            command: cmdstr.to_string(),
        }),
    }
}

// ---------------------------------------------------------------------------
// CommandTask
// ---------------------------------------------------------------------------

/// A task whose body is a shell command, optionally gated on named resource
/// locks and jobserver slots.
pub struct CommandTask {
    command: String,
    resources: Vec<String>,
    jobs: usize,
}

impl CommandTask {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            resources: Vec::new(),
            jobs: 0,
        }
    }

    pub fn resources(mut self, resources: Vec<String>) -> Self {
        self.resources = resources;
        self
    }

    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }
}

impl Task for CommandTask {
    fn execute(&self, ctx: &RunContext) -> Result<()> {
        ctx.run_gated(&self.command, &self.resources, self.jobs)
    }
}
