//! Actions: named, dependency-aware units of work run in forked workers.

use std::fmt;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::io::AsRawFd;
use std::{env, fs};

use crate::command::RunContext;
use crate::error::Result;
use crate::home;
use crate::task::Task;

// ---------------------------------------------------------------------------
// ActionStatus
// ---------------------------------------------------------------------------

/// Lifecycle state of an action.
///
/// Transitions only move forward: `Todo → Running → Done | Warnings |
/// Failed`, or `Todo → Skipped`. The variant order doubles as a severity
/// order, so the aggregate status of a run is a plain `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ActionStatus {
    Done,
    Warnings,
    Failed,
    Todo,
    Skipped,
    Running,
}

impl ActionStatus {
    /// Whether the action ran and produced usable results.
    pub fn completed(&self) -> bool {
        matches!(self, ActionStatus::Done | ActionStatus::Warnings)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionStatus::Done => "DONE",
            ActionStatus::Warnings => "WARNINGS",
            ActionStatus::Failed => "FAILED",
            ActionStatus::Todo => "TODO",
            ActionStatus::Skipped => "SKIPPED",
            ActionStatus::Running => "RUNNING",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// SkipCause
// ---------------------------------------------------------------------------

/// Why an action ended up `Skipped`. The causes look alike in the status
/// value but differ for dependents: an action assumed to be done satisfies
/// its dependents, the other two causes do not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipCause {
    /// Not in the enabled set and nothing enabled depends on it.
    Disabled,
    /// Listed in the skip set: assume it was done in an earlier run.
    AssumedDone,
    /// A dependency failed or was itself skipped.
    UnmetDependency(String),
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// A named unit of work with dependencies, executed in its own forked
/// process. Status is mutated only by the scheduler in the parent; the task
/// body runs in the child and reports back through the exit code.
pub struct Action {
    name: String,
    dependencies: Vec<String>,
    is_server: bool,
    need_home: bool,
    task: Box<dyn Task>,
    status: ActionStatus,
    summary: String,
    skip_cause: Option<SkipCause>,
    /// Child pid of the forked worker while `Running`.
    worker_pid: Option<i32>,
}

impl Action {
    pub fn new(name: impl Into<String>, task: Box<dyn Task>) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            is_server: false,
            need_home: false,
            task,
            status: ActionStatus::Todo,
            summary: String::new(),
            skip_cause: None,
            worker_pid: None,
        }
    }

    pub fn depends_on(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Mark this as a long-running daemon action; shutdown escalation will
    /// target its whole process group.
    pub fn server(mut self) -> Self {
        self.is_server = true;
        self
    }

    /// Require an isolated home-directory clone before running.
    pub fn with_home(mut self) -> Self {
        self.need_home = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn is_server(&self) -> bool {
        self.is_server
    }

    pub fn need_home(&self) -> bool {
        self.need_home
    }

    pub fn status(&self) -> ActionStatus {
        self.status
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn skip_cause(&self) -> Option<&SkipCause> {
        self.skip_cause.as_ref()
    }

    /// Whether a dependent may run after this action reached its terminal
    /// status. Skip-by-request counts as satisfied; skip-by-failure does not.
    pub(crate) fn satisfies_dependents(&self) -> bool {
        self.status.completed() || self.skip_cause == Some(SkipCause::AssumedDone)
    }

    pub(crate) fn mark_skipped(&mut self, cause: SkipCause) {
        self.status = ActionStatus::Skipped;
        self.skip_cause = Some(cause);
    }

    /// Fork a worker for this action's task body.
    ///
    /// The child enters a fresh `<step>-<name>` subdirectory of the result
    /// directory, optionally redirects stdout/stderr into an append-mode
    /// `output.txt` (append so reruns of the same step keep earlier
    /// history), clones the home template when needed, and exits 1 on any
    /// task error instead of propagating it.
    ///
    /// In the parent the action becomes `Running` — except that a
    /// `need_home` action without a configured template must not race
    /// siblings for the real home directory, so the parent immediately
    /// blocks for its completion.
    pub(crate) fn try_execution(&mut self, step: usize, ctx: &RunContext) {
        tracing::info!(action = %self.name, "starting action");
        let _ = io::stdout().flush();
        let _ = io::stderr().flush();

        let pid = unsafe { libc::fork() };
        if pid < 0 {
            let err = io::Error::last_os_error();
            self.status = ActionStatus::Failed;
            self.summary = format!("fork failed: {err}");
            return;
        }

        if pid == 0 {
            // Worker. Must leave via _exit: no unwinding into the parent's
            // state, no flushing of inherited buffers.
            let code = match self.child_body(step, ctx) {
                Ok(()) => 0,
                Err(e) => {
                    eprintln!("*** action {} failed: {e}", self.name);
                    1
                }
            };
            unsafe { libc::_exit(code) }
        }

        self.worker_pid = Some(pid);
        self.status = ActionStatus::Running;
        // Can we really parallelize?
        if self.need_home && ctx.config.home_template.is_none() {
            self.wait_for_completion();
        }
    }

    fn child_body(&self, step: usize, ctx: &RunContext) -> Result<()> {
        let dir = ctx.config.resultdir.join(format!("{step}-{}", self.name));
        fs::create_dir_all(&dir)?;
        env::set_current_dir(&dir)?;

        // Keep the log handle alive for the lifetime of the task body; fds
        // 1 and 2 alias it after dup2.
        let _log = if ctx.config.logs {
            let log = OpenOptions::new()
                .create(true)
                .append(true)
                .open("output.txt")?;
            for target in [libc::STDOUT_FILENO, libc::STDERR_FILENO] {
                if unsafe { libc::dup2(log.as_raw_fd(), target) } < 0 {
                    return Err(crate::error::NightrunError::sys("dup2"));
                }
            }
            Some(log)
        } else {
            None
        };

        if self.need_home {
            if let Some(template) = &ctx.config.home_template {
                home::clone_home(template, &ctx.config.tmpdir, &self.name)?;
            }
        }

        println!("=== starting {} ===", self.name);
        let _ = io::stdout().flush();
        self.task.execute(ctx)
    }

    /// Blocking `waitpid` on the worker; exit 0 maps to `Done`, everything
    /// else to `Failed` with the code captured in the summary.
    pub(crate) fn wait_for_completion(&mut self) {
        let Some(pid) = self.worker_pid.take() else {
            return;
        };
        tracing::info!(action = %self.name, pid, "waiting for action");

        let mut wstatus: libc::c_int = 0;
        let rc = loop {
            let rc = unsafe { libc::waitpid(pid, &mut wstatus, 0) };
            if rc == -1 && io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            break rc;
        };
        if rc == -1 {
            let err = io::Error::last_os_error();
            self.status = ActionStatus::Failed;
            self.summary = format!("waitpid failed: {err}");
            return;
        }

        if libc::WIFEXITED(wstatus) {
            let code = libc::WEXITSTATUS(wstatus);
            tracing::info!(action = %self.name, code, "action finished");
            if code == 0 {
                self.status = ActionStatus::Done;
            } else {
                self.status = ActionStatus::Failed;
                self.summary = format!("return code {code}: failed");
            }
        } else {
            let sig = libc::WTERMSIG(wstatus);
            self.status = ActionStatus::Failed;
            self.summary = format!("terminated by signal {sig}: failed");
        }
    }
}
