//! Single-pass dependency-respecting dispatch of registered actions.
//!
//! The todo list is walked in registration order, which is a valid
//! dependency order by construction: an action may only depend on actions
//! registered before it. Each dispatch forks one worker process; actions
//! without unmet dependencies or forced serialization run fully
//! concurrently and are only joined at the end of the pass.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::process::Command;
use std::{env, fs};

use crate::action::{Action, ActionStatus, SkipCause};
use crate::command::RunContext;
use crate::config::RunConfig;
use crate::error::{NightrunError, Result};

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

/// Aggregate outcome of a scheduler run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Worst status among all executed (non-skipped) actions.
    pub worst: ActionStatus,
    /// Ordered per-action result lines, one per summary event.
    pub summary: Vec<String>,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        if self.worst.completed() {
            0
        } else {
            1
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Owns all registered actions and drives them to a terminal status.
pub struct Scheduler {
    config: RunConfig,
    todo: Vec<Action>,
    index: HashMap<String, usize>,
    summary: Vec<String>,
}

impl Scheduler {
    pub fn new(config: RunConfig) -> Self {
        Self {
            config,
            todo: Vec::new(),
            index: HashMap::new(),
            summary: Vec::new(),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Register an action for later execution. Order matters: dependencies
    /// must already be registered.
    pub fn add(&mut self, action: Action) -> Result<()> {
        if self.index.contains_key(action.name()) {
            return Err(NightrunError::DuplicateAction(action.name().to_string()));
        }
        for dependency in action.dependencies() {
            if !self.index.contains_key(dependency) {
                return Err(NightrunError::UnknownDependency {
                    action: action.name().to_string(),
                    dependency: dependency.clone(),
                });
            }
        }
        self.index.insert(action.name().to_string(), self.todo.len());
        self.todo.push(action);
        Ok(())
    }

    pub fn actions(&self) -> &[Action] {
        &self.todo
    }

    pub fn action(&self, name: &str) -> Option<&Action> {
        self.index.get(name).map(|&i| &self.todo[i])
    }

    /// Whether `name` is enabled itself or transitively required by an
    /// enabled action among the not-yet-dispatched remainder of the todo
    /// list. Recomputed by DFS on every check; at the action counts seen
    /// here memoization has never been worth it.
    fn required(&self, name: &str, remaining_from: usize) -> bool {
        if self.config.enabled.contains(name) {
            return true;
        }
        self.todo[remaining_from..].iter().any(|action| {
            action.dependencies().iter().any(|d| d == name)
                && self.required(action.name(), remaining_from)
        })
    }

    /// Run every registered action once, then aggregate.
    ///
    /// A single action's failure never aborts the run; it cascades only by
    /// skipping dependents. Errors returned here are global unrecoverable
    /// conditions (result directory, summary file, report command).
    pub fn execute(&mut self) -> Result<RunReport> {
        fs::create_dir_all(&self.config.resultdir)?;

        let mut started: Vec<usize> = Vec::new();
        let mut run_servers: Vec<String> = Vec::new();

        for i in 0..self.todo.len() {
            let step = i + 1;
            let name = self.todo[i].name().to_string();

            if !self.config.enabled.is_empty()
                && !self.config.enabled.contains(&name)
                && !self.required(&name, i + 1)
            {
                self.todo[i].mark_skipped(SkipCause::Disabled);
                self.summary
                    .push(format!("{name} skipped: disabled in configuration"));
                continue;
            }

            if self.config.skip.contains(&name) {
                self.todo[i].mark_skipped(SkipCause::AssumedDone);
                self.summary
                    .push(format!("{name} assumed to be done: requested by configuration"));
                continue;
            }

            tracing::info!(
                action = %name,
                dependencies = ?self.todo[i].dependencies(),
                "checking dependencies"
            );
            let deps = self.todo[i].dependencies().to_vec();
            let mut unmet = None;
            for dep in deps {
                let di = self.index[&dep];
                while self.todo[di].status() == ActionStatus::Running {
                    self.todo[di].wait_for_completion();
                }
                if !self.todo[di].satisfies_dependents() {
                    unmet = Some(dep);
                    break;
                }
            }
            if let Some(dep) = unmet {
                self.todo[i].mark_skipped(SkipCause::UnmetDependency(dep.clone()));
                self.summary
                    .push(format!("{name} skipped: required {dep} has not been executed"));
                continue;
            }

            if self.todo[i].is_server() {
                run_servers.push(name.clone());
            }
            let ctx = RunContext {
                config: &self.config,
            };
            self.todo[i].try_execution(step, &ctx);
            started.push(i);
        }

        // Join the parallel set and fold results.
        let mut worst = ActionStatus::Done;
        for &i in &started {
            if self.todo[i].status() == ActionStatus::Running {
                self.todo[i].wait_for_completion();
            }
            worst = worst.max(self.todo[i].status());
            self.summary.push(result_line(&self.todo[i]));
        }

        // Record how this run was invoked alongside the results.
        self.summary.push(String::new());
        self.summary.extend(env::args());

        self.write_summary()?;
        self.run_report_command(&run_servers)?;

        Ok(RunReport {
            worst,
            summary: self.summary.clone(),
        })
    }

    pub fn summary(&self) -> &[String] {
        &self.summary
    }

    /// Append the run summary to `<resultdir>/output.txt`; reruns keep the
    /// history of earlier runs, matching the per-action logs.
    fn write_summary(&self) -> Result<()> {
        let mut out = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.config.resultdir.join("output.txt"))?;
        for line in &self.summary {
            writeln!(out, "{line}")?;
        }
        Ok(())
    }

    /// Hand off to the external report generator, if configured. Its
    /// input/output format is its own business; it learns where to look
    /// through the environment.
    fn run_report_command(&self, run_servers: &[String]) -> Result<()> {
        let Some(report) = &self.config.report_command else {
            return Ok(());
        };
        tracing::info!(command = %report, "running report command");
        let status = Command::new("sh")
            .args(["-c", report])
            .env("NIGHTRUN_RESULT_DIR", &self.config.resultdir)
            .env("NIGHTRUN_SERVERS", run_servers.join(","))
            .status()?;
        if !status.success() {
            return Err(NightrunError::CommandFailed {
                command: report.clone(),
                code: status.code().unwrap_or(-1),
            });
        }
        Ok(())
    }
}

fn result_line(action: &Action) -> String {
    let result = match action.status() {
        ActionStatus::Failed => format!(": {}", action.summary()),
        ActionStatus::Warnings => " done, but check the warnings".to_string(),
        _ => " successful".to_string(),
    };
    tracing::info!(action = %action.name(), status = %action.status(), "action completed");
    format!("{}{result}", action.name())
}
