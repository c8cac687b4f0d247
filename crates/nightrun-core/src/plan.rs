//! YAML run plans: the action graph as data.
//!
//! A plan lists shell-command actions in dependency order; each entry may
//! only depend on entries listed before it, so the list itself is the
//! topological order the scheduler walks.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::action::Action;
use crate::command::CommandTask;
use crate::error::{NightrunError, Result};

#[derive(Debug, Deserialize)]
pub struct Plan {
    pub actions: Vec<PlanAction>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanAction {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Long-running daemon action; lives until its dependents are done.
    #[serde(default)]
    pub server: bool,
    /// Needs an isolated HOME clone before running.
    #[serde(default)]
    pub need_home: bool,
    /// Named locks to hold while the command runs.
    #[serde(default)]
    pub resources: Vec<String>,
    /// Jobserver slots to allocate for the command.
    #[serde(default = "default_jobs")]
    pub jobs: usize,
}

fn default_jobs() -> usize {
    1
}

impl Plan {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        let plan: Plan = serde_yaml::from_str(&text)?;
        plan.validate()?;
        Ok(plan)
    }

    /// Reject duplicate names and dependencies on entries not listed
    /// earlier (which covers both unknown names and forward references).
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashSet<&str> = HashSet::new();
        for action in &self.actions {
            if !seen.insert(&action.name) {
                return Err(NightrunError::DuplicateAction(action.name.clone()));
            }
            for dependency in &action.dependencies {
                if !seen.contains(dependency.as_str()) {
                    return Err(NightrunError::UnknownDependency {
                        action: action.name.clone(),
                        dependency: dependency.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn into_actions(self) -> Vec<Action> {
        self.actions
            .into_iter()
            .map(|entry| {
                let task = CommandTask::new(entry.command)
                    .resources(entry.resources)
                    .jobs(entry.jobs);
                let mut action =
                    Action::new(entry.name, Box::new(task)).depends_on(entry.dependencies);
                if entry.server {
                    action = action.server();
                }
                if entry.need_home {
                    action = action.with_home();
                }
                action
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<Plan> {
        let plan: Plan = serde_yaml::from_str(yaml).map_err(NightrunError::from)?;
        plan.validate()?;
        Ok(plan)
    }

    #[test]
    fn minimal_plan_parses_with_defaults() {
        let plan = parse(
            "actions:\n\
             \x20 - name: compile\n\
             \x20   command: $MAKE all\n",
        )
        .unwrap();
        assert_eq!(plan.actions.len(), 1);
        assert_eq!(plan.actions[0].jobs, 1);
        assert!(!plan.actions[0].server);
        assert!(plan.actions[0].dependencies.is_empty());
    }

    #[test]
    fn forward_dependency_is_rejected() {
        let err = parse(
            "actions:\n\
             \x20 - name: test\n\
             \x20   command: true\n\
             \x20   dependencies: [compile]\n\
             \x20 - name: compile\n\
             \x20   command: true\n",
        )
        .unwrap_err();
        assert!(matches!(err, NightrunError::UnknownDependency { .. }));
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let err = parse(
            "actions:\n\
             \x20 - name: compile\n\
             \x20   command: true\n\
             \x20 - name: compile\n\
             \x20   command: true\n",
        )
        .unwrap_err();
        assert!(matches!(err, NightrunError::DuplicateAction(_)));
    }

    #[test]
    fn into_actions_keeps_flags() {
        let plan = parse(
            "actions:\n\
             \x20 - name: compile\n\
             \x20   command: true\n\
             \x20 - name: dbus\n\
             \x20   command: ./dbus-server\n\
             \x20   dependencies: [compile]\n\
             \x20   server: true\n\
             \x20   need_home: true\n\
             \x20   resources: [session-bus]\n\
             \x20   jobs: 2\n",
        )
        .unwrap();
        let actions = plan.into_actions();
        assert_eq!(actions.len(), 2);
        assert!(actions[1].is_server());
        assert!(actions[1].need_home());
        assert_eq!(actions[1].dependencies(), ["compile".to_string()]);
    }
}
