use std::collections::BTreeSet;
use std::path::PathBuf;

/// Run-wide configuration, constructed once and passed by reference to the
/// scheduler and every action. There is no global state.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Scratch space (home-directory clones live under `<tmpdir>/home/`).
    pub tmpdir: PathBuf,
    /// Where sources are checked out and built.
    pub workdir: PathBuf,
    /// Per-action subdirectories and the summary `output.txt` go here.
    pub resultdir: PathBuf,
    /// Template for per-action isolated HOME directories. When set,
    /// `need_home` actions can run concurrently; when unset they are
    /// serialized relative to all others.
    pub home_template: Option<PathBuf>,
    /// Explicit run request: only these actions and whatever transitively
    /// depends on them execute. Empty means "everything".
    pub enabled: BTreeSet<String>,
    /// Actions assumed to be already done. Satisfies dependents.
    pub skip: BTreeSet<String>,
    /// Redirect each action's stdout/stderr into its own `output.txt`.
    pub logs: bool,
    /// Make invocation exported to task commands as `$MAKE`.
    pub make_command: String,
    /// External report generator, run after the summary is written.
    pub report_command: Option<String>,
    /// Path of the `resources` lock-wrapper binary used to gate task
    /// commands on named locks and jobserver slots.
    pub resources_helper: Option<PathBuf>,
}

impl RunConfig {
    pub fn new(
        tmpdir: impl Into<PathBuf>,
        workdir: impl Into<PathBuf>,
        resultdir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            tmpdir: tmpdir.into(),
            workdir: workdir.into(),
            resultdir: resultdir.into(),
            home_template: None,
            enabled: BTreeSet::new(),
            skip: BTreeSet::new(),
            logs: true,
            make_command: "make".to_string(),
            report_command: None,
            resources_helper: None,
        }
    }
}
