use crate::command::RunContext;
use crate::error::Result;

/// The unit of work behind an action.
///
/// `execute` runs inside a forked worker process with the current directory
/// set to the action's own result subdirectory and, when logging is on,
/// stdout/stderr redirected into that directory's `output.txt`. The body is
/// opaque to the scheduler: it may freely mutate cwd, environment, and
/// signal state without leaking into siblings. Any error is the task's
/// failure.
pub trait Task {
    fn execute(&self, ctx: &RunContext) -> Result<()>;
}

/// A task body built from a plain function. Mostly useful for tests and
/// embedders that drive the scheduler programmatically.
pub struct FnTask<F>(pub F);

impl<F> Task for FnTask<F>
where
    F: Fn(&RunContext) -> Result<()>,
{
    fn execute(&self, ctx: &RunContext) -> Result<()> {
        self.0(ctx)
    }
}

/// A task that does nothing; a named synchronization point in the graph.
pub struct NopTask;

impl Task for NopTask {
    fn execute(&self, _ctx: &RunContext) -> Result<()> {
        Ok(())
    }
}
