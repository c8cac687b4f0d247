//! Dependency-graph test/build orchestration.
//!
//! One forked OS process per action, bounded total parallelism via the GNU
//! make jobserver protocol and named `flock` files, and escalating shutdown
//! for child daemons. The scheduler walks actions in registration order —
//! a valid dependency order by construction — dispatching each into its own
//! worker process and joining the parallel set at the end of the pass.

pub mod action;
pub mod command;
pub mod config;
pub mod error;
pub mod home;
pub mod jobserver;
pub mod lock;
pub mod plan;
pub mod scheduler;
pub mod supervisor;
pub mod task;

pub use action::{Action, ActionStatus, SkipCause};
pub use command::{CommandTask, RunContext};
pub use config::RunConfig;
pub use error::{NightrunError, Result};
pub use jobserver::Jobserver;
pub use plan::Plan;
pub use scheduler::{RunReport, Scheduler};
pub use task::{FnTask, NopTask, Task};
