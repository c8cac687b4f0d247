//! Lock named resources and make-jobserver slots while running a command.
//!
//! `resources -r db -j 2 -- make check` takes a blocking exclusive `flock`
//! on one file per resource under `RESOURCES_DIR`, allocates two jobserver
//! slots if a jobserver was inherited, runs the command, returns the slots,
//! and exits with the command's status. The locks are simply held until
//! process exit — the OS releases them, crash included.

use std::path::PathBuf;
use std::process::Command;

use anyhow::Context;
use clap::Parser;
use nightrun_core::{lock, Jobserver};

#[derive(Parser)]
#[command(
    name = "resources",
    about = "Run a command while holding named resource locks and jobserver slots",
    version
)]
struct Cli {
    /// Resource to lock exclusively while running the command (repeatable).
    /// `RESOURCES_<NAME>=a,b` remaps a logical name onto physical ones.
    #[arg(short = 'r', long = "resource")]
    resources: Vec<String>,

    /// Job slots to allocate from the make jobserver. Ignored if not
    /// running under a jobserver.
    #[arg(short = 'j', long = "jobs", default_value_t = 1)]
    jobs: usize,

    /// Directory holding one lock file per resource
    #[arg(long, env = lock::RESOURCES_DIR_ENV)]
    resources_dir: Option<PathBuf>,

    /// Command to run with the locks held
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    // Held until process exit; release is the OS's job.
    let _locks = if cli.resources.is_empty() {
        None
    } else {
        let dir = cli
            .resources_dir
            .context("RESOURCES_DIR is not set but resources were requested")?;
        let resources = lock::expand_resources(&cli.resources);
        tracing::info!(?resources, "locking resources");
        Some(lock::lock_resources(&dir, &resources)?)
    };

    let mut jobserver = Jobserver::from_env();
    let mut allocated = 0;
    if jobserver.active() && cli.jobs > 0 {
        tracing::info!(jobs = cli.jobs, "allocating job slots");
        jobserver.alloc(cli.jobs)?;
        allocated = cli.jobs;
        tracing::info!(jobs = cli.jobs, "allocated job slots");
    }

    let status = Command::new(&cli.command[0])
        .args(&cli.command[1..])
        .status()
        .with_context(|| format!("cannot run {:?}", cli.command[0]));

    // Return job tokens even when the command could not be run. The locks
    // need no such cleanup: quitting releases them automatically.
    tracing::info!("cleaning up");
    if allocated > 0 {
        jobserver.free(allocated)?;
    }

    let status = status?;
    Ok(status.code().unwrap_or(1))
}
