use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use nightrun_core::{Plan, RunConfig, Scheduler};

#[derive(Parser)]
#[command(
    name = "nightrun",
    about = "Dependency-graph test/build orchestrator — one forked process per action",
    version
)]
struct Cli {
    /// Run plan: YAML list of actions in dependency order
    #[arg(long, env = "NIGHTRUN_PLAN")]
    plan: PathBuf,

    /// Restrict execution to these actions and whatever transitively
    /// depends on them (repeatable, comma-separated)
    #[arg(long, value_delimiter = ',')]
    enable: Vec<String>,

    /// Assume the named action is already done (repeatable)
    #[arg(long)]
    skip: Vec<String>,

    /// Scratch directory (home clones live here)
    #[arg(long, default_value = "nightrun-tmp")]
    tmp: PathBuf,

    /// Directory for checkouts and builds
    #[arg(long, default_value = ".")]
    workdir: PathBuf,

    /// Directory for per-action results and the summary output.txt
    #[arg(long, default_value = "nightrun-results")]
    resultdir: PathBuf,

    /// HOME template; enables per-action isolated HOME cloning and thus
    /// concurrent need_home actions
    #[arg(long)]
    home_template: Option<PathBuf>,

    /// Make invocation exported to task commands as $MAKE
    #[arg(long, default_value = "make")]
    make_command: String,

    /// External report generator run after the summary is written
    #[arg(long)]
    report_command: Option<String>,

    /// Don't redirect per-action output into output.txt files
    #[arg(long)]
    no_logs: bool,
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
            // Print the full error chain (anyhow's alternate Display)
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let plan = Plan::load(&cli.plan)
        .with_context(|| format!("failed to load plan {}", cli.plan.display()))?;

    let mut config = RunConfig::new(
        absolute(&cli.tmp)?,
        absolute(&cli.workdir)?,
        absolute(&cli.resultdir)?,
    );
    config.home_template = cli
        .home_template
        .as_deref()
        .map(|p| fs::canonicalize(p).with_context(|| format!("cannot resolve {}", p.display())))
        .transpose()?;
    config.enabled = BTreeSet::from_iter(cli.enable);
    config.skip = BTreeSet::from_iter(cli.skip);
    config.logs = !cli.no_logs;
    config.make_command = cli.make_command;
    config.report_command = cli.report_command;
    config.resources_helper = find_resources_helper();

    let mut scheduler = Scheduler::new(config);
    for action in plan.into_actions() {
        scheduler.add(action)?;
    }

    let report = scheduler.execute().context("run failed")?;
    for line in &report.summary {
        println!("{line}");
    }
    Ok(report.exit_code())
}

/// Workers chdir into per-action subdirectories, so every configured path
/// has to be absolute before the first fork.
fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    fs::create_dir_all(path)
        .with_context(|| format!("cannot create directory {}", path.display()))?;
    fs::canonicalize(path).with_context(|| format!("cannot resolve {}", path.display()))
}

/// The `resources` lock wrapper ships next to the orchestrator binary.
fn find_resources_helper() -> Option<PathBuf> {
    let helper = std::env::current_exe().ok()?.with_file_name("resources");
    helper.is_file().then_some(helper)
}
