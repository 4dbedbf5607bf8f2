use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use intentc::agent::{Agent, CliAgent};
use intentc::config::Config;
use intentc::orchestrator::{BuildReport, PlannedAction, TargetOutcome};
use intentc::provider::DirectoryProvider;
use intentc::state::open_store;
use intentc::{BuildRequest, Orchestrator, Result};

/// intentc - build targets from declared intent with an AI agent
#[derive(Parser, Debug)]
#[command(name = "intentc")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    INTENTC_DEBUG=1     Enable debug logging (alternative to --debug)\n    RUST_LOG            Override the log filter"
)]
pub struct Cli {
    /// Enable debug logging (writes to .intentc/intentc.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Project root (defaults to the current directory)
    #[arg(short = 'C', long = "project", value_name = "DIR", global = true)]
    pub project: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Build one target and its dependencies, or everything not yet built
    Build {
        /// Target to build; omit to build every unbuilt target
        target: Option<String>,

        /// Rebuild targets that are already built
        #[arg(short, long)]
        force: bool,

        /// Print the plan without building anything
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Build profile (defaults to the configured default_profile)
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Show the status of every target
    Status {
        #[arg(short, long)]
        profile: Option<String>,
    },

    /// List recorded build attempts for a target
    History {
        target: String,

        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Print the dependency graph
    Graph,

    /// List a target and everything that depends on it
    Affected { target: String },

    /// Remove generated files and reset status to pending
    Clean {
        /// Target to clean; omit to clean the whole profile
        target: Option<String>,

        #[arg(short, long)]
        profile: Option<String>,
    },

    /// Write a default config and prepare the state store
    Init,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let root = match &cli.project {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };

    let state_dir = Config::state_dir(&root);
    let log_dir = (state_dir.is_dir() || cli.command == Command::Init).then_some(state_dir);
    intentc::log::init_with_debug(cli.debug, log_dir.as_deref());
    debug!(root = %root.display(), command = ?cli.command, "intentc starting");

    match cli.command {
        Command::Init => run_init(&root),
        Command::Build {
            target,
            force,
            dry_run,
            profile,
        } => {
            let request = BuildRequest {
                target,
                profile,
                force,
                dry_run,
            };
            run_build(&root, request)
        }
        Command::Status { profile } => run_status(&root, profile.as_deref()),
        Command::History { target, profile } => run_history(&root, &target, profile.as_deref()),
        Command::Graph => {
            let orchestrator = open(&root, false)?;
            print!("{}", orchestrator.graph()?.visualize());
            Ok(())
        }
        Command::Affected { target } => {
            let orchestrator = open(&root, false)?;
            for name in orchestrator.affected(&target)? {
                println!("{}", name);
            }
            Ok(())
        }
        Command::Clean { target, profile } => {
            let orchestrator = open(&root, false)?;
            let report = orchestrator.clean(target.as_deref(), profile.as_deref())?;
            println!(
                "Cleaned profile '{}': removed {} path(s), reset {} target(s)",
                report.profile,
                report.removed.len(),
                report.reset.len()
            );
            Ok(())
        }
    }
}

/// Wire config, provider, store and agent together for `root`.
///
/// Only a real build prepares the store and resolves the agent command on
/// `PATH`; every other command works against existing state.
fn open(root: &Path, for_build: bool) -> Result<Orchestrator> {
    let config = Config::load(root)?;
    let provider = Arc::new(DirectoryProvider::new(&config.intent_dir(root)));
    let store = open_store(&config, root);

    let agent: Arc<dyn Agent> = if for_build {
        store.initialize()?;
        Arc::new(CliAgent::from_config(&config.agent)?)
    } else {
        Arc::new(CliAgent::new(&config.agent.command))
    };
    Ok(Orchestrator::new(root, config, provider, store, agent))
}

fn run_init(root: &Path) -> Result<()> {
    let config_path = Config::config_path(root);
    let config = if config_path.exists() {
        println!("Config already present at {}", config_path.display());
        Config::load(root)?
    } else {
        let config = Config::default();
        config.save(root)?;
        println!("Wrote {}", config_path.display());
        config
    };

    let intent_dir = config.intent_dir(root);
    std::fs::create_dir_all(&intent_dir)?;
    open_store(&config, root).initialize()?;
    info!(root = %root.display(), "project initialized");
    println!("Targets go in {}/<name>/intent.toml", intent_dir.display());
    Ok(())
}

fn run_build(root: &Path, request: BuildRequest) -> Result<()> {
    let orchestrator = open(root, !request.dry_run)?;
    let rt = tokio::runtime::Runtime::new()?;

    let report = rt.block_on(async {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Interrupted, cancelling build");
                on_interrupt.cancel();
            }
        });
        orchestrator.build(&request, &cancel).await
    })?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &BuildReport) {
    let plan = &report.plan;
    if report.dry_run {
        println!(
            "Plan for profile '{}' (output: {}):",
            plan.profile,
            plan.output_dir.display()
        );
        if plan.is_empty() {
            println!("  nothing to build");
        }
        for (i, step) in plan.targets.iter().enumerate() {
            let action = match step.action {
                PlannedAction::Build => "build",
                PlannedAction::Skip => "skip ",
            };
            println!("  {:>2}. {} {} ({})", i + 1, action, step.name, step.status);
        }
        return;
    }

    if report.outcomes.is_empty() {
        println!("Nothing to build for profile '{}'", plan.profile);
        return;
    }
    for outcome in &report.outcomes {
        match outcome {
            TargetOutcome::Built(result) => println!(
                "built    {} [{}] {} file(s)",
                result.target,
                result.generation_id.short(),
                result.files.len()
            ),
            TargetOutcome::Skipped { target } => println!("skipped  {} (already built)", target),
        }
    }
    println!(
        "Profile '{}': {} built, {} skipped",
        plan.profile,
        report.built().len(),
        report.skipped().len()
    );
}

fn run_status(root: &Path, profile: Option<&str>) -> Result<()> {
    let orchestrator = open(root, false)?;
    let profile = orchestrator.resolve_profile(profile)?;
    let states = orchestrator.status(Some(&profile))?;

    println!("Profile: {}", profile);
    if states.is_empty() {
        println!("No targets defined.");
        return Ok(());
    }
    println!("{:<24} {:<10} {:<10} LAST BUILD", "TARGET", "STATUS", "GENERATION");
    for state in states {
        let (generation, when) = match &state.latest {
            Some(result) => (
                result.generation_id.short(),
                result.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            ),
            None => ("-".to_string(), "-".to_string()),
        };
        let note = if state.is_cleaned() { " (cleaned)" } else { "" };
        println!(
            "{:<24} {:<10} {:<10} {}{}",
            state.name,
            state.status.as_str(),
            generation,
            when,
            note
        );
    }
    Ok(())
}

fn run_history(root: &Path, target: &str, profile: Option<&str>) -> Result<()> {
    let orchestrator = open(root, false)?;
    let profile = orchestrator.resolve_profile(profile)?;
    let results = orchestrator.history(target, Some(&profile))?;

    if results.is_empty() {
        println!("No builds recorded for '{}' under profile '{}'", target, profile);
        return Ok(());
    }
    for result in results {
        let outcome = if result.success { "ok" } else { "failed" };
        println!(
            "{}  {}  {:<6}  {} file(s)",
            result.timestamp.format("%Y-%m-%d %H:%M:%S"),
            result.generation_id,
            outcome,
            result.files.len()
        );
        if let Some(error) = &result.error {
            println!("    {}", error);
        }
    }
    Ok(())
}
