//! Thin binary wiring a minimal CLI onto `ru_core`. Argument parsing
//! beyond what's listed here, help rendering, shell completion,
//! self-update, `robot-docs`, `doctor`, and colorized output are all
//! out of scope for this crate; this binary exists only to exercise the
//! library end to end.

use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};

use ru_core::config::{FetchStrategy, RuConfig};
use ru_core::discovery::WorkItemKind;
use ru_core::envelope::{DiscoverySummary, Envelope};
use ru_core::git::{self, ConfirmationToken, ForkCleanRequest, ForkSyncRequest};
use ru_core::logging;
use ru_core::orchestrator::{checkpoint::Mode, CancelFlag, Orchestrator, ReviewOptions, RunOutcome};
use ru_core::paths::Paths;
use ru_core::registry;
use ru_core::{driver, RuError};

#[derive(Parser)]
#[command(name = "ru", about = "Fleet management and AI-assisted review orchestration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, ValueEnum)]
enum CliStrategy {
    FfOnly,
    Rebase,
    Merge,
}

impl From<CliStrategy> for FetchStrategy {
    fn from(s: CliStrategy) -> Self {
        match s {
            CliStrategy::FfOnly => FetchStrategy::FfOnly,
            CliStrategy::Rebase => FetchStrategy::Rebase,
            CliStrategy::Merge => FetchStrategy::Merge,
        }
    }
}

#[derive(Copy, Clone, ValueEnum)]
enum CliMode {
    Plan,
    Local,
}

#[derive(Subcommand)]
enum Commands {
    /// Discover work items across the fleet and run AI-assisted review
    /// sessions against each repository with pending work.
    Review {
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        status: bool,
        #[arg(long, value_enum, default_value = "local")]
        mode: CliMode,
        #[arg(long, value_enum, default_value = "ff-only")]
        strategy: CliStrategy,
        #[arg(long)]
        non_interactive: bool,
        #[arg(long)]
        json: bool,
        #[arg(long)]
        keep_sessions: bool,
    },
    /// Advance forks' default branches to their upstream tip.
    ForkSync {
        repo: Vec<String>,
        #[arg(long, value_enum, default_value = "ff-only")]
        strategy: CliStrategy,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        no_fetch: bool,
    },
    /// Reset a polluted fork's default branch to upstream, rescuing
    /// local work onto a `rescue/*` branch first.
    ForkClean {
        repo: Vec<String>,
        #[arg(long)]
        no_rescue: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    logging::init_stderr_logger();
    let cli = Cli::parse();
    let paths = Paths::resolve();

    let result = match cli.command {
        Commands::Review { dry_run, status, mode, strategy: _, non_interactive: _, json, keep_sessions } => {
            run_review(&paths, dry_run, status, mode, json, keep_sessions)
        }
        Commands::ForkSync { repo, strategy, dry_run, no_fetch } => {
            run_fork_sync(&paths, repo, strategy.into(), dry_run, no_fetch)
        }
        Commands::ForkClean { repo, no_rescue, dry_run, force } => {
            run_fork_clean(&paths, repo, !no_rescue, dry_run, force)
        }
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn load_repos(paths: &Paths) -> Result<registry::RepoList, RuError> {
    let loaded = registry::load_registry(&paths.repos_d())?;
    for warning in &loaded.warnings {
        eprintln!("warning: {}:{}: {}", warning.file.display(), warning.line_number, warning.detail);
    }
    Ok(loaded.repos)
}

fn run_review(
    paths: &Paths,
    dry_run: bool,
    status: bool,
    mode: CliMode,
    json: bool,
    keep_sessions: bool,
) -> Result<ExitCode, RuError> {
    let config = RuConfig::load(paths).map_err(|e| RuError::PrereqConfig { detail: e.to_string() })?;
    let registry = load_repos(paths)?;

    let driver_name = driver::detect_driver();
    let driver: Box<dyn ru_core::driver::SessionDriver> = match driver_name {
        Some(name) => driver::load_driver(name)?,
        None if dry_run || status => Box::new(driver::NullDriver),
        None => return Err(RuError::DriverUnavailable { detail: "no session driver found on PATH".into() }),
    };

    let mut orchestrator = Orchestrator::new(paths, &config, driver);
    install_sigint_handler(orchestrator.cancel.clone());

    let options = ReviewOptions {
        mode: match mode {
            CliMode::Plan => Mode::Plan,
            CliMode::Local => Mode::Local,
        },
        dry_run,
        status_only: status,
        keep_sessions,
        kinds: vec![WorkItemKind::Issue, WorkItemKind::Pr],
        since: None,
    };

    match orchestrator.run(&registry, options) {
        Ok(RunOutcome::Status(data)) => {
            if json {
                Envelope::<_, serde_json::Value>::new("review", "status", data).emit()?;
            } else {
                eprintln!("lock held: {}", data.lock.held);
            }
            Ok(ExitCode::SUCCESS)
        }
        Ok(RunOutcome::Discovery(data)) => {
            let mut summary = DiscoverySummary::default();
            summary.items_found = data.items.len();
            for item in &data.items {
                match item.kind {
                    ru_core::discovery::WorkItemKind::Issue => summary.by_type.issues += 1,
                    ru_core::discovery::WorkItemKind::Pr => summary.by_type.prs += 1,
                }
                *summary.by_repo.entry(item.repo_id.clone()).or_insert(0) += 1;
            }
            if summary.items_found == 0 {
                eprintln!("no work items found");
            }
            if json {
                Envelope::new("review", "discovery", data.items).with_summary(summary).emit()?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Ok(RunOutcome::Finished(summary)) => {
            if json {
                Envelope::<_, serde_json::Value>::new("review", "local", summary).emit()?;
            } else {
                eprintln!(
                    "review run finished: {}/{} repos completed, {} failed",
                    summary.repos_completed,
                    summary.repos_total,
                    summary.failed.len()
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => Err(e),
    }
}

fn run_fork_sync(
    paths: &Paths,
    repos: Vec<String>,
    strategy: FetchStrategy,
    dry_run: bool,
    no_fetch: bool,
) -> Result<ExitCode, RuError> {
    let config = RuConfig::load(paths).map_err(|e| RuError::PrereqConfig { detail: e.to_string() })?;
    let registry = select_repos(paths, &repos)?;

    for spec in registry.iter() {
        let repo_id = spec.github_id();
        let local_path = registry::resolve_local_path(spec, &paths.projects_dir, config.layout);
        if !local_path.exists() {
            eprintln!("{repo_id}: no local clone at {}", local_path.display());
            continue;
        }
        let outcome = git::fork_sync(ForkSyncRequest {
            repo_id: &repo_id,
            path: &local_path,
            strategy,
            dry_run,
            no_fetch,
        });
        match outcome {
            Ok(o) => println!("{repo_id}: {o:?}"),
            Err(e) => eprintln!("{repo_id}: {e}"),
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn run_fork_clean(
    paths: &Paths,
    repos: Vec<String>,
    rescue: bool,
    dry_run: bool,
    force: bool,
) -> Result<ExitCode, RuError> {
    let config = RuConfig::load(paths).map_err(|e| RuError::PrereqConfig { detail: e.to_string() })?;
    let registry = select_repos(paths, &repos)?;
    let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%SZ").to_string();

    for spec in registry.iter() {
        let repo_id = spec.github_id();
        let local_path = registry::resolve_local_path(spec, &paths.projects_dir, config.layout);
        if !local_path.exists() {
            eprintln!("{repo_id}: no local clone at {}", local_path.display());
            continue;
        }
        let outcome = git::fork_clean(ForkCleanRequest {
            repo_id: &repo_id,
            path: &local_path,
            rescue,
            dry_run,
            force,
            confirmation: force.then(ConfirmationToken::pre_acquired),
            timestamp: &timestamp,
        });
        match outcome {
            Ok(o) => println!("{repo_id}: {o:?}"),
            Err(e) => eprintln!("{repo_id}: {e}"),
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn select_repos(paths: &Paths, filter: &[String]) -> Result<registry::RepoList, RuError> {
    let registry = load_repos(paths)?;
    if filter.is_empty() {
        return Ok(registry);
    }
    let filter: std::collections::HashSet<&str> = filter.iter().map(String::as_str).collect();
    Ok(registry.iter().filter(|r| filter.contains(r.github_id().as_str())).cloned().collect())
}

/// First SIGINT flips `cancel`, which the orchestrator observes at its
/// next MONITOR poll and unwinds cleanly. A second SIGINT within 2s
/// means the operator wants out now; this exits the process directly
/// rather than waiting for the checkpoint save to finish.
#[cfg(unix)]
fn install_sigint_handler(cancel: CancelFlag) {
    use std::time::{Duration, Instant};

    let mut signals = match signal_hook::iterator::Signals::new([signal_hook::consts::SIGINT]) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("could not install SIGINT handler: {e}");
            return;
        }
    };
    std::thread::spawn(move || {
        let mut first_at: Option<Instant> = None;
        for _ in signals.forever() {
            match first_at {
                Some(at) if at.elapsed() < Duration::from_secs(2) => {
                    eprintln!("\nsecond interrupt, exiting immediately");
                    std::process::exit(130);
                }
                _ => {
                    eprintln!("\ninterrupting in-flight sessions, press Ctrl-C again to force quit");
                    cancel.cancel();
                    first_at = Some(Instant::now());
                }
            }
        }
    });
}

#[cfg(not(unix))]
fn install_sigint_handler(_cancel: CancelFlag) {}
