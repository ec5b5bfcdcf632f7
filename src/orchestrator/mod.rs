//! C5 — the review orchestrator: the state machine described in the
//! specification's §4.5,
//!
//! ```text
//! INIT → LOCK → PREREQ → DISCOVER → [DRY-RUN-EXIT] → CHECKPOINT-LOAD
//!   → PLAN → ALLOCATE → LAUNCH → MONITOR → DRAIN → CHECKPOINT-FINAL → RELEASE
//! ```

pub mod checkpoint;
pub mod lock;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use checkpoint::{Mode, RunCheckpoint};
pub use lock::{RunLock, RunLockInfo};

use crate::concurrency;
use crate::config::RuConfig;
use crate::discovery::{self, DiscoveryRequest, WorkItem, WorkItemKind};
use crate::driver::{SessionDriver, SessionState};
use crate::envelope::FailedEntry;
use crate::error::RuError;
use crate::git;
use crate::logging::RunLog;
use crate::paths::Paths;
use crate::registry::{self, RepoList, RepoSpec};

/// Mapping from repo_id to its allocated worktree, persisted at
/// `<worktrees_dir>/mapping.json` (§3 WorktreeRecord).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorktreeRecord {
    pub worktree_path: PathBuf,
    pub branch_name: String,
    pub created_at: DateTime<Utc>,
    pub run_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorktreeMapping(pub IndexMap<String, WorktreeRecord>);

impl WorktreeMapping {
    pub fn load(path: &std::path::Path) -> Result<Self, RuError> {
        if !path.exists() {
            return Ok(WorktreeMapping::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &std::path::Path) -> Result<(), RuError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LockStatus {
    pub held: bool,
    pub run_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub pid: Option<u32>,
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckpointStatus {
    pub exists: bool,
    pub run_id: Option<String>,
    pub repos_total: usize,
    pub repos_completed: usize,
    pub repos_pending: usize,
    pub questions_pending: usize,
    pub completed_repos: Vec<String>,
    pub pending_repos: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusData {
    pub lock: LockStatus,
    pub checkpoint: CheckpointStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryData {
    pub items: Vec<WorkItem>,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct RunSummaryData {
    pub repos_total: usize,
    pub repos_completed: usize,
    pub questions_pending: usize,
    pub failed: Vec<FailedEntry>,
}

pub enum RunOutcome {
    /// `review --status`, or a blocked lock acquisition in status mode.
    Status(StatusData),
    /// `review --dry-run`.
    Discovery(DiscoveryData),
    /// A full INIT→RELEASE run completed (possibly with some repos failed
    /// or interrupted mid-drain).
    Finished(RunSummaryData),
}

pub struct ReviewOptions {
    pub mode: Mode,
    pub dry_run: bool,
    pub status_only: bool,
    pub keep_sessions: bool,
    pub kinds: Vec<WorkItemKind>,
    pub since: Option<DateTime<Utc>>,
}

/// Generates an 8-12 character opaque run id unique to this process.
pub fn generate_run_id() -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let pid = std::process::id() as u128;
    format!("{:x}", (nanos ^ (pid << 32)) & 0xFFFF_FFFF_FFFF)
}

/// Cooperative cancellation flag observed at MONITOR's poll points. The
/// binary installs a SIGINT handler that flips this on the first signal
/// and exits immediately on a second signal within 2s; that immediate
/// exit path lives in the binary, not here, since it terminates the
/// process outright.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        CancelFlag(Arc::new(AtomicBool::new(false)))
    }
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct Orchestrator<'a> {
    pub paths: &'a Paths,
    pub config: &'a RuConfig,
    pub driver: Box<dyn SessionDriver>,
    pub cancel: CancelFlag,
}

impl<'a> Orchestrator<'a> {
    pub fn new(paths: &'a Paths, config: &'a RuConfig, driver: Box<dyn SessionDriver>) -> Self {
        Orchestrator { paths, config, driver, cancel: CancelFlag::new() }
    }

    fn status(&self) -> Result<StatusData, RuError> {
        let lock_info = lock::read_info(&self.paths.review_lock_info())?;
        let lock = match lock_info {
            Some(info) => LockStatus {
                held: true,
                run_id: Some(info.run_id),
                started_at: Some(info.started_at),
                pid: Some(info.pid),
                mode: Some(info.mode),
            },
            None => LockStatus::default(),
        };

        let checkpoint = RunCheckpoint::load(&self.paths.review_checkpoint())?;
        let checkpoint_status = match checkpoint {
            Some(c) => CheckpointStatus {
                exists: true,
                run_id: Some(c.run_id),
                repos_total: c.repos_total,
                repos_completed: c.repos_completed,
                repos_pending: c.repos_pending,
                questions_pending: c.questions_pending,
                completed_repos: c.completed_repos.into_iter().collect(),
                pending_repos: c.pending_repos.into_iter().collect(),
            },
            None => CheckpointStatus::default(),
        };

        Ok(StatusData { lock, checkpoint: checkpoint_status })
    }

    /// Drives INIT→RELEASE (or an early exit at DISCOVER/LOCK per
    /// `options`).
    pub fn run(&mut self, registry: &RepoList, options: ReviewOptions) -> Result<RunOutcome, RuError> {
        // INIT
        let run_id = generate_run_id();
        let config_hash = registry::config_hash(registry);
        log::info!("run {run_id}: starting (mode={:?})", options.mode);

        if options.status_only {
            // LOCK (status path): a held lock is not an error here.
            return Ok(RunOutcome::Status(self.status()?));
        }

        // LOCK
        let run_lock = lock::RunLock::acquire(
            &self.paths.review_lock(),
            &self.paths.review_lock_info(),
            &run_id,
            std::process::id(),
            &options.mode.to_string(),
        )?;

        let result = self.run_locked(registry, &run_id, &config_hash, options);

        // RELEASE
        if let Err(e) = run_lock.release() {
            log::warn!("run {run_id}: failed to release lock cleanly: {e}");
        }
        result
    }

    fn run_locked(
        &mut self,
        registry: &RepoList,
        run_id: &str,
        config_hash: &str,
        options: ReviewOptions,
    ) -> Result<RunOutcome, RuError> {
        let run_log = RunLog::open(&self.paths.logs_dir(), run_id)?;
        run_log.append(run_id, "init", serde_json::json!({"mode": options.mode.to_string()}))?;

        // PREREQ
        discovery::auth_precheck()?;

        // DISCOVER
        let repos: Vec<RepoSpec> = registry.iter().cloned().collect();
        let items = discovery::discover_work_items(
            &repos,
            &DiscoveryRequest {
                kinds: &options.kinds,
                since: options.since,
                batch_size: self.config.batch_size,
                items_per_repo: 20,
                skip_forks: self.config.skip_forks,
            },
        )?;
        run_log.append(run_id, "discover", serde_json::json!({"items_found": items.len()}))?;

        if options.dry_run {
            return Ok(RunOutcome::Discovery(DiscoveryData { items }));
        }

        // CHECKPOINT-LOAD
        let checkpoint_path = self.paths.review_checkpoint();
        let now = Utc::now();
        let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
        let mut checkpoint = checkpoint::load_or_init(
            &checkpoint_path,
            &|| self.paths.review_checkpoint_backup(&timestamp),
            registry,
            options.mode,
            run_id,
            config_hash,
            self.config.checkpoint_restart_policy,
            now,
        )?;

        // PLAN: repos with no discovered work move straight to completed.
        let mut repos_with_work: BTreeMap<String, Vec<&WorkItem>> = BTreeMap::new();
        for item in &items {
            repos_with_work.entry(item.repo_id.clone()).or_default().push(item);
        }
        let planned: Vec<String> = checkpoint
            .pending_repos
            .iter()
            .filter(|id| repos_with_work.contains_key(id.as_str()))
            .cloned()
            .collect();
        let no_work: Vec<String> = checkpoint
            .pending_repos
            .iter()
            .filter(|id| !repos_with_work.contains_key(id.as_str()))
            .cloned()
            .collect();
        for id in &no_work {
            checkpoint.mark_completed(id);
        }

        let mut failed = Vec::new();

        // ALLOCATE + LAUNCH: bounded parallelism over independent per-repo
        // worktree checkouts and session launches; results are folded back
        // into checkpoint/mapping state sequentially below.
        let mut mapping = WorktreeMapping::load(&self.paths.worktree_mapping())?;
        let mut allocated: Vec<String> = Vec::new();
        let planned_specs: Vec<RepoSpec> = planned
            .iter()
            .filter_map(|repo_id| repos.iter().find(|r| &r.github_id() == repo_id).cloned())
            .collect();
        let launch_results = concurrency::parallel_agent_sweep(self.config.workers, planned_specs, |spec| {
            let repo_id = spec.github_id();
            let outcome = self.allocate_and_launch(&spec, run_id);
            (repo_id, outcome)
        });
        for (repo_id, outcome) in launch_results {
            match outcome {
                Ok(record) => {
                    mapping.0.insert(repo_id.clone(), record);
                    allocated.push(repo_id);
                }
                Err(e) => {
                    log::warn!("run {run_id}: {repo_id}: allocate/launch failed: {e}");
                    failed.push(FailedEntry {
                        repo_id: repo_id.clone(),
                        kind: e.kind().to_string(),
                        detail: e.to_string(),
                    });
                    checkpoint.mark_completed(&repo_id);
                }
            }
        }
        mapping.save(&self.paths.worktree_mapping())?;
        run_log.append(
            run_id,
            "allocate",
            serde_json::json!({"allocated": allocated.len(), "failed": failed.len()}),
        )?;

        // MONITOR
        let session_id = |repo_id: &str| format!("ru-{run_id}-{}", repo_id.replace('/', "-"));
        let wall_clock_deadline = Instant::now() + Duration::from_secs(self.config.monitor_wall_clock_secs);
        let poll_interval = Duration::from_millis(self.config.monitor_poll_interval_ms);
        let questions_pending = Arc::new(AtomicUsize::new(0));
        let mut remaining: Vec<String> = allocated.clone();
        run_log.append(run_id, "monitor_started", serde_json::json!({"sessions": remaining.len()}))?;

        while !remaining.is_empty() {
            if self.cancel.is_cancelled() {
                for repo_id in &remaining {
                    let _ = self.driver.interrupt_session(&session_id(repo_id));
                }
                checkpoint.save(&checkpoint_path)?;
                let _ = run_log.append(run_id, "interrupted", serde_json::json!({"remaining": remaining.len()}));
                return Err(RuError::Interrupted);
            }
            if Instant::now() >= wall_clock_deadline {
                log::warn!("run {run_id}: wall clock exceeded, interrupting remaining sessions");
                for repo_id in &remaining {
                    let _ = self.driver.interrupt_session(&session_id(repo_id));
                }
                break;
            }

            remaining.retain(|repo_id| {
                let report = self.driver.get_session_state(&session_id(repo_id));
                match report.state {
                    SessionState::Complete => {
                        checkpoint.mark_completed(repo_id);
                        false
                    }
                    SessionState::Dead => {
                        failed.push(FailedEntry {
                            repo_id: repo_id.clone(),
                            kind: "driver_failed".into(),
                            detail: "session died before completion".into(),
                        });
                        checkpoint.mark_completed(repo_id);
                        false
                    }
                    SessionState::Generating | SessionState::Unknown => true,
                }
            });

            if !remaining.is_empty() {
                std::thread::sleep(poll_interval);
            }
        }
        checkpoint.questions_pending = questions_pending.load(Ordering::SeqCst);

        // DRAIN
        checkpoint.save(&checkpoint_path)?;
        if !options.keep_sessions {
            for repo_id in &allocated {
                let _ = self.driver.stop_session(&session_id(repo_id));
            }
        }
        run_log.append(
            run_id,
            "drain",
            serde_json::json!({"repos_completed": checkpoint.repos_completed, "failed": failed.len()}),
        )?;

        Ok(RunOutcome::Finished(RunSummaryData {
            repos_total: checkpoint.repos_total,
            repos_completed: checkpoint.repos_completed,
            questions_pending: checkpoint.questions_pending,
            failed,
        }))
    }

    fn allocate_and_launch(&self, spec: &RepoSpec, run_id: &str) -> Result<WorktreeRecord, RuError> {
        let repo_id = spec.github_id();
        let local_path = registry::resolve_local_path(spec, &self.paths.projects_dir, self.config.layout);
        if !local_path.exists() {
            return Err(RuError::RepoNotLocal { repo_id: repo_id.clone(), path: local_path });
        }

        let slug = repo_id.replace('/', "-");
        let worktree_path = self.paths.worktree_run_dir(run_id).join(&slug);
        let branch_name = format!("ru/review/{run_id}/{slug}");

        git::worktree_add(&repo_id, &local_path, &worktree_path, &branch_name)?;

        let session_id = format!("ru-{run_id}-{slug}");
        let review_command = format!("echo ru-review-session-for-{slug}");
        self.driver.start_session(&session_id, &worktree_path, &review_command)?;

        Ok(WorktreeRecord {
            worktree_path,
            branch_name,
            created_at: Utc::now(),
            run_id: run_id.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_is_opaque_and_within_length_bounds() {
        let id = generate_run_id();
        assert!(id.len() >= 8 && id.len() <= 12, "run id {id} has unexpected length");
    }

    #[test]
    fn cancel_flag_round_trips() {
        let flag = CancelFlag::new();
        assert!(!flag.is_cancelled());
        flag.cancel();
        assert!(flag.is_cancelled());
    }
}
