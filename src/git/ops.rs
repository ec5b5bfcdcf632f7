//! C2 — git operations: fork-sync, fork-clean, worktree management, and
//! cleanliness probes. Every operation takes an explicit working
//! directory and never relies on process cwd.

use std::path::{Path, PathBuf};

use crate::config::FetchStrategy;
use crate::error::RuError;
use crate::git::command::{run_git, run_git_ok, DEFAULT_TIMEOUT};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanState {
    Clean,
    Dirty(Vec<String>),
}

impl CleanState {
    pub fn is_clean(&self) -> bool {
        matches!(self, CleanState::Clean)
    }
}

/// Untracked files, unstaged changes, staged-but-uncommitted changes, and
/// detached HEAD (for operations requiring a named branch) all count as
/// dirty.
pub fn is_clean(repo_id: &str, path: &Path) -> Result<CleanState, RuError> {
    let mut reasons = Vec::new();

    let status = run_git_ok(repo_id, path, &["status", "--porcelain"])?;
    let untracked = status.stdout.lines().any(|l| l.starts_with("??"));
    let staged_or_unstaged = status.stdout.lines().any(|l| !l.starts_with("??") && !l.is_empty());
    if untracked {
        reasons.push("untracked files".to_string());
    }
    if staged_or_unstaged {
        reasons.push("unstaged or staged changes".to_string());
    }

    if reasons.is_empty() {
        Ok(CleanState::Clean)
    } else {
        Ok(CleanState::Dirty(reasons))
    }
}

fn is_detached_head(repo_id: &str, path: &Path) -> Result<bool, RuError> {
    let result = run_git(repo_id, path, &["symbolic-ref", "-q", "HEAD"], DEFAULT_TIMEOUT)?;
    Ok(!result.status_success)
}

/// Resolves the upstream default branch via `refs/remotes/upstream/HEAD`,
/// falling back to `main` then `master`.
fn resolve_upstream_default_branch(repo_id: &str, path: &Path) -> Result<String, RuError> {
    let symbolic = run_git(
        repo_id,
        path,
        &["symbolic-ref", "refs/remotes/upstream/HEAD"],
        DEFAULT_TIMEOUT,
    )?;
    if symbolic.status_success {
        if let Some(name) = symbolic.stdout.trim().strip_prefix("refs/remotes/upstream/") {
            return Ok(name.to_string());
        }
    }
    for candidate in ["main", "master"] {
        let check = run_git(
            repo_id,
            path,
            &["rev-parse", "--verify", &format!("upstream/{candidate}")],
            DEFAULT_TIMEOUT,
        )?;
        if check.status_success {
            return Ok(candidate.to_string());
        }
    }
    Err(RuError::GitConflict {
        repo_id: repo_id.to_string(),
        detail: "could not resolve an upstream default branch".into(),
    })
}

fn current_branch(repo_id: &str, path: &Path) -> Result<String, RuError> {
    let result = run_git_ok(repo_id, path, &["rev-parse", "--abbrev-ref", "HEAD"])?;
    Ok(result.stdout.trim().to_string())
}

fn ahead_behind(repo_id: &str, path: &Path, local: &str, upstream_ref: &str) -> Result<(u32, u32), RuError> {
    let result = run_git_ok(
        repo_id,
        path,
        &["rev-list", "--left-right", "--count", &format!("{local}...{upstream_ref}")],
    )?;
    let mut parts = result.stdout.trim().split_whitespace();
    let ahead: u32 = parts.next().unwrap_or("0").parse().unwrap_or(0);
    let behind: u32 = parts.next().unwrap_or("0").parse().unwrap_or(0);
    Ok((ahead, behind))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    FastForwarded { from: String, to: String },
    Rebased { onto: String },
    Merged { commit: String },
    SkippedAlreadySynced,
    FailedDivergedFfOnly { ahead: u32, behind: u32 },
    FailedConflict { detail: String },
}

pub struct ForkSyncRequest<'a> {
    pub repo_id: &'a str,
    pub path: &'a Path,
    pub strategy: FetchStrategy,
    pub dry_run: bool,
    pub no_fetch: bool,
}

pub fn fork_sync(req: ForkSyncRequest<'_>) -> Result<SyncOutcome, RuError> {
    let ForkSyncRequest { repo_id, path, strategy, dry_run, no_fetch } = req;

    if is_detached_head(repo_id, path)? {
        return Err(RuError::GitDirty {
            repo_id: repo_id.to_string(),
            reasons: vec!["detached HEAD".into()],
        });
    }
    if let CleanState::Dirty(reasons) = is_clean(repo_id, path)? {
        return Err(RuError::GitDirty { repo_id: repo_id.to_string(), reasons });
    }

    if !no_fetch {
        run_git_ok(repo_id, path, &["fetch", "upstream"])?;
    }

    let default_branch = resolve_upstream_default_branch(repo_id, path)?;
    let local = current_branch(repo_id, path)?;
    let upstream_ref = format!("upstream/{default_branch}");
    let (ahead, behind) = ahead_behind(repo_id, path, &local, &upstream_ref)?;

    match strategy {
        FetchStrategy::FfOnly => {
            if ahead > 0 && behind > 0 {
                Ok(SyncOutcome::FailedDivergedFfOnly { ahead, behind })
            } else if behind > 0 {
                if dry_run {
                    return Ok(SyncOutcome::FastForwarded { from: local, to: upstream_ref });
                }
                run_git_ok(repo_id, path, &["merge", "--ff-only", &upstream_ref])?;
                Ok(SyncOutcome::FastForwarded { from: local, to: upstream_ref })
            } else {
                Ok(SyncOutcome::SkippedAlreadySynced)
            }
        }
        FetchStrategy::Rebase => {
            if behind == 0 {
                return Ok(SyncOutcome::SkippedAlreadySynced);
            }
            if dry_run {
                return Ok(SyncOutcome::Rebased { onto: upstream_ref });
            }
            let result = run_git(repo_id, path, &["rebase", &upstream_ref], DEFAULT_TIMEOUT)?;
            if !result.status_success {
                run_git(repo_id, path, &["rebase", "--abort"], DEFAULT_TIMEOUT)?;
                return Ok(SyncOutcome::FailedConflict { detail: result.stderr.trim().to_string() });
            }
            Ok(SyncOutcome::Rebased { onto: upstream_ref })
        }
        FetchStrategy::Merge => {
            if behind == 0 {
                return Ok(SyncOutcome::SkippedAlreadySynced);
            }
            if dry_run {
                return Ok(SyncOutcome::Merged { commit: String::new() });
            }
            run_git_ok(repo_id, path, &["merge", "--no-ff", &upstream_ref])?;
            let commit = run_git_ok(repo_id, path, &["rev-parse", "HEAD"])?.stdout.trim().to_string();
            Ok(SyncOutcome::Merged { commit })
        }
    }
}

/// A pre-acquired confirmation for `fork_clean` without `force`. Can only
/// be constructed directly (tests) or by the out-of-scope interactive
/// layer; the core never prompts on its own.
pub struct ConfirmationToken(());

impl ConfirmationToken {
    pub fn pre_acquired() -> Self {
        ConfirmationToken(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanOutcome {
    SkippedClean,
    SkippedUncommitted,
    DryRun { rescue_branch: Option<String>, reset_target: String },
    Cleaned { rescue_branch: Option<String> },
}

pub struct ForkCleanRequest<'a> {
    pub repo_id: &'a str,
    pub path: &'a Path,
    pub rescue: bool,
    pub dry_run: bool,
    pub force: bool,
    pub confirmation: Option<ConfirmationToken>,
    /// Monotonic timestamp string (e.g. `20260730T211500Z`) for naming the
    /// rescue branch; callers supply it rather than the core reading the
    /// clock, to keep the function deterministic under test.
    pub timestamp: &'a str,
}

pub fn fork_clean(req: ForkCleanRequest<'_>) -> Result<CleanOutcome, RuError> {
    let ForkCleanRequest { repo_id, path, rescue, dry_run, force, confirmation, timestamp } = req;

    if let CleanState::Dirty(_) = is_clean(repo_id, path)? {
        return Ok(CleanOutcome::SkippedUncommitted);
    }

    let default_branch = resolve_upstream_default_branch(repo_id, path)?;
    let upstream_ref = format!("upstream/{default_branch}");
    let local = current_branch(repo_id, path)?;

    let local_sha = run_git_ok(repo_id, path, &["rev-parse", &local])?.stdout.trim().to_string();
    let upstream_sha = run_git_ok(repo_id, path, &["rev-parse", &upstream_ref])?.stdout.trim().to_string();

    if local_sha == upstream_sha {
        return Ok(CleanOutcome::SkippedClean);
    }

    let short_sha = &local_sha[..local_sha.len().min(8)];
    let rescue_branch_name = format!("rescue/{timestamp}-{short_sha}");

    if dry_run {
        return Ok(CleanOutcome::DryRun {
            rescue_branch: rescue.then(|| rescue_branch_name.clone()),
            reset_target: upstream_ref,
        });
    }

    if !force && confirmation.is_none() {
        return Err(RuError::GitConflict {
            repo_id: repo_id.to_string(),
            detail: "fork-clean requires --force or a pre-acquired confirmation".into(),
        });
    }

    let rescue_branch = if rescue {
        run_git_ok(repo_id, path, &["branch", &rescue_branch_name, &local_sha])?;
        Some(rescue_branch_name)
    } else {
        None
    };

    run_git_ok(repo_id, path, &["reset", "--hard", &upstream_ref])?;
    Ok(CleanOutcome::Cleaned { rescue_branch })
}

pub fn worktree_add(repo_id: &str, repo_path: &Path, worktree_path: &Path, branch: &str) -> Result<(), RuError> {
    if worktree_path.exists() {
        return Err(RuError::PathExists { path: worktree_path.to_path_buf() });
    }
    let parent = worktree_path.parent().ok_or_else(|| RuError::PathExists {
        path: worktree_path.to_path_buf(),
    })?;
    std::fs::create_dir_all(parent)?;

    let branch_exists = run_git(
        repo_id,
        repo_path,
        &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")],
        DEFAULT_TIMEOUT,
    )?
    .status_success;

    let path_str = worktree_path.to_string_lossy().into_owned();
    let args: Vec<&str> = if branch_exists {
        vec!["worktree", "add", &path_str, branch]
    } else {
        vec!["worktree", "add", "-b", branch, &path_str]
    };

    let result = run_git(repo_id, repo_path, &args, DEFAULT_TIMEOUT)?;
    if !result.status_success {
        let detail = result.stderr.to_lowercase();
        if detail.contains("already exists") {
            return Err(RuError::PathExists { path: worktree_path.to_path_buf() });
        }
        if detail.contains("is not a commit") || detail.contains("invalid reference") {
            return Err(RuError::BranchUnknown { branch: branch.to_string() });
        }
        if detail.contains("locked") || detail.contains("index.lock") {
            return Err(RuError::RepoLocked { repo_id: repo_id.to_string() });
        }
        return Err(RuError::GitConflict { repo_id: repo_id.to_string(), detail: result.stderr });
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct PorcelainWorktree {
    pub path: PathBuf,
    pub head: String,
    pub branch: Option<String>,
    pub detached: bool,
    pub bare: bool,
    pub locked: Option<String>,
    pub prunable: Option<String>,
}

pub fn worktree_list(repo_id: &str, repo_path: &Path) -> Result<Vec<PorcelainWorktree>, RuError> {
    let result = run_git_ok(repo_id, repo_path, &["worktree", "list", "--porcelain"])?;
    let mut worktrees = Vec::new();
    let mut current: Option<PorcelainWorktree> = None;

    for line in result.stdout.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(wt) = current.take() {
                worktrees.push(wt);
            }
            current = Some(PorcelainWorktree { path: PathBuf::from(path), ..Default::default() });
        } else if let Some(wt) = current.as_mut() {
            if let Some(head) = line.strip_prefix("HEAD ") {
                wt.head = head.to_string();
            } else if let Some(branch) = line.strip_prefix("branch ") {
                wt.branch = Some(branch.trim_start_matches("refs/heads/").to_string());
            } else if line == "detached" {
                wt.detached = true;
            } else if line == "bare" {
                wt.bare = true;
            } else if let Some(reason) = line.strip_prefix("locked") {
                wt.locked = Some(reason.trim_start().to_string());
            } else if let Some(reason) = line.strip_prefix("prunable") {
                wt.prunable = Some(reason.trim_start().to_string());
            }
        }
    }
    if let Some(wt) = current.take() {
        worktrees.push(wt);
    }
    Ok(worktrees)
}

pub fn worktree_remove(repo_id: &str, repo_path: &Path, worktree_path: &Path, force: bool) -> Result<(), RuError> {
    let path_str = worktree_path.to_string_lossy().into_owned();
    let mut args = vec!["worktree", "remove"];
    if force {
        args.push("--force");
    }
    args.push(&path_str);

    let result = run_git(repo_id, repo_path, &args, DEFAULT_TIMEOUT)?;
    if !result.status_success && !result.stderr.to_lowercase().contains("not a working tree") {
        return Err(RuError::GitConflict { repo_id: repo_id.to_string(), detail: result.stderr });
    }
    run_git(repo_id, repo_path, &["worktree", "prune"], DEFAULT_TIMEOUT)?;
    Ok(())
}
