//! Crate-wide error taxonomy.
//!
//! Every fallible operation across the fleet registry, git operations,
//! discovery, session driver, and orchestrator returns [`RuError`]. The
//! variants mirror the error kinds named in the specification so that
//! the exit-code mapping in [`RuError::exit_code`] and the per-repo
//! `summary.failed` entries stay stable across the whole crate.

use std::fmt;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    ConfigParse,
    PrereqAuth,
    PrereqBinary,
    PrereqConfig,
    RepoNotLocal,
    GitDirty,
    GitDiverged,
    GitConflict,
    GitTimeout,
    RateLimited,
    DriverUnavailable,
    DriverFailed,
    SessionNotFound,
    SessionAlreadyExists,
    LockHeld,
    Interrupted,
}

#[derive(Debug)]
pub enum RuError {
    /// A single malformed line in a `repos.d/*.txt` file. Recovered by
    /// the caller: skip the line, keep enumerating.
    ConfigParse { detail: String },

    /// `gh auth status` (or equivalent) failed.
    PrereqAuth { detail: String },
    /// A required external binary is missing from `PATH`.
    PrereqBinary { name: String },
    /// The config directory has not been initialized.
    PrereqConfig { detail: String },

    /// A configured repo has no clone under `projects_dir`.
    RepoNotLocal { repo_id: String, path: PathBuf },

    /// Working tree has untracked/unstaged/staged-uncommitted changes.
    GitDirty { repo_id: String, reasons: Vec<String> },
    /// Local and upstream default branches have each moved independently.
    GitDiverged { repo_id: String, ahead: u32, behind: u32 },
    /// A rebase or merge produced a conflict.
    GitConflict { repo_id: String, detail: String },
    /// A git subprocess exceeded its allotted timeout.
    GitTimeout { repo_id: String, seconds: u64 },

    /// Remote discovery was rate-limited and retries were exhausted.
    RateLimited { detail: String },

    /// No session driver could be detected or loaded.
    DriverUnavailable { detail: String },
    /// A session driver operation failed for a reason other than
    /// `NotFound`/`AlreadyExists`.
    DriverFailed { detail: String },
    /// `get_session_state`/`send_to_session`/`interrupt_session` on an id
    /// with no backing session.
    SessionNotFound { id: String },
    /// `start_session` called with an id already in use.
    SessionAlreadyExists { id: String },

    /// A review run is already in progress.
    LockHeld { run_id: String, pid: u32 },

    /// The user cancelled a run.
    Interrupted,

    /// A worktree path already exists where a new worktree was to be
    /// created.
    PathExists { path: PathBuf },
    /// `worktree_add` was asked to use a branch that does not exist and
    /// could not be created.
    BranchUnknown { branch: String },
    /// The local clone's repository is locked by another git process.
    RepoLocked { repo_id: String },

    /// Catch-all for I/O and (de)serialization failures that do not map
    /// to a named kind above.
    Io { detail: String },
}

impl RuError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RuError::ConfigParse { .. } => ErrorKind::ConfigParse,
            RuError::PrereqAuth { .. } => ErrorKind::PrereqAuth,
            RuError::PrereqBinary { .. } => ErrorKind::PrereqBinary,
            RuError::PrereqConfig { .. } => ErrorKind::PrereqConfig,
            RuError::RepoNotLocal { .. } => ErrorKind::RepoNotLocal,
            RuError::GitDirty { .. } => ErrorKind::GitDirty,
            RuError::GitDiverged { .. } => ErrorKind::GitDiverged,
            RuError::GitConflict { .. } => ErrorKind::GitConflict,
            RuError::GitTimeout { .. } => ErrorKind::GitTimeout,
            RuError::RateLimited { .. } => ErrorKind::RateLimited,
            RuError::DriverUnavailable { .. } => ErrorKind::DriverUnavailable,
            RuError::DriverFailed { .. } => ErrorKind::DriverFailed,
            RuError::SessionNotFound { .. } => ErrorKind::SessionNotFound,
            RuError::SessionAlreadyExists { .. } => ErrorKind::SessionAlreadyExists,
            RuError::LockHeld { .. } => ErrorKind::LockHeld,
            RuError::Interrupted => ErrorKind::Interrupted,
            // These three are per-repo git outcomes without a listed top-level
            // ErrorKind; they are reported verbatim in summary.failed.
            RuError::PathExists { .. } => ErrorKind::GitConflict,
            RuError::BranchUnknown { .. } => ErrorKind::GitConflict,
            RuError::RepoLocked { .. } => ErrorKind::GitConflict,
            RuError::Io { .. } => ErrorKind::PrereqConfig,
        }
    }

    /// Process exit code per the specification's exit-code table.
    pub fn exit_code(&self) -> i32 {
        match self {
            RuError::PrereqAuth { .. }
            | RuError::PrereqBinary { .. }
            | RuError::PrereqConfig { .. } => 3,
            RuError::LockHeld { .. } => 5,
            RuError::Interrupted => 130,
            _ => 1,
        }
    }
}

impl fmt::Display for RuError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuError::ConfigParse { detail } => write!(f, "malformed config line: {detail}"),
            RuError::PrereqAuth { detail } => write!(f, "authentication check failed: {detail}"),
            RuError::PrereqBinary { name } => write!(f, "required binary not found on PATH: {name}"),
            RuError::PrereqConfig { detail } => write!(f, "configuration not initialized: {detail}"),
            RuError::RepoNotLocal { repo_id, path } => {
                write!(f, "{repo_id}: no local clone at {}", path.display())
            }
            RuError::GitDirty { repo_id, reasons } => {
                write!(f, "{repo_id}: working tree is dirty ({})", reasons.join(", "))
            }
            RuError::GitDiverged { repo_id, ahead, behind } => write!(
                f,
                "{repo_id}: diverged from upstream (ahead {ahead}, behind {behind})"
            ),
            RuError::GitConflict { repo_id, detail } => write!(f, "{repo_id}: conflict: {detail}"),
            RuError::GitTimeout { repo_id, seconds } => {
                write!(f, "{repo_id}: git operation timed out after {seconds}s")
            }
            RuError::RateLimited { detail } => write!(f, "rate limited: {detail}"),
            RuError::DriverUnavailable { detail } => write!(f, "no session driver available: {detail}"),
            RuError::DriverFailed { detail } => write!(f, "session driver failed: {detail}"),
            RuError::SessionNotFound { id } => write!(f, "no such session: {id}"),
            RuError::SessionAlreadyExists { id } => write!(f, "session already exists: {id}"),
            RuError::LockHeld { run_id, pid } => {
                write!(f, "review run {run_id} already in progress (pid {pid})")
            }
            RuError::Interrupted => write!(f, "interrupted"),
            RuError::PathExists { path } => write!(f, "path already exists: {}", path.display()),
            RuError::BranchUnknown { branch } => write!(f, "unknown branch: {branch}"),
            RuError::RepoLocked { repo_id } => write!(f, "{repo_id}: repository is locked"),
            RuError::Io { detail } => write!(f, "{detail}"),
        }
    }
}

impl std::error::Error for RuError {}

impl From<std::io::Error> for RuError {
    fn from(e: std::io::Error) -> Self {
        RuError::Io { detail: e.to_string() }
    }
}

impl From<serde_json::Error> for RuError {
    fn from(e: serde_json::Error) -> Self {
        RuError::Io { detail: format!("json: {e}") }
    }
}
