//! Process-wide path resolution.
//!
//! Resolved once at process start into an immutable [`Paths`] value and
//! threaded explicitly into every component. Nothing else in the crate
//! reads `XDG_*`/`HOME`/`RU_PROJECTS_DIR` directly.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use etcetera::base_strategy::{BaseStrategy, choose_base_strategy};

const APP: &str = "ru";

#[derive(Debug, Clone)]
pub struct Paths {
    pub config_dir: PathBuf,
    pub state_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub projects_dir: PathBuf,
}

impl Paths {
    /// Resolve from the environment, following `XDG_CONFIG_HOME`,
    /// `XDG_STATE_HOME`, `XDG_CACHE_HOME`, `HOME`, and `RU_PROJECTS_DIR`.
    pub fn resolve() -> Self {
        let strategy = choose_base_strategy().expect("could not determine home directory");
        let config_dir = strategy.config_dir().join(APP);
        // etcetera's Xdg strategy does not expose a dedicated state dir on
        // every platform; XDG_STATE_HOME is read directly per spec, falling
        // back to a `state` sibling of the data dir on platforms without it.
        let state_dir = std::env::var_os("XDG_STATE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| strategy.data_dir().parent().map_or_else(
                || strategy.data_dir().join(".local/state"),
                |p| p.join("state"),
            ))
            .join(APP);
        let cache_dir = strategy.cache_dir().join(APP);
        let projects_dir = std::env::var("RU_PROJECTS_DIR")
            .ok()
            .map(|raw| PathBuf::from(shellexpand::full(&raw).map(Cow::into_owned).unwrap_or(raw)))
            .unwrap_or_else(|| strategy.home_dir().join("projects"));

        Paths { config_dir, state_dir, cache_dir, projects_dir }
    }

    pub fn repos_d(&self) -> PathBuf {
        self.config_dir.join("repos.d")
    }

    pub fn config_toml(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    pub fn review_lock(&self) -> PathBuf {
        self.state_dir.join("review.lock")
    }

    pub fn review_lock_info(&self) -> PathBuf {
        self.state_dir.join("review.lock.info")
    }

    pub fn review_checkpoint(&self) -> PathBuf {
        self.state_dir.join("review").join("review-checkpoint.json")
    }

    pub fn review_checkpoint_backup(&self, timestamp: &str) -> PathBuf {
        self.state_dir
            .join("review")
            .join(format!("review-checkpoint.{timestamp}.bak"))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    pub fn agent_sweep_dir(&self) -> PathBuf {
        self.state_dir.join("agent-sweep")
    }

    pub fn backoff_state(&self) -> PathBuf {
        self.agent_sweep_dir().join("backoff.state")
    }

    pub fn sweep_locks_dir(&self) -> PathBuf {
        self.agent_sweep_dir().join("locks")
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.state_dir.join("worktrees")
    }

    pub fn worktree_mapping(&self) -> PathBuf {
        self.worktrees_dir().join("mapping.json")
    }

    pub fn worktree_run_dir(&self, run_id: &str) -> PathBuf {
        self.worktrees_dir().join(run_id)
    }

    /// Build a `Paths` rooted at an arbitrary directory; used by tests so
    /// production and test code share one resolution path.
    pub fn rooted_at(root: &Path) -> Self {
        Paths {
            config_dir: root.join("config"),
            state_dir: root.join("state"),
            cache_dir: root.join("cache"),
            projects_dir: root.join("projects"),
        }
    }
}
