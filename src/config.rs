//! Optional user preferences layered from `<config_dir>/ru/config.toml`
//! and `RU_*` environment variables, on top of hardcoded defaults.
//!
//! Mirrors the layering pattern of a `config`-crate-backed settings file:
//! defaults, then a TOML file if present, then environment overrides.

use config::{Config, ConfigError, File};
use serde::{Deserialize, Serialize};

use crate::paths::Paths;
use crate::registry::RepoLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum FetchStrategy {
    FfOnly,
    Rebase,
    Merge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum CheckpointRestartPolicy {
    /// Any config drift (added or removed repos) starts a fresh run.
    AnyChange,
    /// Only repos removed from the registry invalidate the checkpoint.
    RemovedOnly,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RuConfig {
    /// Whether local clones live flat under `projects_dir/<name>` or
    /// nested under `projects_dir/<owner>/<name>`.
    pub layout: RepoLayout,
    pub default_strategy: FetchStrategy,
    pub checkpoint_restart_policy: CheckpointRestartPolicy,
    pub monitor_poll_interval_ms: u64,
    pub monitor_wall_clock_secs: u64,
    pub workers: usize,
    pub batch_size: usize,
    pub skip_forks: bool,
}

impl Default for RuConfig {
    fn default() -> Self {
        RuConfig {
            layout: RepoLayout::Flat,
            default_strategy: FetchStrategy::FfOnly,
            checkpoint_restart_policy: CheckpointRestartPolicy::AnyChange,
            monitor_poll_interval_ms: 500,
            monitor_wall_clock_secs: 7200,
            workers: 4,
            batch_size: 10,
            skip_forks: false,
        }
    }
}

impl RuConfig {
    pub fn load(paths: &Paths) -> Result<RuConfig, ConfigError> {
        let defaults = RuConfig::default();

        let mut builder = Config::builder()
            .set_default("layout", defaults.layout.to_string())?
            .set_default("default-strategy", defaults.default_strategy.to_string())?
            .set_default(
                "checkpoint-restart-policy",
                defaults.checkpoint_restart_policy.to_string(),
            )?
            .set_default("monitor-poll-interval-ms", defaults.monitor_poll_interval_ms as i64)?
            .set_default("monitor-wall-clock-secs", defaults.monitor_wall_clock_secs as i64)?
            .set_default("workers", defaults.workers as i64)?
            .set_default("batch-size", defaults.batch_size as i64)?
            .set_default("skip-forks", defaults.skip_forks)?;

        let config_path = paths.config_toml();
        if config_path.exists() {
            builder = builder.add_source(File::from(config_path));
        }

        builder = builder.add_source(config::Environment::with_prefix("RU").separator("_"));

        let config: RuConfig = builder.build()?.try_deserialize()?;
        validate(&config)?;
        Ok(config)
    }
}

fn validate(config: &RuConfig) -> Result<(), ConfigError> {
    if config.workers == 0 {
        return Err(ConfigError::Message("workers must be at least 1".into()));
    }
    if config.batch_size == 0 || config.batch_size > 50 {
        return Err(ConfigError::Message(
            "batch-size must be between 1 and 50".into(),
        ));
    }
    if config.monitor_poll_interval_ms < 50 {
        return Err(ConfigError::Message(
            "monitor-poll-interval-ms must be at least 50".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_load_without_a_config_file() {
        let dir = tempdir().unwrap();
        let paths = Paths::rooted_at(dir.path());
        let config = RuConfig::load(&paths).unwrap();
        assert_eq!(config.workers, 4);
        assert_eq!(config.default_strategy, FetchStrategy::FfOnly);
        assert_eq!(config.checkpoint_restart_policy, CheckpointRestartPolicy::AnyChange);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempdir().unwrap();
        let paths = Paths::rooted_at(dir.path());
        std::fs::create_dir_all(&paths.config_dir).unwrap();
        std::fs::write(paths.config_toml(), "workers = 8\nlayout = \"nested\"\n").unwrap();
        let config = RuConfig::load(&paths).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.layout, RepoLayout::Nested);
    }

    #[test]
    fn invalid_batch_size_is_rejected() {
        let dir = tempdir().unwrap();
        let paths = Paths::rooted_at(dir.path());
        std::fs::create_dir_all(&paths.config_dir).unwrap();
        std::fs::write(paths.config_toml(), "batch-size = 0\n").unwrap();
        assert!(RuConfig::load(&paths).is_err());
    }
}
