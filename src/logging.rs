//! C8 — structured logging, initialized once at process start.
//!
//! Human-oriented progress goes to stderr via [`env_logger`] so stdout
//! stays reserved for the JSON envelope (§4.6). A second, independent
//! sink appends newline-delimited JSON [`LogRecord`]s to a per-run log
//! file so a completed run's decisions are inspectable without
//! re-running it.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Initializes the stderr logger. Safe to call more than once; only the
/// first call takes effect.
pub fn init_stderr_logger() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .try_init();
}

#[derive(Debug, Serialize)]
pub struct LogRecord<'a> {
    pub timestamp: DateTime<Utc>,
    pub run_id: &'a str,
    pub event: &'a str,
    pub detail: serde_json::Value,
}

pub struct RunLog {
    path: std::path::PathBuf,
}

impl RunLog {
    pub fn open(logs_dir: &Path, run_id: &str) -> std::io::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        Ok(RunLog { path: logs_dir.join(format!("{run_id}.jsonl")) })
    }

    pub fn append(&self, run_id: &str, event: &str, detail: serde_json::Value) -> std::io::Result<()> {
        let record = LogRecord { timestamp: Utc::now(), run_id, event, detail };
        let line = serde_json::to_string(&record).unwrap_or_default();
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{line}")
    }
}
