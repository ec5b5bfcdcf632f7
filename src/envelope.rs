//! C6 — the JSON envelope emitted on stdout for every machine-readable
//! command. Human-readable progress always goes to stderr via [`log`]
//! so stdout stays parseable.

use chrono::{DateTime, Utc};
use serde::Serialize;

pub const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize, S: Serialize = serde_json::Value> {
    pub generated_at: DateTime<Utc>,
    pub version: String,
    pub output_format: &'static str,
    pub command: String,
    pub mode: String,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<S>,
}

impl<T: Serialize, S: Serialize> Envelope<T, S> {
    pub fn new(command: impl Into<String>, mode: impl Into<String>, data: T) -> Self {
        Envelope {
            generated_at: Utc::now(),
            version: CRATE_VERSION.to_string(),
            output_format: "json",
            command: command.into(),
            mode: mode.into(),
            data,
            summary: None,
        }
    }

    pub fn with_summary(mut self, summary: S) -> Self {
        self.summary = Some(summary);
        self
    }

    pub fn emit(&self) -> Result<(), crate::error::RuError> {
        println!("{}", serde_json::to_string(self)?);
        Ok(())
    }
}

#[derive(Debug, Default, Serialize)]
pub struct ByType {
    pub issues: usize,
    pub prs: usize,
}

#[derive(Debug, Default, Serialize)]
pub struct DiscoverySummary {
    pub items_found: usize,
    pub by_type: ByType,
    pub by_repo: std::collections::BTreeMap<String, usize>,
}

#[derive(Debug, Serialize)]
pub struct FailedEntry {
    pub repo_id: String,
    pub kind: String,
    pub detail: String,
}

#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub repos_total: usize,
    pub repos_completed: usize,
    pub failed: Vec<FailedEntry>,
}
