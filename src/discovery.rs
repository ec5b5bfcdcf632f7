//! C3 — GraphQL discovery: a batched remote query for open issues and
//! pull requests across the fleet, shelled out to the `gh` CLI the same
//! way [`crate::git::command`] shells out to `git`.

use std::collections::BTreeSet;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RuError;
use crate::registry::RepoSpec;

/// Internal delimiter used by the orchestrator's textual work-item
/// encoding. Any occurrence inside a title is replaced with a space so
/// downstream parsers are never confused (testable property 4).
const TITLE_DELIMITER: char = '|';

const GRAPHQL_TIMEOUT: Duration = Duration::from_secs(60);
const MIN_BATCH_SIZE: usize = 1;
const MAX_ATTEMPTS: u32 = 5;
const BASE_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WorkItemKind {
    Issue,
    Pr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub repo_id: String,
    pub kind: WorkItemKind,
    pub number: u64,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub labels: BTreeSet<String>,
    pub is_draft: bool,
}

fn sanitize_title(title: &str) -> String {
    title.replace(TITLE_DELIMITER, " ")
}

/// Escapes `"`, `\`, and control characters so that no input byte
/// reaches the query outside of a quoted string (testable property 3).
fn escape_graphql_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Builds one GraphQL query aliasing each repo in `chunk` as `repo0`,
/// `repo1`, ….
fn build_batch_query(chunk: &[RepoSpec], items_per_repo: usize) -> String {
    let mut body = String::new();
    for (i, spec) in chunk.iter().enumerate() {
        let owner = escape_graphql_string(&spec.owner);
        let name = escape_graphql_string(&spec.name);
        body.push_str(&format!(
            "  repo{i}: repository(owner: {owner}, name: {name}) {{\n\
             \x20\x20\x20\x20nameWithOwner\n\
             \x20\x20\x20\x20isArchived\n\
             \x20\x20\x20\x20isFork\n\
             \x20\x20\x20\x20updatedAt\n\
             \x20\x20\x20\x20issues(states: OPEN, first: {items_per_repo}) {{\n\
             \x20\x20\x20\x20\x20\x20nodes {{ number title createdAt updatedAt labels(first: 20) {{ nodes {{ name }} }} }}\n\
             \x20\x20\x20\x20}}\n\
             \x20\x20\x20\x20pullRequests(states: OPEN, first: {items_per_repo}) {{\n\
             \x20\x20\x20\x20\x20\x20nodes {{ number title createdAt updatedAt isDraft labels(first: 20) {{ nodes {{ name }} }} }}\n\
             \x20\x20\x20\x20}}\n\
             \x20\x20}}\n",
        ));
    }
    format!("query {{\n{body}}}")
}

fn run_gh(args: &[&str], timeout: Duration) -> Result<(bool, String, String), RuError> {
    log::debug!("$ gh {}", args.join(" "));
    let mut child = Command::new("gh")
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| RuError::PrereqBinary { name: format!("gh ({e})") })?;

    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait() {
            Ok(Some(_)) => {
                let output = child.wait_with_output()?;
                return Ok((
                    output.status.success(),
                    String::from_utf8_lossy(&output.stdout).into_owned(),
                    String::from_utf8_lossy(&output.stderr).into_owned(),
                ));
            }
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(RuError::RateLimited {
                        detail: "gh api graphql timed out".into(),
                    });
                }
                std::thread::sleep(Duration::from_millis(25));
            }
            Err(e) => return Err(RuError::Io { detail: e.to_string() }),
        }
    }
}

/// Cheap auth probe executed before any discovery.
pub fn auth_precheck() -> Result<(), RuError> {
    let (success, _stdout, stderr) = run_gh(&["auth", "status"], Duration::from_secs(10))?;
    if !success {
        return Err(RuError::PrereqAuth { detail: stderr.trim().to_string() });
    }
    Ok(())
}

fn is_rate_limited(stdout: &str, stderr: &str) -> bool {
    stdout.contains("RATE_LIMITED") || stderr.contains("RATE_LIMITED") || stderr.contains("rate limit")
}

/// Runs one GraphQL batch query for `chunk`, retrying with exponential
/// backoff on rate limiting up to [`MAX_ATTEMPTS`], and halving the
/// batch (recursively, down to [`MIN_BATCH_SIZE`]) if retries are
/// exhausted and more than one repo remains in the chunk.
fn gh_graphql_repo_batch(chunk: &[RepoSpec], items_per_repo: usize) -> Result<serde_json::Value, RuError> {
    let query = build_batch_query(chunk, items_per_repo);
    let mut backoff = BASE_BACKOFF;

    for attempt in 1..=MAX_ATTEMPTS {
        let (success, stdout, stderr) =
            run_gh(&["api", "graphql", "-f", &format!("query={query}")], GRAPHQL_TIMEOUT)?;

        if success {
            let parsed: serde_json::Value = serde_json::from_str(&stdout)?;
            if let Some(errors) = parsed.get("errors") {
                let text = errors.to_string();
                if text.contains("RATE_LIMITED") {
                    if attempt < MAX_ATTEMPTS {
                        std::thread::sleep(backoff);
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                        continue;
                    }
                } else {
                    return Err(RuError::Io { detail: format!("graphql errors: {text}") });
                }
            } else {
                return Ok(parsed);
            }
        } else if is_rate_limited(&stdout, &stderr) {
            if attempt < MAX_ATTEMPTS {
                std::thread::sleep(backoff);
                backoff = (backoff * 2).min(MAX_BACKOFF);
                continue;
            }
        } else {
            return Err(RuError::Io { detail: format!("gh api graphql failed: {stderr}") });
        }
    }

    // Retries exhausted while rate limited.
    if chunk.len() > MIN_BATCH_SIZE {
        let mid = chunk.len() / 2;
        let (left, right) = chunk.split_at(mid);
        let mut left_result = gh_graphql_repo_batch(left, items_per_repo)?;
        let right_result = gh_graphql_repo_batch(right, items_per_repo)?;
        if let (Some(l), Some(r)) = (left_result.get_mut("data"), right_result.get("data")) {
            if let (Some(l_obj), Some(r_obj)) = (l.as_object_mut(), r.as_object()) {
                for (k, v) in r_obj {
                    l_obj.insert(k.clone(), v.clone());
                }
            }
        }
        Ok(left_result)
    } else {
        Err(RuError::RateLimited { detail: "exhausted retries at minimum batch size".into() })
    }
}

fn parse_chunk_response(
    chunk: &[RepoSpec],
    response: &serde_json::Value,
    kinds: &[WorkItemKind],
    skip_forks: bool,
) -> Vec<WorkItem> {
    let mut items = Vec::new();
    let Some(data) = response.get("data").and_then(|d| d.as_object()) else {
        return items;
    };

    for (i, spec) in chunk.iter().enumerate() {
        let Some(repo) = data.get(&format!("repo{i}")) else { continue };
        if repo.is_null() {
            continue;
        }
        let is_archived = repo.get("isArchived").and_then(|v| v.as_bool()).unwrap_or(false);
        if is_archived {
            continue;
        }
        let is_fork = repo.get("isFork").and_then(|v| v.as_bool()).unwrap_or(false);
        if skip_forks && is_fork {
            continue;
        }

        let repo_id = spec.github_id();

        if kinds.contains(&WorkItemKind::Issue) {
            if let Some(nodes) = repo.pointer("/issues/nodes").and_then(|v| v.as_array()) {
                for node in nodes {
                    items.push(parse_node(&repo_id, WorkItemKind::Issue, node));
                }
            }
        }
        if kinds.contains(&WorkItemKind::Pr) {
            if let Some(nodes) = repo.pointer("/pullRequests/nodes").and_then(|v| v.as_array()) {
                for node in nodes {
                    items.push(parse_node(&repo_id, WorkItemKind::Pr, node));
                }
            }
        }
    }
    items
}

fn parse_node(repo_id: &str, kind: WorkItemKind, node: &serde_json::Value) -> WorkItem {
    let labels = node
        .pointer("/labels/nodes")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|l| l.get("name").and_then(|n| n.as_str()))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    WorkItem {
        repo_id: repo_id.to_string(),
        kind,
        number: node.get("number").and_then(|v| v.as_u64()).unwrap_or(0),
        title: sanitize_title(node.get("title").and_then(|v| v.as_str()).unwrap_or_default()),
        created_at: node
            .get("createdAt")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
        updated_at: node
            .get("updatedAt")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
        labels,
        is_draft: node.get("isDraft").and_then(|v| v.as_bool()).unwrap_or(false),
    }
}

pub struct DiscoveryRequest<'a> {
    pub kinds: &'a [WorkItemKind],
    pub since: Option<DateTime<Utc>>,
    pub batch_size: usize,
    pub items_per_repo: usize,
    pub skip_forks: bool,
}

/// Chunks `repos`, invokes the batch query per chunk, parses each
/// alias's payload into [`WorkItem`]s, filtering by `kinds`, `since`,
/// archived status, and (optionally) fork status.
pub fn discover_work_items(repos: &[RepoSpec], req: &DiscoveryRequest<'_>) -> Result<Vec<WorkItem>, RuError> {
    let mut items = Vec::new();

    for chunk in repos.chunks(req.batch_size.max(1)) {
        let response = gh_graphql_repo_batch(chunk, req.items_per_repo)?;

        let mut parsed = parse_chunk_response(chunk, &response, req.kinds, req.skip_forks);
        if let Some(since) = req.since {
            parsed.retain(|item| item.updated_at >= since);
        }
        items.extend(parsed);
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escaped_strings_are_well_formed_quoted_literals() {
        // Property 3: the produced substring begins/ends with `"` and
        // contains no unescaped `"` or `\` in between.
        for raw in ["simple", "with\"quote", "with\\backslash", "with\nnewline"] {
            let escaped = escape_graphql_string(raw);
            assert!(escaped.starts_with('"'));
            assert!(escaped.ends_with('"'));
            let inner = &escaped[1..escaped.len() - 1];
            let mut chars = inner.chars().peekable();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    assert!(chars.next().is_some(), "dangling escape in {escaped}");
                } else {
                    assert_ne!(c, '"', "unescaped quote in {escaped}");
                }
            }
        }
    }

    #[test]
    fn malicious_spec_is_rejected_before_reaching_the_query_builder() {
        use crate::registry::parse_spec;
        assert!(parse_spec(r#"malicious"injection/repo"#).is_err());
    }

    #[test]
    fn query_builder_embeds_only_escaped_segments() {
        let spec = RepoSpec { host: "github.com".into(), owner: "ac\"me".into(), name: "widgets".into() };
        // Direct construction bypasses parse_spec's validation deliberately,
        // to prove the query builder itself is injection-safe even if a
        // RepoSpec were ever built another way.
        let query = build_batch_query(&[spec], 10);
        assert!(query.contains("\\\"me"));
    }

    #[test]
    fn sanitize_title_strips_the_internal_delimiter() {
        assert_eq!(sanitize_title("fix | the | bug"), "fix   the   bug");
    }

    #[test]
    fn parse_node_defaults_is_draft_false_for_issues() {
        let node = serde_json::json!({ "number": 1, "title": "t", "createdAt": "2026-01-01T00:00:00Z", "updatedAt": "2026-01-01T00:00:00Z" });
        let item = parse_node("acme/widgets", WorkItemKind::Issue, &node);
        assert!(!item.is_draft);
        assert_eq!(item.number, 1);
    }
}
