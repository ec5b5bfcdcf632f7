//! C1 — repo registry: canonical repo identity, fleet enumeration, and
//! local clone path resolution.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RuError;

const DEFAULT_HOST: &str = "github.com";

fn is_valid_segment(s: &str) -> bool {
    if s.is_empty() || s == ".." || s.starts_with('-') {
        return false;
    }
    s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        && !s.contains("..")
}

/// Canonical identity of one configured repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoSpec {
    pub host: String,
    pub owner: String,
    pub name: String,
}

impl PartialEq for RepoSpec {
    fn eq(&self, other: &Self) -> bool {
        self.host == other.host && self.owner == other.owner && self.name == other.name
    }
}
impl Eq for RepoSpec {}

impl Hash for RepoSpec {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.host.hash(state);
        self.owner.hash(state);
        self.name.hash(state);
    }
}

impl RepoSpec {
    pub fn github_id(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Canonical `host/owner/name` form used for hashing and equality
    /// checks across processes (property 1: round-trips through
    /// `parse_spec`).
    pub fn canonical(&self) -> String {
        format!("{}/{}/{}", self.host, self.owner, self.name)
    }
}

impl fmt::Display for RepoSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl FromStr for RepoSpec {
    type Err = RuError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_spec(s)
    }
}

/// Accepts `owner/name`, `host:owner/name`, `https://host/owner/name[.git]`,
/// or `git@host:owner/name[.git]`. Whitespace is trimmed; a trailing
/// `.git` suffix is stripped before validation.
pub fn parse_spec(line: &str) -> Result<RepoSpec, RuError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(RuError::ConfigParse { detail: "empty spec".into() });
    }

    let (host, rest) = if let Some(stripped) = line.strip_prefix("https://") {
        let mut parts = stripped.splitn(2, '/');
        let host = parts.next().unwrap_or_default();
        let rest = parts.next().ok_or_else(|| RuError::ConfigParse {
            detail: format!("malformed URL spec: {line}"),
        })?;
        (host.to_string(), rest.to_string())
    } else if let Some(stripped) = line.strip_prefix("git@") {
        let mut parts = stripped.splitn(2, ':');
        let host = parts.next().unwrap_or_default();
        let rest = parts.next().ok_or_else(|| RuError::ConfigParse {
            detail: format!("malformed SSH spec: {line}"),
        })?;
        (host.to_string(), rest.to_string())
    } else if let Some((maybe_host, maybe_rest)) = line.split_once(':') {
        // `host:owner/name` — but not a scheme-less URL like owner/name
        // (no colon) and not mistaken for `owner/name` containing none.
        (maybe_host.to_string(), maybe_rest.to_string())
    } else {
        (DEFAULT_HOST.to_string(), line.to_string())
    };

    let rest = rest.strip_suffix(".git").unwrap_or(&rest);
    let mut segments = rest.splitn(2, '/');
    let owner = segments.next().unwrap_or_default();
    let name = segments.next().ok_or_else(|| RuError::ConfigParse {
        detail: format!("missing owner/name in spec: {line}"),
    })?;

    if host.is_empty() || !is_valid_segment(owner) || !is_valid_segment(name) {
        return Err(RuError::ConfigParse { detail: format!("invalid spec: {line}") });
    }

    Ok(RepoSpec { host, owner: owner.to_string(), name: name.to_string() })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum RepoLayout {
    /// `<projects_dir>/<name>`
    Flat,
    /// `<projects_dir>/<owner>/<name>`
    Nested,
}

/// Pure function; never touches the filesystem.
pub fn resolve_local_path(spec: &RepoSpec, projects_dir: &Path, layout: RepoLayout) -> PathBuf {
    match layout {
        RepoLayout::Flat => projects_dir.join(&spec.name),
        RepoLayout::Nested => projects_dir.join(&spec.owner).join(&spec.name),
    }
}

/// Ordered, deduplicated sequence of [`RepoSpec`].
#[derive(Debug, Clone, Default)]
pub struct RepoList {
    repos: Vec<RepoSpec>,
}

impl RepoList {
    pub fn iter(&self) -> impl Iterator<Item = &RepoSpec> {
        self.repos.iter()
    }

    pub fn len(&self) -> usize {
        self.repos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }

    pub fn contains(&self, github_id: &str) -> bool {
        self.repos.iter().any(|r| r.github_id() == github_id)
    }
}

impl FromIterator<RepoSpec> for RepoList {
    fn from_iter<I: IntoIterator<Item = RepoSpec>>(iter: I) -> Self {
        RepoList { repos: iter.into_iter().collect() }
    }
}

/// One malformed line, reported individually; enumeration continues.
#[derive(Debug, Clone)]
pub struct RegistryWarning {
    pub file: PathBuf,
    pub line_number: usize,
    pub detail: String,
}

pub struct LoadedRegistry {
    pub repos: RepoList,
    pub warnings: Vec<RegistryWarning>,
}

/// Reads every `*.txt` in `<config_dir>/repos.d/` in lexicographic order.
/// Blank lines and `#` comments are ignored. Duplicate `github_id`s
/// collapse to the first occurrence across files.
pub fn load_registry(repos_d: &Path) -> std::io::Result<LoadedRegistry> {
    let mut entries: Vec<PathBuf> = Vec::new();
    if repos_d.is_dir() {
        for entry in std::fs::read_dir(repos_d)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("txt") {
                entries.push(path);
            }
        }
    }
    entries.sort();

    let mut seen = std::collections::HashSet::new();
    let mut repos = Vec::new();
    let mut warnings = Vec::new();

    for file in entries {
        let content = std::fs::read_to_string(&file)?;
        for (idx, raw_line) in content.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match parse_spec(line) {
                Ok(spec) => {
                    let id = spec.github_id();
                    if seen.insert(id) {
                        log::debug!("registry: loaded {} from {}", spec, file.display());
                        repos.push(spec);
                    } else {
                        log::debug!("registry: duplicate {} in {}, keeping first", spec, file.display());
                    }
                }
                Err(e) => {
                    log::debug!("registry: skipping {}:{}: {}", file.display(), idx + 1, e);
                    warnings.push(RegistryWarning {
                        file: file.clone(),
                        line_number: idx + 1,
                        detail: e.to_string(),
                    });
                }
            }
        }
    }

    Ok(LoadedRegistry { repos: RepoList { repos }, warnings })
}

/// Stable digest over the canonical `host/owner/name\n…` form of the
/// registry; used to detect config drift between runs.
pub fn config_hash(registry: &RepoList) -> String {
    let mut hasher = DefaultHasher::new();
    for repo in registry.iter() {
        repo.canonical().hash(&mut hasher);
        0u8.hash(&mut hasher); // line separator, distinct from any valid char
    }
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn parses_owner_slash_name() {
        let spec = parse_spec("octocat/hello-world").unwrap();
        assert_eq!(spec.host, "github.com");
        assert_eq!(spec.owner, "octocat");
        assert_eq!(spec.name, "hello-world");
    }

    #[test]
    fn parses_host_prefixed_form() {
        let spec = parse_spec("git.example.com:acme/widgets").unwrap();
        assert_eq!(spec.host, "git.example.com");
        assert_eq!(spec.github_id(), "acme/widgets");
    }

    #[test]
    fn parses_https_url_with_dot_git_suffix() {
        let spec = parse_spec("https://github.com/acme/widgets.git").unwrap();
        assert_eq!(spec.host, "github.com");
        assert_eq!(spec.name, "widgets");
    }

    #[test]
    fn parses_ssh_url() {
        let spec = parse_spec("git@github.com:acme/widgets.git").unwrap();
        assert_eq!(spec.host, "github.com");
        assert_eq!(spec.owner, "acme");
        assert_eq!(spec.name, "widgets");
    }

    #[test]
    fn trailing_whitespace_and_git_suffix_are_equal() {
        let a = parse_spec("  acme/widgets  ").unwrap();
        let b = parse_spec("https://github.com/acme/widgets.git").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_path_traversal_and_injection_attempts() {
        assert!(parse_spec("acme/../etc").is_err());
        assert!(parse_spec("-acme/widgets").is_err());
        assert!(parse_spec(r#"malicious"injection/repo"#).is_err());
        assert!(parse_spec("acme/wid\\gets").is_err());
    }

    #[test]
    fn canonicalization_round_trips() {
        // Property 1: parse_spec(serialize(parse_spec(s))) == parse_spec(s)
        for s in ["acme/widgets", "git@github.com:acme/widgets.git", "host:acme/widgets"] {
            let once = parse_spec(s).unwrap();
            let twice = parse_spec(&once.canonical()).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn resolve_local_path_is_pure() {
        let spec = parse_spec("acme/widgets").unwrap();
        let root = Path::new("/home/user/projects");
        assert_eq!(resolve_local_path(&spec, root, RepoLayout::Flat), root.join("widgets"));
        assert_eq!(
            resolve_local_path(&spec, root, RepoLayout::Nested),
            root.join("acme").join("widgets")
        );
    }

    #[test]
    fn load_registry_dedupes_first_occurrence_wins() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "acme/widgets\n# comment\n\n").unwrap();
        std::fs::write(dir.path().join("b.txt"), "acme/widgets\nacme/gadgets\n").unwrap();
        let loaded = load_registry(dir.path()).unwrap();
        assert_eq!(loaded.repos.len(), 2);
        assert!(loaded.repos.contains("acme/widgets"));
        assert!(loaded.repos.contains("acme/gadgets"));
        assert!(loaded.warnings.is_empty());
    }

    #[test]
    fn load_registry_is_idempotent_and_reports_malformed_lines() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "acme/widgets\n-bad/name\n").unwrap();
        let first = load_registry(dir.path()).unwrap();
        let second = load_registry(dir.path()).unwrap();
        let ids = |l: &LoadedRegistry| l.repos.iter().map(|r| r.github_id()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first.warnings.len(), 1);
    }

    #[test]
    fn config_hash_is_stable_across_calls() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "acme/widgets\nacme/gadgets\n").unwrap();
        let loaded = load_registry(dir.path()).unwrap();
        assert_eq!(config_hash(&loaded.repos), config_hash(&loaded.repos));
    }

    #[test]
    fn config_hash_changes_when_registry_changes() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "acme/widgets\n").unwrap();
        let before = load_registry(dir.path()).unwrap();
        std::fs::write(dir.path().join("a.txt"), "acme/widgets\nacme/gadgets\n").unwrap();
        let after = load_registry(dir.path()).unwrap();
        assert_ne!(config_hash(&before.repos), config_hash(&after.repos));
    }
}
