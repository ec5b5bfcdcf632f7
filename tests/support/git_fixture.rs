//! Shared git-repo scaffolding for integration tests: a real "upstream"
//! repository and a fork clone tracking it via a remote named `upstream`,
//! built with actual git commands so tests exercise the real porcelain
//! output our code parses rather than a stand-in.

use std::path::{Path, PathBuf};
use std::process::Command;

pub fn git(args: &[&str], cwd: &Path) {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .unwrap_or_else(|e| panic!("failed to spawn git {args:?} in {cwd:?}: {e}"));
    assert!(
        output.status.success(),
        "git {args:?} in {cwd:?} failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

fn configure_identity(repo: &Path) {
    git(&["config", "user.email", "test@example.com"], repo);
    git(&["config", "user.name", "Test"], repo);
}

/// Creates `<root>/upstream` with one commit on `main`, and `<root>/fork`
/// cloned from it with the remote renamed to `upstream` and its HEAD
/// symref set, matching the remote layout `fork_sync`/`fork_clean` expect.
pub fn init_fork_pair(root: &Path) -> (PathBuf, PathBuf) {
    let upstream = root.join("upstream");
    std::fs::create_dir_all(&upstream).unwrap();
    git(&["init", "--initial-branch=main", "."], &upstream);
    configure_identity(&upstream);
    std::fs::write(upstream.join("file.txt"), "hello\n").unwrap();
    git(&["add", "."], &upstream);
    git(&["commit", "-m", "initial"], &upstream);

    let fork = root.join("fork");
    git(&["clone", upstream.to_str().unwrap(), fork.to_str().unwrap()], root);
    configure_identity(&fork);
    git(&["remote", "rename", "origin", "upstream"], &fork);
    git(&["remote", "set-head", "upstream", "-a"], &fork);

    (upstream, fork)
}

pub fn commit_file(repo: &Path, name: &str, contents: &str, message: &str) {
    std::fs::write(repo.join(name), contents).unwrap();
    git(&["add", "."], repo);
    git(&["commit", "-m", message], repo);
}

pub fn rev_parse(repo: &Path, reference: &str) -> String {
    let output = Command::new("git")
        .args(["rev-parse", reference])
        .current_dir(repo)
        .output()
        .unwrap_or_else(|e| panic!("failed to spawn git rev-parse {reference}: {e}"));
    assert!(output.status.success(), "rev-parse {reference} failed in {repo:?}");
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

pub fn head_sha(repo: &Path) -> String {
    rev_parse(repo, "HEAD")
}
