//! Thin subprocess wrapper over the host `git` binary. Every call runs
//! with an explicit working directory and a bounded timeout; nothing in
//! this crate invokes `git` any other way.

use std::borrow::Cow;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use crate::error::RuError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

pub struct GitCommandResult {
    pub status_success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Quotes each argument for the debug log so paths and branch names with
/// spaces or quotes are unambiguous to read back.
fn loggable(args: &[&str]) -> String {
    args.iter()
        .map(|a| shell_escape::unix::escape(Cow::Borrowed(*a)).into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs `git <args>` in `workdir`, killing it if it exceeds `timeout`.
/// `workdir` is canonicalized first so the subprocess never sees a
/// Windows verbatim (`\\?\`) prefix that `git` can't parse.
pub fn run_git(
    repo_id: &str,
    workdir: &Path,
    args: &[&str],
    timeout: Duration,
) -> Result<GitCommandResult, RuError> {
    let workdir = dunce::canonicalize(workdir).unwrap_or_else(|_| workdir.to_path_buf());
    log::debug!("$ git {} (cwd={})", loggable(args), workdir.display());

    let mut child = Command::new("git")
        .args(args)
        .current_dir(&workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| RuError::PrereqBinary { name: format!("git ({e})") })?;

    let deadline = Instant::now() + timeout;
    let output: Output = loop {
        match child.try_wait() {
            Ok(Some(_status)) => break child.wait_with_output()?,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(RuError::GitTimeout {
                        repo_id: repo_id.to_string(),
                        seconds: timeout.as_secs(),
                    });
                }
                std::thread::sleep(Duration::from_millis(25));
            }
            Err(e) => return Err(RuError::Io { detail: e.to_string() }),
        }
    };

    let result = GitCommandResult {
        status_success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    log::trace!(
        "git {} -> success={} stdout={:?} stderr={:?}",
        loggable(args),
        result.status_success,
        result.stdout,
        result.stderr
    );
    Ok(result)
}

/// Convenience wrapper: run and require success, mapping failure to a
/// `GitConflict` with the combined output as detail. Callers that need to
/// distinguish failure modes should use [`run_git`] directly.
pub fn run_git_ok(
    repo_id: &str,
    workdir: &Path,
    args: &[&str],
) -> Result<GitCommandResult, RuError> {
    let result = run_git(repo_id, workdir, args, DEFAULT_TIMEOUT)?;
    if !result.status_success {
        return Err(RuError::GitConflict {
            repo_id: repo_id.to_string(),
            detail: format!("git {}: {}", loggable(args), result.stderr.trim()),
        });
    }
    Ok(result)
}
