//! Concrete session driver backed by the `tmux` terminal multiplexer,
//! shelled out to the same way [`crate::git::command`] shells out to
//! `git`: build args, spawn, capture output.

use std::path::Path;
use std::process::{Command, Stdio};

use super::{DriverCapabilities, SessionDriver, SessionState, SessionStateReport, SESSION_PREFIX};
use crate::error::RuError;

pub struct LocalTmuxDriver {
    max_concurrent: usize,
}

impl LocalTmuxDriver {
    pub fn new() -> Self {
        LocalTmuxDriver { max_concurrent: 8 }
    }
}

impl Default for LocalTmuxDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn run_tmux(args: &[&str]) -> (bool, String, String) {
    log::debug!("$ tmux {}", args.join(" "));
    match Command::new("tmux").args(args).stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).output() {
        Ok(output) => (
            output.status.success(),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ),
        Err(e) => (false, String::new(), e.to_string()),
    }
}

fn has_session(id: &str) -> bool {
    run_tmux(&["has-session", "-t", id]).0
}

fn pane_pid(id: &str) -> Option<u32> {
    let (success, stdout, _) = run_tmux(&["list-panes", "-t", id, "-F", "#{pane_pid}"]);
    if !success {
        return None;
    }
    stdout.lines().next().and_then(|l| l.trim().parse().ok())
}

fn has_live_child(pid: u32) -> bool {
    let output = Command::new("ps")
        .args(["-o", "pid=", "--ppid", &pid.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output();
    match output {
        Ok(out) => !String::from_utf8_lossy(&out.stdout).trim().is_empty(),
        Err(_) => false,
    }
}

impl SessionDriver for LocalTmuxDriver {
    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            name: "tmux".to_string(),
            parallel_sessions: true,
            activity_detection: false,
            health_monitoring: true,
            question_routing: false,
            max_concurrent: self.max_concurrent,
        }
    }

    fn start_session(&self, id: &str, workdir: &Path, command: &str) -> Result<(), RuError> {
        if has_session(id) {
            return Err(RuError::SessionAlreadyExists { id: id.to_string() });
        }
        let workdir_str = workdir.to_string_lossy().into_owned();
        let (success, _stdout, stderr) =
            run_tmux(&["new-session", "-d", "-s", id, "-c", &workdir_str, command]);
        if !success {
            return Err(RuError::DriverFailed { detail: format!("tmux new-session failed: {stderr}") });
        }
        Ok(())
    }

    fn session_alive(&self, id: &str) -> bool {
        has_session(id)
    }

    fn get_session_state(&self, id: &str) -> SessionStateReport {
        if !has_session(id) {
            return SessionStateReport { session_id: id.to_string(), state: SessionState::Dead };
        }
        let state = match pane_pid(id) {
            Some(pid) if has_live_child(pid) => SessionState::Generating,
            Some(_) => SessionState::Complete,
            None => SessionState::Unknown,
        };
        SessionStateReport { session_id: id.to_string(), state }
    }

    fn list_sessions(&self) -> Vec<String> {
        let (success, stdout, _) = run_tmux(&["list-sessions", "-F", "#{session_name}"]);
        if !success {
            return Vec::new();
        }
        stdout
            .lines()
            .map(str::trim)
            .filter(|name| name.starts_with(SESSION_PREFIX))
            .map(String::from)
            .collect()
    }

    fn send_to_session(&self, id: &str, text: &str) -> Result<(), RuError> {
        if !has_session(id) {
            return Err(RuError::SessionNotFound { id: id.to_string() });
        }
        let (success, _stdout, stderr) = run_tmux(&["send-keys", "-t", id, "-l", text]);
        if !success {
            return Err(RuError::DriverFailed { detail: format!("tmux send-keys failed: {stderr}") });
        }
        let (success, _stdout, stderr) = run_tmux(&["send-keys", "-t", id, "Enter"]);
        if !success {
            return Err(RuError::DriverFailed { detail: format!("tmux send-keys (submit) failed: {stderr}") });
        }
        Ok(())
    }

    fn interrupt_session(&self, id: &str) -> Result<(), RuError> {
        if !has_session(id) {
            return Err(RuError::SessionNotFound { id: id.to_string() });
        }
        let (success, _stdout, stderr) = run_tmux(&["send-keys", "-t", id, "C-c"]);
        if !success {
            return Err(RuError::DriverFailed { detail: format!("tmux interrupt failed: {stderr}") });
        }
        Ok(())
    }

    fn stop_session(&self, id: &str) -> Result<(), RuError> {
        // Absence of the session is not an error.
        run_tmux(&["kill-session", "-t", id]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_report_a_positive_max_concurrent() {
        let driver = LocalTmuxDriver::new();
        let caps = driver.capabilities();
        assert_eq!(caps.name, "tmux");
        assert!(caps.max_concurrent > 0);
    }
}
