//! C4 — session driver abstraction: a capability-typed interface with a
//! concrete local implementation backed by a terminal multiplexer.

mod local_tmux;
mod null;

pub use local_tmux::LocalTmuxDriver;
pub use null::NullDriver;

use crate::error::RuError;

/// Reserved prefix for every session this crate creates; [`SessionDriver::list_sessions`]
/// must never return an id outside this namespace.
pub const SESSION_PREFIX: &str = "ru-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Dead,
    Unknown,
    Generating,
    Complete,
}

#[derive(Debug, Clone)]
pub struct SessionStateReport {
    pub session_id: String,
    pub state: SessionState,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DriverCapabilities {
    pub name: String,
    pub parallel_sessions: bool,
    pub activity_detection: bool,
    pub health_monitoring: bool,
    pub question_routing: bool,
    pub max_concurrent: usize,
}

/// Capability-typed session driver interface. Implementations declare
/// which operations are meaningful via [`SessionDriver::capabilities`].
pub trait SessionDriver: Send + Sync {
    fn capabilities(&self) -> DriverCapabilities;

    fn start_session(&self, id: &str, workdir: &std::path::Path, command: &str) -> Result<(), RuError>;

    fn session_alive(&self, id: &str) -> bool;

    fn get_session_state(&self, id: &str) -> SessionStateReport;

    /// Returns ids of all sessions beginning with [`SESSION_PREFIX`].
    fn list_sessions(&self) -> Vec<String>;

    fn send_to_session(&self, id: &str, text: &str) -> Result<(), RuError>;

    fn interrupt_session(&self, id: &str) -> Result<(), RuError>;

    /// Absence of the session is not an error.
    fn stop_session(&self, id: &str) -> Result<(), RuError>;

    /// Capability-gated; the default implementation (used by drivers with
    /// `activity_detection = false`) yields nothing.
    fn stream_events(&self, _id: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Returns the name of the first available driver: the network
/// multiplexer driver if its binary is on the path, else the local
/// multiplexer (`tmux`) driver if its binary is on the path, else `None`.
///
/// Only the local `tmux`-backed driver is concretely implemented by this
/// crate; the network-multiplexer slot is a documented extension point
/// with no binary to probe for today, so this always falls through to
/// the local check.
pub fn detect_driver() -> Option<&'static str> {
    if which::which("tmux").is_ok() {
        Some("tmux")
    } else {
        None
    }
}

/// Binds the unified driver operations to the named implementation.
pub fn load_driver(name: &str) -> Result<Box<dyn SessionDriver>, RuError> {
    match name {
        "tmux" => Ok(Box::new(LocalTmuxDriver::new())),
        "none" => Err(RuError::DriverUnavailable { detail: "no driver selected".into() }),
        other => Err(RuError::DriverUnavailable { detail: format!("unknown driver: {other}") }),
    }
}
