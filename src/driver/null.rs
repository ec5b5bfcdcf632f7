//! Zero-capability driver used when [`super::detect_driver`] finds
//! nothing. Every state-changing operation fails with
//! `DriverUnavailable`, which is how "discovery dry-run remains
//! permitted" is implemented without special-casing the orchestrator:
//! the orchestrator always has a driver object to call, it just can't
//! get past LAUNCH with this one.

use std::path::Path;

use super::{DriverCapabilities, SessionDriver, SessionState, SessionStateReport};
use crate::error::RuError;

pub struct NullDriver;

impl SessionDriver for NullDriver {
    fn capabilities(&self) -> DriverCapabilities {
        DriverCapabilities {
            name: "none".to_string(),
            parallel_sessions: false,
            activity_detection: false,
            health_monitoring: false,
            question_routing: false,
            max_concurrent: 1,
        }
    }

    fn start_session(&self, _id: &str, _workdir: &Path, _command: &str) -> Result<(), RuError> {
        Err(RuError::DriverUnavailable { detail: "no session driver available".into() })
    }

    fn session_alive(&self, _id: &str) -> bool {
        false
    }

    fn get_session_state(&self, id: &str) -> SessionStateReport {
        SessionStateReport { session_id: id.to_string(), state: SessionState::Dead }
    }

    fn list_sessions(&self) -> Vec<String> {
        Vec::new()
    }

    fn send_to_session(&self, id: &str, _text: &str) -> Result<(), RuError> {
        Err(RuError::SessionNotFound { id: id.to_string() })
    }

    fn interrupt_session(&self, id: &str) -> Result<(), RuError> {
        Err(RuError::SessionNotFound { id: id.to_string() })
    }

    fn stop_session(&self, _id: &str) -> Result<(), RuError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_claims_a_session_is_alive() {
        let driver = NullDriver;
        assert!(!driver.session_alive("ru-anything"));
        assert_eq!(driver.get_session_state("ru-anything").state, SessionState::Dead);
    }
}
