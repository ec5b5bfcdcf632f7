//! RunLock: process-wide mutual exclusion for review runs, held as a
//! native advisory file lock plus a sibling JSON descriptor of the
//! holder (§3, §9 "prefer native advisory file locking for the review
//! lock, which must coordinate across processes").

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RuError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLockInfo {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub pid: u32,
    pub mode: String,
}

#[cfg(unix)]
pub struct RunLock {
    _flock: nix::fcntl::Flock<File>,
    info_path: PathBuf,
}

#[cfg(unix)]
impl RunLock {
    /// Attempts an exclusive, non-blocking advisory lock. On contention,
    /// reads the existing `review.lock.info` (if any) to report the
    /// holder's run_id/pid in the `LockHeld` error.
    pub fn acquire(lock_path: &Path, info_path: &Path, run_id: &str, pid: u32, mode: &str) -> Result<RunLock, RuError> {
        use nix::fcntl::{Flock, FlockArg};

        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).write(true).truncate(false).open(lock_path)?;

        let flock = Flock::lock(file, FlockArg::LockExclusiveNonblock).map_err(|(_file, _errno)| {
            let existing = read_info(info_path).unwrap_or(None);
            match existing {
                Some(info) => RuError::LockHeld { run_id: info.run_id, pid: info.pid },
                None => RuError::LockHeld { run_id: "unknown".into(), pid: 0 },
            }
        })?;

        let info = RunLockInfo { run_id: run_id.to_string(), started_at: Utc::now(), pid, mode: mode.to_string() };
        std::fs::write(info_path, serde_json::to_vec_pretty(&info)?)?;

        Ok(RunLock { _flock: flock, info_path: info_path.to_path_buf() })
    }

    pub fn release(self) -> Result<(), RuError> {
        let _ = std::fs::remove_file(&self.info_path);
        // The underlying fd closes (and the advisory lock with it) when
        // `self._flock` drops at the end of this function.
        Ok(())
    }
}

pub fn read_info(info_path: &Path) -> Result<Option<RunLockInfo>, RuError> {
    if !info_path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(info_path)?;
    Ok(Some(serde_json::from_str(&content)?))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn second_acquire_fails_while_first_holds_the_lock() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("review.lock");
        let info_path = dir.path().join("review.lock.info");

        let first = RunLock::acquire(&lock_path, &info_path, "run1", 111, "local").unwrap();
        let second = RunLock::acquire(&lock_path, &info_path, "run2", 222, "local");
        assert!(second.is_err());
        if let Err(RuError::LockHeld { run_id, pid }) = second {
            assert_eq!(run_id, "run1");
            assert_eq!(pid, 111);
        } else {
            panic!("expected LockHeld");
        }

        first.release().unwrap();
        assert!(!info_path.exists());
        assert!(RunLock::acquire(&lock_path, &info_path, "run3", 333, "local").is_ok());
    }
}
