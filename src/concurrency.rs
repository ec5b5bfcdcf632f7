//! C7 — concurrency primitives: directory locks, process-wide backoff
//! state, and a bounded-parallel sweep over independent per-repo tasks.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::RuError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A coarse mutual-exclusion primitive built on atomic directory
/// creation: `mkdir` succeeds iff the directory did not exist.
pub struct DirLock {
    path: PathBuf,
}

pub fn dir_lock_acquire(path: &Path, timeout: Duration) -> Result<DirLock, RuError> {
    let deadline = Instant::now() + timeout;
    loop {
        match std::fs::create_dir(path) {
            Ok(()) => return Ok(DirLock { path: path.to_path_buf() }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if Instant::now() >= deadline {
                    return Err(RuError::RepoLocked { repo_id: path.display().to_string() });
                }
                std::thread::sleep(POLL_INTERVAL);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

pub fn dir_lock_release(lock: DirLock) -> Result<(), RuError> {
    std::fs::remove_dir(&lock.path)?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct BackoffState {
    pub reason: String,
    /// Epoch seconds; `0` means no active pause.
    pub pause_until: i64,
}

/// Writes `{reason, pause_until}` via write-to-tempfile-then-rename so
/// concurrent readers never observe a partial write.
pub fn backoff_trigger(path: &Path, reason: &str, minutes: i64, now: i64) -> Result<(), RuError> {
    let state = BackoffState { reason: reason.to_string(), pause_until: now + minutes * 60 };
    let json = serde_json::to_vec_pretty(&state)?;

    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let tmp_path = parent.join(format!(".{}.tmp", path.file_name().unwrap_or_default().to_string_lossy()));
    std::fs::write(&tmp_path, json)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

pub fn read_backoff_state(path: &Path) -> Result<BackoffState, RuError> {
    if !path.exists() {
        return Ok(BackoffState::default());
    }
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// If `pause_until` is in the future, sleeps until it passes; otherwise
/// returns immediately.
pub fn backoff_wait_if_needed(path: &Path, now: i64) -> Result<(), RuError> {
    let state = read_backoff_state(path)?;
    if state.pause_until > now {
        let remaining = (state.pause_until - now).max(0) as u64;
        std::thread::sleep(Duration::from_secs(remaining));
    }
    Ok(())
}

/// Executes `tasks` concurrently with at most `workers` in flight, over a
/// fixed-size pool of OS threads reading from a shared queue. Runs inside
/// `std::thread::scope`, so `f` may borrow from its caller's stack frame.
pub fn parallel_agent_sweep<T, R, F>(workers: usize, tasks: Vec<T>, f: F) -> Vec<R>
where
    T: Send,
    R: Send,
    F: Fn(T) -> R + Send + Sync,
{
    let workers = workers.max(1);
    let (task_tx, task_rx) = crossbeam_channel::unbounded::<(usize, T)>();
    let (result_tx, result_rx) = crossbeam_channel::unbounded::<(usize, R)>();

    for (idx, task) in tasks.into_iter().enumerate() {
        task_tx.send((idx, task)).expect("task channel is open");
    }
    drop(task_tx);

    let f = std::sync::Arc::new(f);
    std::thread::scope(|scope| {
        for _ in 0..workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let f = std::sync::Arc::clone(&f);
            scope.spawn(move || {
                while let Ok((idx, task)) = task_rx.recv() {
                    let result = f(task);
                    let _ = result_tx.send((idx, result));
                }
            });
        }
        drop(result_tx);

        let mut collected: Vec<(usize, R)> = result_rx.iter().collect();
        collected.sort_by_key(|(idx, _)| *idx);
        collected.into_iter().map(|(_, r)| r).collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn dir_lock_is_exclusive_until_released() {
        let dir = tempdir().unwrap();
        let lock_path = dir.path().join("lock");
        let lock = dir_lock_acquire(&lock_path, Duration::from_millis(50)).unwrap();
        assert!(lock_path.exists());
        assert!(dir_lock_acquire(&lock_path, Duration::from_millis(50)).is_err());
        dir_lock_release(lock).unwrap();
        assert!(!lock_path.exists());
        assert!(dir_lock_acquire(&lock_path, Duration::from_millis(50)).is_ok());
    }

    #[test]
    fn backoff_state_round_trips_and_pause_until_zero_means_inactive() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("backoff.state");
        assert_eq!(read_backoff_state(&path).unwrap().pause_until, 0);
        backoff_trigger(&path, "rate_limited", 1, 1000).unwrap();
        let state = read_backoff_state(&path).unwrap();
        assert_eq!(state.reason, "rate_limited");
        assert_eq!(state.pause_until, 1060);
    }

    #[test]
    fn sweep_runs_all_tasks_and_preserves_input_order_in_output() {
        let results = parallel_agent_sweep(4, (0..20).collect(), |n: i32| n * 2);
        let expected: Vec<i32> = (0..20).map(|n| n * 2).collect();
        assert_eq!(results, expected);
    }
}
