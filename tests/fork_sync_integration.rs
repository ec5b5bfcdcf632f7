//! Integration coverage for `fork_sync` (C2) against real git repositories
//! instead of mocked porcelain output.

#[path = "support/git_fixture.rs"]
mod git_fixture;

use ru_core::config::FetchStrategy;
use ru_core::git::{fork_sync, ForkSyncRequest, SyncOutcome};
use ru_core::RuError;
use tempfile::tempdir;

fn sync(path: &std::path::Path, strategy: FetchStrategy) -> Result<SyncOutcome, RuError> {
    fork_sync(ForkSyncRequest {
        repo_id: "acme/widgets",
        path,
        strategy,
        dry_run: false,
        no_fetch: false,
    })
}

#[test]
fn ff_only_fast_forwards_when_behind() {
    let dir = tempdir().unwrap();
    let (upstream, fork) = git_fixture::init_fork_pair(dir.path());
    git_fixture::commit_file(&upstream, "file.txt", "hello\nworld\n", "second");

    let outcome = sync(&fork, FetchStrategy::FfOnly).unwrap();

    assert!(matches!(outcome, SyncOutcome::FastForwarded { .. }));
    assert_eq!(git_fixture::head_sha(&fork), git_fixture::head_sha(&upstream));
}

#[test]
fn ff_only_fails_cleanly_when_diverged() {
    let dir = tempdir().unwrap();
    let (upstream, fork) = git_fixture::init_fork_pair(dir.path());
    git_fixture::commit_file(&upstream, "file.txt", "hello\nupstream\n", "upstream change");
    git_fixture::commit_file(&fork, "local.txt", "local\n", "local change");

    let outcome = sync(&fork, FetchStrategy::FfOnly).unwrap();

    assert_eq!(outcome, SyncOutcome::FailedDivergedFfOnly { ahead: 1, behind: 1 });
}

#[test]
fn rebase_strategy_succeeds_on_divergence_and_keeps_local_work() {
    let dir = tempdir().unwrap();
    let (upstream, fork) = git_fixture::init_fork_pair(dir.path());
    git_fixture::commit_file(&upstream, "file.txt", "hello\nupstream\n", "upstream change");
    git_fixture::commit_file(&fork, "local.txt", "local\n", "local change");

    let outcome = sync(&fork, FetchStrategy::Rebase).unwrap();

    assert!(matches!(outcome, SyncOutcome::Rebased { .. }));
    assert!(fork.join("local.txt").exists());
    assert!(fork.join("file.txt").exists());
}

#[test]
fn merge_strategy_succeeds_on_divergence() {
    let dir = tempdir().unwrap();
    let (upstream, fork) = git_fixture::init_fork_pair(dir.path());
    git_fixture::commit_file(&upstream, "file.txt", "hello\nupstream\n", "upstream change");
    git_fixture::commit_file(&fork, "local.txt", "local\n", "local change");

    let outcome = sync(&fork, FetchStrategy::Merge).unwrap();

    assert!(matches!(outcome, SyncOutcome::Merged { .. }));
    assert!(fork.join("local.txt").exists());
}

#[test]
fn already_synced_is_a_no_op() {
    let dir = tempdir().unwrap();
    let (_upstream, fork) = git_fixture::init_fork_pair(dir.path());

    let outcome = sync(&fork, FetchStrategy::FfOnly).unwrap();

    assert_eq!(outcome, SyncOutcome::SkippedAlreadySynced);
}

#[test]
fn dirty_working_tree_is_rejected_before_any_fetch() {
    let dir = tempdir().unwrap();
    let (_upstream, fork) = git_fixture::init_fork_pair(dir.path());
    std::fs::write(fork.join("file.txt"), "uncommitted\n").unwrap();

    let err = sync(&fork, FetchStrategy::FfOnly).unwrap_err();

    assert!(matches!(err, RuError::GitDirty { .. }));
}

#[test]
fn dry_run_reports_outcome_without_merging() {
    let dir = tempdir().unwrap();
    let (upstream, fork) = git_fixture::init_fork_pair(dir.path());
    git_fixture::commit_file(&upstream, "file.txt", "hello\nworld\n", "second");
    let before = git_fixture::head_sha(&fork);

    let outcome = fork_sync(ForkSyncRequest {
        repo_id: "acme/widgets",
        path: &fork,
        strategy: FetchStrategy::FfOnly,
        dry_run: true,
        no_fetch: false,
    })
    .unwrap();

    assert!(matches!(outcome, SyncOutcome::FastForwarded { .. }));
    assert_eq!(git_fixture::head_sha(&fork), before, "dry run must not merge");
}
