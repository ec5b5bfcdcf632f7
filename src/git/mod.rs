//! C2 — git operations, grounded on a single subprocess wrapper
//! ([`command::run_git`]) that every higher-level operation goes
//! through.

pub mod command;
mod ops;

pub use ops::{
    fork_clean, fork_sync, is_clean, worktree_add, worktree_list, worktree_remove, CleanOutcome,
    CleanState, ConfirmationToken, ForkCleanRequest, ForkSyncRequest, PorcelainWorktree,
    SyncOutcome,
};
