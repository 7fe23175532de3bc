//! git-patchdance: interactive git history surgery built around a Patch Engine.
//!
//! This crate provides the engine behind moving, splitting, merging, and synthesizing
//! commits at the hunk level, with automatic conflict detection and descendant
//! rebasing. It does not ship a CLI or TUI — it is a library a front end drives.
//!
//! # Architecture
//!
//! - [`model`] — the Diff Model: `Patch`, `Hunk`, `Conflict`, `Operation`, and friends.
//! - [`diff_engine`] — extracting, applying, merging, and (de)serializing patches.
//! - [`conflict_detector`] — deciding whether a candidate patch set conflicts with a
//!   target commit, without mutating anything.
//! - [`patch_applicator`] — three-way merging one patch onto one target commit.
//! - [`history_rewriter`] — the transactional orchestrator: plan, back up, rewrite,
//!   rebase descendants, commit or roll back.
//! - [`repository`] — the `Repository` port the engine is generic over, plus the
//!   shipped `ShellRepository` binding to the system `git` binary.
//! - [`commit_graph`] — an in-memory DAG built from a repository's history, used to
//!   derive rewrite plans.
//! - [`cancel`] — a cooperative, instance-owned cancellation token.
//! - [`error`] — the engine-wide error taxonomy.
//!
//! # Example
//!
//! ```ignore
//! use git_patchdance::cancel::CancellationToken;
//! use git_patchdance::repository::ShellRepository;
//! use git_patchdance::{apply_operation, preview_operation};
//!
//! let repo = ShellRepository::open(".")?;
//! let preview = preview_operation(&repo, &operation)?;
//! if preview.potential_conflicts.is_empty() {
//!     let cancel = CancellationToken::new();
//!     let result = apply_operation(&repo, &operation, &cancel)?;
//! }
//! ```

pub mod cancel;
pub mod commit_graph;
pub mod conflict_detector;
pub mod diff_engine;
pub mod error;
pub mod history_rewriter;
pub mod model;
pub mod patch_applicator;
pub mod repository;

use cancel::CancellationToken;
use error::EngineError;
use history_rewriter::{HistoryRewriter, JournalStore};
use model::{CommitId, Conflict, Operation, OperationPreview, OperationResult, Patch};
use repository::Repository;

/// Extract the structured patches a commit introduces relative to its first parent
/// (spec §4.1, §6.2).
pub fn extract_patches(repo: &dyn Repository, commit_id: &CommitId) -> Result<Vec<Patch>, EngineError> {
    diff_engine::extract_patches(repo, commit_id)
}

/// Dry-run an operation: the affected-commit set and any conflicts it would raise,
/// without mutating the repository (spec §6.2).
pub fn preview_operation(repo: &dyn Repository, operation: &Operation) -> Result<OperationPreview, EngineError> {
    HistoryRewriter::new(repo).preview_operation(operation)
}

/// Apply an operation under the full transaction protocol, rolling back to the
/// pre-transaction state on any failure (spec §4.4, §6.2).
pub fn apply_operation(
    repo: &dyn Repository,
    operation: &Operation,
    cancel: &CancellationToken,
) -> Result<OperationResult, EngineError> {
    HistoryRewriter::new(repo).apply_operation(operation, cancel)
}

/// Detect conflicts a candidate patch set would raise against `target`, without
/// mutating anything (spec §4.2, §6.2).
pub fn detect_conflicts(
    repo: &dyn Repository,
    patches: &[Patch],
    target: &CommitId,
) -> Result<Vec<Conflict>, EngineError> {
    conflict_detector::detect_conflicts(repo, patches, target)
}

/// Restore a branch to the pre-transaction state recorded by `operation_id`'s journal
/// entry and backup ref, for recovery after a crash mid-transaction (spec §6.2, §6.3).
pub fn recover(repo: &dyn Repository, operation_id: &str, journal: &dyn JournalStore) -> Result<(), EngineError> {
    HistoryRewriter::new(repo).with_journal(journal).recover(operation_id)
}
