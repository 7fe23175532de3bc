//! Engine-wide error taxonomy.
//!
//! Every fallible engine operation returns `Result<T, EngineError>`. Component-local
//! error enums (`RepositoryError`, `DiffParseError`, `ApplyError`, `RewriteError`)
//! exist so each module can be unit-tested against its own narrow error surface, and
//! convert into `EngineError` at the API boundary via `#[from]`.

use crate::model::Conflict;

/// Errors from the `Repository` port (§6.1): missing/locked/corrupt repository state.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("repository not found at {0}")]
    NotFound(String),
    #[error("invalid commit id: {0}")]
    InvalidCommitId(String),
    #[error("file absent: {0}")]
    FileAbsent(String),
    #[error("ref {name} moved: expected {expected}, found {actual}")]
    RefMoved {
        name: String,
        expected: String,
        actual: String,
    },
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors from parsing a unified diff into `Patch`/`Hunk` values.
#[derive(Debug, thiserror::Error)]
pub enum DiffParseError {
    #[error("invalid hunk header: {0}")]
    InvalidHunkHeader(String),
    #[error("unexpected diff format: {0}")]
    UnexpectedFormat(String),
}

/// Errors from applying a patch to a text buffer.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("hunk {hunk_index} could not be located: {reason}")]
    HunkApplicationFailed { hunk_index: usize, reason: String },
    #[error("binary patches cannot be textually applied")]
    BinaryPatchUnsupported,
    #[error("hunks overlap in the old coordinate space")]
    OverlappingHunks,
}

/// Errors from the History Rewriter's transaction machinery.
#[derive(Debug, thiserror::Error)]
pub enum RewriteError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error("conflicts were not resolved")]
    Conflicts(Vec<Conflict>),
    #[error("operation cancelled")]
    Cancelled,
    #[error("ref moved between backup and commit: expected {expected}, found {actual}")]
    ConcurrentRefUpdate { expected: String, actual: String },
}

/// The engine-wide error type, matching the taxonomy in spec §7.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid commit id: {0}")]
    InvalidCommitId(String),
    #[error(transparent)]
    PatchParse(#[from] DiffParseError),
    #[error(transparent)]
    PatchApplication(#[from] ApplyError),
    #[error("unresolved conflicts")]
    Conflict(Vec<Conflict>),
    #[error("transaction aborted and rolled back: {cause}")]
    TransactionAborted { cause: Box<EngineError> },
    #[error("operation cancelled")]
    OperationCancelled,
}

impl EngineError {
    /// Wrap `self` as the root cause of a rolled-back transaction.
    pub fn into_aborted(self) -> EngineError {
        EngineError::TransactionAborted {
            cause: Box::new(self),
        }
    }
}

impl From<RewriteError> for EngineError {
    fn from(err: RewriteError) -> Self {
        match err {
            RewriteError::Repository(e) => EngineError::Repository(e),
            RewriteError::Apply(e) => EngineError::PatchApplication(e),
            RewriteError::Conflicts(c) => EngineError::Conflict(c),
            RewriteError::Cancelled => EngineError::OperationCancelled,
            RewriteError::ConcurrentRefUpdate { expected, actual } => {
                EngineError::Repository(RepositoryError::RefMoved {
                    name: "branch".to_string(),
                    expected,
                    actual,
                })
            }
        }
    }
}
