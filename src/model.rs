//! The Diff Model: types and invariants for patches, hunks, diff lines, mode
//! changes, conflicts, and operations (spec §3).

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque stable identifier for a commit (40-hex SHA-1 or equivalent).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 7-8 chars, for display.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(8)]
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CommitId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CommitId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Immutable snapshot of a commit as read from the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
    pub id: CommitId,
    pub message: String,
    pub author: String,
    pub email: String,
    pub timestamp: DateTime<Utc>,
    /// Ordered sequence of parent ids; empty for a root commit.
    pub parent_ids: Vec<CommitId>,
    pub files_changed: Vec<PathBuf>,
}

/// Stable identifier of a patch: `<source_short>:<target_file_path>`. Two patches
/// collide iff they share source commit and target file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PatchId(String);

impl PatchId {
    pub fn new(source: &CommitId, target_file: &std::path::Path) -> Self {
        Self(format!("{}:{}", source.short(), target_file.display()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single line in a diff. Text excludes the line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Context(String),
    Addition(String),
    Deletion(String),
}

impl DiffLine {
    pub fn text(&self) -> &str {
        match self {
            DiffLine::Context(s) | DiffLine::Addition(s) | DiffLine::Deletion(s) => s,
        }
    }
}

/// A contiguous block of diff lines with old/new line ranges. Line numbers are 1-based.
///
/// Invariants (enforced by the Diff Engine, not by construction):
/// - `old_lines` equals the count of `Context` + `Deletion` entries in `lines`.
/// - `new_lines` equals the count of `Context` + `Addition` entries.
/// - the first and last lines, when context exists, are context lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    pub old_start: u32,
    pub old_lines: u32,
    pub new_start: u32,
    pub new_lines: u32,
    pub lines: Vec<DiffLine>,
    /// The `@@ -a,b +c,d @@ context…` header line, preserved verbatim.
    pub context: String,
    /// True if the pre-image ended without a trailing newline.
    pub old_missing_newline: bool,
    /// True if the post-image ended without a trailing newline.
    pub new_missing_newline: bool,
}

impl Hunk {
    /// Exclusive end of this hunk's old-coordinate range (`old_start + old_lines`).
    pub fn old_end(&self) -> u32 {
        self.old_start + self.old_lines
    }

    /// Whether this hunk's old-coordinate range overlaps `other`'s.
    pub fn overlaps_old_range(&self, other: &Hunk) -> bool {
        !(self.old_end() <= other.old_start || other.old_end() <= self.old_start)
    }
}

/// A POSIX file-mode change associated with a patch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModeChange {
    NewFile(u32),
    DeletedFile(u32),
    ModeChange(u32, u32),
}

/// How a file's status changed between the diff's two trees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Added,
    Deleted,
    Modified,
    Renamed(u8),
    Copied(u8),
    Typechange,
}

/// A structured, file-scoped patch extracted from a single commit.
///
/// Invariant: `hunks` are ordered by `old_start` ascending and do not overlap
/// in the old coordinate space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patch {
    pub id: PatchId,
    pub source_commit: CommitId,
    pub target_file: PathBuf,
    pub hunks: Vec<Hunk>,
    pub mode_change: Option<ModeChange>,
    pub status: FileStatus,
    /// Opaque whole-file replacement patches (e.g. binary files) skip hunk application.
    pub binary: bool,
}

impl Patch {
    /// True if no two hunks overlap in the old coordinate space, and they're sorted.
    pub fn hunks_well_ordered(&self) -> bool {
        self.hunks
            .windows(2)
            .all(|w| w[0].old_start <= w[1].old_start && !w[0].overlaps_old_range(&w[1]))
    }
}

/// A single conflict detected by the Conflict Detector or raised by the Patch Applicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    /// Deterministic id: `<file>:<line>` for content, `<file>:mode` for mode, etc.
    pub id: String,
    pub kind: ConflictKind,
    pub file_path: PathBuf,
    pub description: String,
    pub our_content: Option<String>,
    pub their_content: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictKind {
    ContentConflict,
    ModeConflict,
    DeleteModifyConflict,
    RenameConflict,
}

/// Where a new or moved commit should be inserted relative to existing history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertPosition {
    Before(CommitId),
    After(CommitId),
    AtBranchHead,
}

/// A single commit-to-be in a `SplitCommit` operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCommit {
    pub message: String,
    pub patches: Vec<PatchId>,
}

/// A requested history-surgery operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    MovePatch {
        patch_id: PatchId,
        from_commit: CommitId,
        to_commit: CommitId,
        position: InsertPosition,
    },
    SplitCommit {
        source_commit: CommitId,
        new_commits: Vec<NewCommit>,
    },
    CreateCommit {
        patches: Vec<PatchId>,
        message: String,
        position: InsertPosition,
    },
    MergeCommits {
        commit_ids: Vec<CommitId>,
        message: String,
    },
}

/// Outcome of `apply_operation`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationResult {
    pub success: bool,
    pub new_commit_ids: Vec<CommitId>,
    pub modified_commits: Vec<CommitId>,
    pub conflicts: Vec<Conflict>,
    pub message: String,
}

/// A single human-readable line describing what an operation would change for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewChange {
    pub commit: CommitId,
    pub file: PathBuf,
    pub summary: String,
}

/// Dry-run preview of an operation's effects, produced without mutating the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationPreview {
    pub changes: Vec<PreviewChange>,
    pub potential_conflicts: Vec<Conflict>,
    pub affected_commits: Vec<CommitId>,
}
