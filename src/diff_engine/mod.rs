//! The Diff Engine (spec §4.1): extracting structured patches from commits, applying
//! them to text, parsing and writing unified diffs, and merging patches on one file.

mod apply;
mod merge;
mod parser;
mod writer;

pub use apply::apply_patch;
pub use merge::merge_patches;
pub use parser::parse_unified_diff;
pub use writer::write_patch;

use crate::error::EngineError;
use crate::model::{CommitId, Patch};
use crate::repository::Repository;

/// The canonical empty tree, used as the diff base for root commits (spec §8: "Root
/// commit extraction (no parent) produces patches against the empty tree").
const EMPTY_TREE_SHA: &str = "4b825dc642cb6eb9a060e54bf8d69288fbee4904";

/// Extract the structured patches a commit introduces relative to its first parent
/// (or the empty tree, for a root commit).
pub fn extract_patches(repo: &dyn Repository, commit_id: &CommitId) -> Result<Vec<Patch>, EngineError> {
    let info = repo.commit_info(commit_id)?;
    let base: CommitId = info
        .parent_ids
        .first()
        .cloned()
        .unwrap_or_else(|| CommitId::new(EMPTY_TREE_SHA));

    let diff_text = repo.tree_to_tree_diff(&base, commit_id)?;
    let patches = parse_unified_diff(&diff_text, commit_id)?;
    Ok(patches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CommitInfo;
    use crate::repository::FakeRepository;
    use chrono::Utc;
    use std::collections::HashMap;

    #[test]
    fn extract_patches_root_commit_uses_empty_tree_base() {
        // FakeRepository's tree_to_tree_diff always returns empty text, so this just
        // exercises that the empty-tree fallback doesn't require a parent lookup.
        let mut repo = FakeRepository::new();
        repo.add_commit(
            CommitInfo {
                id: CommitId::new("root"),
                message: "root".into(),
                author: "A".into(),
                email: "a@example.com".into(),
                timestamp: Utc::now(),
                parent_ids: vec![],
                files_changed: vec![],
            },
            HashMap::new(),
        );
        let patches = extract_patches(&repo, &CommitId::new("root")).unwrap();
        assert!(patches.is_empty());
    }
}
