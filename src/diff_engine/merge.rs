//! Combining patches that target the same file into a single patch (spec §4.1).

use crate::error::ApplyError;
use crate::model::{Hunk, ModeChange, Patch, PatchId};

/// Merge `patches`, which must all share a `target_file`, into one patch whose hunks
/// are sorted and renumbered into a single coordinate space. Overlapping hunks (in the
/// old coordinate space) are rejected — the caller should route the set through the
/// Conflict Detector first.
pub fn merge_patches(patches: &[Patch]) -> Result<Patch, ApplyError> {
    assert!(!patches.is_empty(), "merge_patches requires at least one patch");
    let target_file = patches[0].target_file.clone();
    debug_assert!(
        patches.iter().all(|p| p.target_file == target_file),
        "merge_patches requires a uniform target_file"
    );

    let mut all_hunks: Vec<Hunk> = patches.iter().flat_map(|p| p.hunks.clone()).collect();
    all_hunks.sort_by_key(|h| h.old_start);

    for window in all_hunks.windows(2) {
        if window[0].overlaps_old_range(&window[1]) {
            return Err(ApplyError::OverlappingHunks);
        }
    }

    let mode_change = merge_mode_changes(patches)?;
    let source_commit = patches[0].source_commit.clone();
    let id = PatchId::new(&source_commit, &target_file);

    Ok(Patch {
        id,
        source_commit,
        target_file,
        hunks: all_hunks,
        mode_change,
        status: patches[0].status,
        binary: patches.iter().any(|p| p.binary),
    })
}

fn merge_mode_changes(patches: &[Patch]) -> Result<Option<ModeChange>, ApplyError> {
    let mut result: Option<ModeChange> = None;
    for patch in patches {
        if let Some(change) = &patch.mode_change {
            match &result {
                None => result = Some(change.clone()),
                Some(existing) if existing == change => {}
                Some(_) => return Err(ApplyError::OverlappingHunks),
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommitId, DiffLine, FileStatus};
    use std::path::PathBuf;

    fn hunk(old_start: u32, old_lines: u32) -> Hunk {
        Hunk {
            old_start,
            old_lines,
            new_start: old_start,
            new_lines: old_lines,
            lines: vec![DiffLine::Context("x".into())],
            context: String::new(),
            old_missing_newline: false,
            new_missing_newline: false,
        }
    }

    fn patch(source: &str, hunks: Vec<Hunk>) -> Patch {
        let source_commit = CommitId::new(source);
        Patch {
            id: PatchId::new(&source_commit, &PathBuf::from("f.txt")),
            source_commit,
            target_file: PathBuf::from("f.txt"),
            hunks,
            mode_change: None,
            status: FileStatus::Modified,
            binary: false,
        }
    }

    #[test]
    fn merges_non_overlapping_hunks_sorted() {
        let a = patch("c1", vec![hunk(10, 1)]);
        let b = patch("c2", vec![hunk(1, 1)]);
        let merged = merge_patches(&[a, b]).unwrap();
        assert_eq!(merged.hunks[0].old_start, 1);
        assert_eq!(merged.hunks[1].old_start, 10);
    }

    #[test]
    fn rejects_overlapping_hunks() {
        let a = patch("c1", vec![hunk(1, 5)]);
        let b = patch("c2", vec![hunk(3, 5)]);
        assert!(matches!(
            merge_patches(&[a, b]),
            Err(ApplyError::OverlappingHunks)
        ));
    }
}
