//! The Conflict Detector (spec §4.2): given a candidate patch set and a target
//! commit, produce a deterministic list of `Conflict`s without mutating state.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use similar::{ChangeTag, TextDiff};

use crate::error::EngineError;
use crate::model::{Conflict, ConflictKind, FileStatus, ModeChange, Patch};
use crate::model::CommitId;
use crate::repository::Repository;

/// Detect every conflict among `patches` relative to `target`, grounded on spec
/// §4.2's four procedures: pairwise overlap, per-line overlap, target-state
/// divergence, and mode/existence disagreement.
pub fn detect_conflicts(
    repo: &dyn Repository,
    patches: &[Patch],
    target: &CommitId,
) -> Result<Vec<Conflict>, EngineError> {
    let mut conflicts = Vec::new();

    let mut by_file: BTreeMap<PathBuf, Vec<&Patch>> = BTreeMap::new();
    for patch in patches {
        by_file.entry(patch.target_file.clone()).or_default().push(patch);
    }

    for (file, group) in &by_file {
        if group.len() >= 2 {
            if pairwise_overlap_exists(group) {
                conflicts.extend(per_line_conflicts(file, group));
            }
            conflicts.extend(mode_and_existence_conflicts(file, group));
        }
    }

    for patch in patches {
        if let Some(conflict) = target_state_conflict(repo, patch, target)? {
            conflicts.push(conflict);
        }
    }

    conflicts.sort_by(|a, b| a.id.cmp(&b.id));
    conflicts.dedup_by(|a, b| a.id == b.id);
    Ok(conflicts)
}

/// Cheap pre-filter: does any pair of hunks in this file's patches overlap in the old
/// coordinate space? Gates the more expensive per-line scan below.
fn pairwise_overlap_exists(group: &[&Patch]) -> bool {
    for i in 0..group.len() {
        for j in (i + 1)..group.len() {
            for hunk_a in &group[i].hunks {
                for hunk_b in &group[j].hunks {
                    if hunk_a.overlaps_old_range(hunk_b) {
                        return true;
                    }
                }
            }
        }
    }
    false
}

/// Precise per-line variant: map `(line_number)` within the old file to the set of
/// patches covering it; any line claimed by more than one patch is a conflict.
fn per_line_conflicts(file: &Path, group: &[&Patch]) -> Vec<Conflict> {
    let mut line_owners: HashMap<u32, Vec<usize>> = HashMap::new();
    for (patch_index, patch) in group.iter().enumerate() {
        for hunk in &patch.hunks {
            for line in hunk.old_start..hunk.old_end() {
                line_owners.entry(line).or_default().push(patch_index);
            }
        }
    }

    let mut conflicts = Vec::new();
    let mut lines: Vec<&u32> = line_owners.keys().collect();
    lines.sort();
    for line in lines {
        let owners = &line_owners[line];
        if owners.len() > 1 {
            conflicts.push(Conflict {
                id: format!("{}:{}", file.display(), line),
                kind: ConflictKind::ContentConflict,
                file_path: file.to_path_buf(),
                description: format!(
                    "{} patches touch line {} of {}",
                    owners.len(),
                    line,
                    file.display()
                ),
                our_content: None,
                their_content: None,
            });
        }
    }
    conflicts
}

fn mode_and_existence_conflicts(file: &Path, group: &[&Patch]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();

    let mode_changes: Vec<&ModeChange> = group.iter().filter_map(|p| p.mode_change.as_ref()).collect();
    if mode_changes.windows(2).any(|w| w[0] != w[1]) {
        conflicts.push(Conflict {
            id: format!("{}:mode", file.display()),
            kind: ConflictKind::ModeConflict,
            file_path: file.to_path_buf(),
            description: format!("conflicting mode changes on {}", file.display()),
            our_content: None,
            their_content: None,
        });
    }

    let has_delete = group.iter().any(|p| p.status == FileStatus::Deleted);
    let has_modify = group.iter().any(|p| p.status == FileStatus::Modified);
    if has_delete && has_modify {
        conflicts.push(Conflict {
            id: format!("{}:delete-modify", file.display()),
            kind: ConflictKind::DeleteModifyConflict,
            file_path: file.to_path_buf(),
            description: format!("{} is deleted by one patch and modified by another", file.display()),
            our_content: None,
            their_content: None,
        });
    }

    let rename_sources: std::collections::HashSet<&CommitId> = group
        .iter()
        .filter(|p| matches!(p.status, FileStatus::Renamed(_)))
        .map(|p| &p.source_commit)
        .collect();
    if rename_sources.len() > 1 {
        conflicts.push(Conflict {
            id: format!("{}:rename", file.display()),
            kind: ConflictKind::RenameConflict,
            file_path: file.to_path_buf(),
            description: format!("{} is the rename destination of multiple patches", file.display()),
            our_content: None,
            their_content: None,
        });
    }

    conflicts
}

/// A potential conflict: lines the patch touches have diverged between its source
/// commit's resulting content and the target commit's current content. The actual
/// outcome is decided later by the Patch Applicator's three-way merge — this is a
/// preview-time warning only.
fn target_state_conflict(
    repo: &dyn Repository,
    patch: &Patch,
    target: &CommitId,
) -> Result<Option<Conflict>, EngineError> {
    if patch.binary {
        return Ok(None);
    }

    let source_content = match repo.read_blob(&patch.source_commit, &patch.target_file) {
        Ok(bytes) => bytes,
        Err(_) => return Ok(None),
    };
    let target_content = match repo.read_blob(target, &patch.target_file) {
        Ok(bytes) => bytes,
        Err(_) => {
            if patch.status == FileStatus::Deleted {
                return Ok(None);
            }
            return Ok(Some(Conflict {
                id: format!("{}:target-missing", patch.target_file.display()),
                kind: ConflictKind::DeleteModifyConflict,
                file_path: patch.target_file.clone(),
                description: format!(
                    "{} is absent at the target commit but the patch expects it",
                    patch.target_file.display()
                ),
                our_content: None,
                their_content: None,
            }));
        }
    };

    if source_content == target_content {
        return Ok(None);
    }

    let source_text = String::from_utf8_lossy(&source_content);
    let target_text = String::from_utf8_lossy(&target_content);
    let diff = TextDiff::from_lines(source_text.as_ref(), target_text.as_ref());

    let touched: Vec<std::ops::Range<u32>> = patch
        .hunks
        .iter()
        .map(|h| h.new_start..(h.new_start + h.new_lines))
        .collect();

    let mut source_line = 0u32;
    let mut diverges = false;
    for change in diff.iter_all_changes() {
        if matches!(change.tag(), ChangeTag::Equal | ChangeTag::Delete) {
            source_line += 1;
            if matches!(change.tag(), ChangeTag::Delete)
                && touched.iter().any(|range| range.contains(&source_line))
            {
                diverges = true;
            }
        }
    }

    if diverges {
        Ok(Some(Conflict {
            id: format!("{}:target-diverged", patch.target_file.display()),
            kind: ConflictKind::ContentConflict,
            file_path: patch.target_file.clone(),
            description: format!(
                "{} changed at the target commit within lines the patch touches",
                patch.target_file.display()
            ),
            our_content: Some(source_text.into_owned()),
            their_content: Some(target_text.into_owned()),
        }))
    } else {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommitInfo, DiffLine, Hunk, PatchId};
    use crate::repository::FakeRepository;
    use chrono::Utc;
    use std::collections::HashMap as StdHashMap;

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

    fn patch(source: &str, file: &str, hunks: Vec<Hunk>, status: FileStatus) -> Patch {
        let source_commit = CommitId::new(source);
        Patch {
            id: PatchId::new(&source_commit, Path::new(file)),
            source_commit,
            target_file: PathBuf::from(file),
            hunks,
            mode_change: None,
            status,
            binary: false,
        }
    }

    fn commit(id: &str) -> CommitInfo {
        CommitInfo {
            id: CommitId::new(id),
            message: "m".into(),
            author: "a".into(),
            email: "a@example.com".into(),
            timestamp: Utc::now(),
            parent_ids: vec![],
            files_changed: vec![],
        }
    }

    #[test]
    fn scenario_c_two_patches_same_line_yield_one_conflict() {
        let mut repo = FakeRepository::new();
        repo.add_commit(commit("c1"), StdHashMap::new());
        repo.add_commit(commit("c2"), StdHashMap::new());
        repo.add_commit(commit("target"), StdHashMap::new());

        let p1 = patch("c1", "file.txt", vec![hunk(2, 1)], FileStatus::Modified);
        let p2 = patch("c2", "file.txt", vec![hunk(2, 1)], FileStatus::Modified);

        let conflicts = detect_conflicts(&repo, &[p1, p2], &CommitId::new("target")).unwrap();
        let content_conflicts: Vec<_> = conflicts
            .iter()
            .filter(|c| c.kind == ConflictKind::ContentConflict && c.id == "file.txt:2")
            .collect();
        assert_eq!(content_conflicts.len(), 1);
    }

    #[test]
    fn non_overlapping_hunks_produce_no_conflict() {
        let mut repo = FakeRepository::new();
        repo.add_commit(commit("c1"), StdHashMap::new());
        repo.add_commit(commit("c2"), StdHashMap::new());
        repo.add_commit(commit("target"), StdHashMap::new());

        let p1 = patch("c1", "file.txt", vec![hunk(1, 1)], FileStatus::Modified);
        let p2 = patch("c2", "file.txt", vec![hunk(5, 1)], FileStatus::Modified);

        let conflicts = detect_conflicts(&repo, &[p1, p2], &CommitId::new("target")).unwrap();
        assert!(conflicts.is_empty());
    }

    #[test]
    fn delete_and_modify_on_same_file_conflict() {
        let mut repo = FakeRepository::new();
        repo.add_commit(commit("c1"), StdHashMap::new());
        repo.add_commit(commit("c2"), StdHashMap::new());
        repo.add_commit(commit("target"), StdHashMap::new());

        let p1 = patch("c1", "file.txt", vec![hunk(1, 1)], FileStatus::Deleted);
        let p2 = patch("c2", "file.txt", vec![hunk(1, 1)], FileStatus::Modified);

        let conflicts = detect_conflicts(&repo, &[p1, p2], &CommitId::new("target")).unwrap();
        assert!(conflicts
            .iter()
            .any(|c| c.kind == ConflictKind::DeleteModifyConflict));
    }

    #[test]
    fn deterministic_ordering_regardless_of_input_order() {
        let mut repo = FakeRepository::new();
        repo.add_commit(commit("c1"), StdHashMap::new());
        repo.add_commit(commit("c2"), StdHashMap::new());
        repo.add_commit(commit("target"), StdHashMap::new());

        let p1 = patch("c1", "file.txt", vec![hunk(2, 1)], FileStatus::Modified);
        let p2 = patch("c2", "file.txt", vec![hunk(2, 1)], FileStatus::Modified);

        let forward = detect_conflicts(&repo, &[p1.clone(), p2.clone()], &CommitId::new("target")).unwrap();
        let backward = detect_conflicts(&repo, &[p2, p1], &CommitId::new("target")).unwrap();
        assert_eq!(
            forward.iter().map(|c| &c.id).collect::<Vec<_>>(),
            backward.iter().map(|c| &c.id).collect::<Vec<_>>()
        );
    }
}
