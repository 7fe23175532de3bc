//! The Patch Applicator (spec §4.3): three-way merge of a single patch onto a target
//! commit's content, producing either clean merged content or structured conflicts.

use similar::{ChangeTag, TextDiff};

use crate::diff_engine::apply_patch;
use crate::error::{ApplyError, EngineError};
use crate::model::{Conflict, ConflictKind, FileStatus, Patch};
use crate::model::CommitId;
use crate::repository::Repository;

/// Outcome of applying a patch to a target commit's tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Clean(String),
    Conflict {
        conflicts: Vec<Conflict>,
        base: String,
        ours: String,
        theirs: String,
    },
}

/// One base-relative line region where `ours` and `theirs` disagree.
struct Region {
    start: usize,
    end: usize,
}

/// Apply `patch` onto `target_commit`'s current content for `patch.target_file`,
/// three-way merging against the patch's own pre-image (spec §4.3 steps 1-6).
pub fn apply_to_target(
    repo: &dyn Repository,
    patch: &Patch,
    target_commit: &CommitId,
) -> Result<ApplyOutcome, EngineError> {
    let current = repo
        .read_blob(target_commit, &patch.target_file)
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned());
    apply_to_content(repo, patch, current.as_deref())
}

/// Apply `patch` onto `current` (the target file's content as it stands right now,
/// `None` if it doesn't exist there), three-way merging against the patch's own
/// pre-image (spec §4.3 steps 1-6). The History Rewriter uses this directly, rather
/// than `apply_to_target`, when composing several patches onto one in-progress tree:
/// `current` then reflects whatever earlier patches in the same commit already wrote,
/// not just the unmodified parent's blob.
pub fn apply_to_content(
    repo: &dyn Repository,
    patch: &Patch,
    current: Option<&str>,
) -> Result<ApplyOutcome, EngineError> {
    if patch.binary {
        return Err(ApplyError::BinaryPatchUnsupported.into());
    }

    let base = match patch.status {
        FileStatus::Added => String::new(),
        _ => match repo.first_parent_blob(patch) {
            Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            None => String::new(),
        },
    };

    let ours = apply_patch(&base, patch)?;

    let theirs = match current {
        Some(text) => text.to_string(),
        None if patch.status == FileStatus::Added => return Ok(ApplyOutcome::Clean(ours)),
        None if patch.status == FileStatus::Deleted => String::new(),
        None => {
            return Ok(ApplyOutcome::Conflict {
                conflicts: vec![Conflict {
                    id: format!("{}:missing-at-target", patch.target_file.display()),
                    kind: ConflictKind::DeleteModifyConflict,
                    file_path: patch.target_file.clone(),
                    description: format!(
                        "{} is absent at the target but the patch expects it",
                        patch.target_file.display()
                    ),
                    our_content: Some(ours),
                    their_content: None,
                }],
                base,
                ours,
                theirs: String::new(),
            });
        }
    };

    three_way_merge(&patch.target_file.display().to_string(), &base, &ours, &theirs)
}

fn three_way_merge(file: &str, base: &str, ours: &str, theirs: &str) -> Result<ApplyOutcome, EngineError> {
    if ours == theirs {
        return Ok(ApplyOutcome::Clean(ours.to_string()));
    }
    if base == theirs {
        return Ok(ApplyOutcome::Clean(ours.to_string()));
    }
    if base == ours {
        return Ok(ApplyOutcome::Clean(theirs.to_string()));
    }

    let base_lines: Vec<&str> = split_lines(base);
    let ours_regions = changed_base_regions(base, ours);
    let theirs_regions = changed_base_regions(base, theirs);

    let ours_map = base_change_map(&ours_regions, base_lines.len());
    let theirs_map = base_change_map(&theirs_regions, base_lines.len());

    let ours_repl = base_to_replacement_lines(base, ours);
    let theirs_repl = base_to_replacement_lines(base, theirs);

    let mut conflicts = Vec::new();
    let mut merged: Vec<String> = Vec::new();
    let mut index = 0usize;
    while index < base_lines.len() {
        let ours_changed = ours_map[index];
        let theirs_changed = theirs_map[index];

        match (ours_changed, theirs_changed) {
            (false, false) => {
                merged.push(base_lines[index].to_string());
                index += 1;
            }
            (true, false) => {
                let region = extend_region(&ours_map, index);
                merged.extend(ours_repl.get(&region_key(&region)).cloned().unwrap_or_default());
                index = region.end;
            }
            (false, true) => {
                let region = extend_region(&theirs_map, index);
                merged.extend(theirs_repl.get(&region_key(&region)).cloned().unwrap_or_default());
                index = region.end;
            }
            (true, true) => {
                let ours_region = extend_region(&ours_map, index);
                let theirs_region = extend_region(&theirs_map, index);
                let region = Region {
                    start: index,
                    end: ours_region.end.max(theirs_region.end),
                };
                let ours_text = ours_repl.get(&region_key(&ours_region)).cloned().unwrap_or_default();
                let theirs_text = theirs_repl
                    .get(&region_key(&theirs_region))
                    .cloned()
                    .unwrap_or_default();

                if ours_text == theirs_text {
                    merged.extend(ours_text);
                } else {
                    let line_no = region.start + 1;
                    // One side having no replacement text for this region means that side
                    // deleted it outright rather than editing it to a different value; the
                    // other side's non-empty replacement means it was kept, possibly changed.
                    // That's a delete/modify conflict, not a genuine value-level disagreement.
                    let (kind, description) = if ours_text.is_empty() || theirs_text.is_empty() {
                        (
                            ConflictKind::DeleteModifyConflict,
                            format!(
                                "{file} was deleted on one side and modified on the other at base line {line_no}"
                            ),
                        )
                    } else {
                        (
                            ConflictKind::ContentConflict,
                            format!(
                                "{file} diverges between patch application and target at base line {line_no}"
                            ),
                        )
                    };
                    conflicts.push(Conflict {
                        id: format!("{file}:{line_no}"),
                        kind,
                        file_path: file.into(),
                        description,
                        our_content: Some(ours_text.join("\n")),
                        their_content: Some(theirs_text.join("\n")),
                    });
                    merged.extend(ours_text);
                }
                index = region.end;
            }
        }
    }

    if conflicts.is_empty() {
        let mut text = merged.join("\n");
        if ours.ends_with('\n') || theirs.ends_with('\n') {
            text.push('\n');
        }
        Ok(ApplyOutcome::Clean(text))
    } else {
        Ok(ApplyOutcome::Conflict {
            conflicts,
            base: base.to_string(),
            ours: ours.to_string(),
            theirs: theirs.to_string(),
        })
    }
}

fn split_lines(text: &str) -> Vec<&str> {
    if text.is_empty() {
        return Vec::new();
    }
    let mut lines: Vec<&str> = text.split('\n').collect();
    if lines.last() == Some(&"") {
        lines.pop();
    }
    lines
}

/// For each base line index, whether it falls within a region that differs in `other`.
fn base_change_map(regions: &[Region], base_len: usize) -> Vec<bool> {
    let mut map = vec![false; base_len];
    for region in regions {
        for slot in map.iter_mut().take(region.end.min(base_len)).skip(region.start) {
            *slot = true;
        }
    }
    map
}

fn extend_region(map: &[bool], start: usize) -> Region {
    let mut end = start;
    while end < map.len() && map[end] {
        end += 1;
    }
    Region { start, end }
}

fn region_key(region: &Region) -> (usize, usize) {
    (region.start, region.end)
}

/// Base-line regions (by index) that `other` changes relative to `base`.
fn changed_base_regions(base: &str, other: &str) -> Vec<Region> {
    let diff = TextDiff::from_lines(base, other);
    let mut regions = Vec::new();
    let mut base_index = 0usize;
    let mut run_start: Option<usize> = None;

    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Equal => {
                if let Some(start) = run_start.take() {
                    regions.push(Region {
                        start,
                        end: base_index,
                    });
                }
                base_index += 1;
            }
            ChangeTag::Delete => {
                if run_start.is_none() {
                    run_start = Some(base_index);
                }
                base_index += 1;
            }
            ChangeTag::Insert => {
                if run_start.is_none() {
                    run_start = Some(base_index);
                }
            }
        }
    }
    if let Some(start) = run_start.take() {
        regions.push(Region {
            start,
            end: base_index,
        });
    }
    regions
}

/// Map each changed base region (by `(start, end)` key) to the replacement lines
/// `other` has for it, so the lockstep walk above can splice them in verbatim.
fn base_to_replacement_lines(base: &str, other: &str) -> std::collections::HashMap<(usize, usize), Vec<String>> {
    let diff = TextDiff::from_lines(base, other);
    let mut result = std::collections::HashMap::new();
    let mut base_index = 0usize;
    let mut run_start: Option<usize> = None;
    let mut run_lines: Vec<String> = Vec::new();

    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Equal => {
                if let Some(start) = run_start.take() {
                    result.insert((start, base_index), std::mem::take(&mut run_lines));
                }
                base_index += 1;
            }
            ChangeTag::Delete => {
                if run_start.is_none() {
                    run_start = Some(base_index);
                }
                base_index += 1;
            }
            ChangeTag::Insert => {
                if run_start.is_none() {
                    run_start = Some(base_index);
                }
                run_lines.push(change.to_string_lossy().trim_end_matches('\n').to_string());
            }
        }
    }
    if let Some(start) = run_start.take() {
        result.insert((start, base_index), run_lines);
    }
    result
}

/// Helper the `Repository` port doesn't define directly: read `patch.target_file` at
/// `patch.source_commit`'s first parent, the pre-image the patch was derived from.
trait SourceParentBlob {
    fn first_parent_blob(&self, patch: &Patch) -> Option<Vec<u8>>;
}

impl SourceParentBlob for dyn Repository + '_ {
    fn first_parent_blob(&self, patch: &Patch) -> Option<Vec<u8>> {
        let info = self.commit_info(&patch.source_commit).ok()?;
        let parent = info.parent_ids.first()?;
        self.read_blob(parent, &patch.target_file).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommitInfo, DiffLine, Hunk, PatchId};
    use crate::repository::FakeRepository;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::path::PathBuf;

    fn commit(id: &str, parent: Option<&str>) -> CommitInfo {
        CommitInfo {
            id: CommitId::new(id),
            message: "m".into(),
            author: "a".into(),
            email: "a@example.com".into(),
            timestamp: Utc::now(),
            parent_ids: parent.into_iter().map(CommitId::new).collect(),
            files_changed: vec![],
        }
    }

    fn snapshot(content: &str) -> HashMap<PathBuf, Vec<u8>> {
        let mut map = HashMap::new();
        map.insert(PathBuf::from("file.txt"), content.as_bytes().to_vec());
        map
    }

    #[test]
    fn clean_merge_when_only_ours_changes() {
        let mut repo = FakeRepository::new();
        repo.add_commit(commit("c1", None), snapshot("a\nb\nc\n"));
        repo.add_commit(commit("c2", Some("c1")), snapshot("a\nB\nc\n"));
        repo.add_commit(commit("target", Some("c1")), snapshot("a\nb\nc\n"));

        let source = CommitId::new("c2");
        let patch = Patch {
            id: PatchId::new(&source, &PathBuf::from("file.txt")),
            source_commit: source,
            target_file: PathBuf::from("file.txt"),
            hunks: vec![Hunk {
                old_start: 1,
                old_lines: 3,
                new_start: 1,
                new_lines: 3,
                lines: vec![
                    DiffLine::Context("a".into()),
                    DiffLine::Deletion("b".into()),
                    DiffLine::Addition("B".into()),
                    DiffLine::Context("c".into()),
                ],
                context: String::new(),
                old_missing_newline: false,
                new_missing_newline: false,
            }],
            mode_change: None,
            status: FileStatus::Modified,
            binary: false,
        };

        let outcome = apply_to_target(&repo, &patch, &CommitId::new("target")).unwrap();
        match outcome {
            ApplyOutcome::Clean(content) => assert_eq!(content, "a\nB\nc\n"),
            ApplyOutcome::Conflict { .. } => panic!("expected clean merge"),
        }
    }

    #[test]
    fn conflict_when_same_region_diverges() {
        let mut repo = FakeRepository::new();
        repo.add_commit(commit("c1", None), snapshot("a\nb\nc\n"));
        repo.add_commit(commit("c2", Some("c1")), snapshot("a\nB\nc\n"));
        repo.add_commit(commit("target", Some("c1")), snapshot("a\nBB\nc\n"));

        let source = CommitId::new("c2");
        let patch = Patch {
            id: PatchId::new(&source, &PathBuf::from("file.txt")),
            source_commit: source,
            target_file: PathBuf::from("file.txt"),
            hunks: vec![Hunk {
                old_start: 1,
                old_lines: 3,
                new_start: 1,
                new_lines: 3,
                lines: vec![
                    DiffLine::Context("a".into()),
                    DiffLine::Deletion("b".into()),
                    DiffLine::Addition("B".into()),
                    DiffLine::Context("c".into()),
                ],
                context: String::new(),
                old_missing_newline: false,
                new_missing_newline: false,
            }],
            mode_change: None,
            status: FileStatus::Modified,
            binary: false,
        };

        let outcome = apply_to_target(&repo, &patch, &CommitId::new("target")).unwrap();
        match outcome {
            ApplyOutcome::Conflict { conflicts, .. } => assert_eq!(conflicts.len(), 1),
            ApplyOutcome::Clean(_) => panic!("expected conflict"),
        }
    }

    #[test]
    fn one_sided_deletion_is_delete_modify_not_content_conflict() {
        let mut repo = FakeRepository::new();
        repo.add_commit(commit("c1", None), snapshot("a\nb\nc\n"));
        // The patch deletes the "b" line outright, leaving nothing in its place.
        repo.add_commit(commit("c2", Some("c1")), snapshot("a\nc\n"));
        // The target kept that base range but changed its value instead of removing it.
        repo.add_commit(commit("target", Some("c1")), snapshot("a\nb2\nc\n"));

        let source = CommitId::new("c2");
        let patch = Patch {
            id: PatchId::new(&source, &PathBuf::from("file.txt")),
            source_commit: source,
            target_file: PathBuf::from("file.txt"),
            hunks: vec![Hunk {
                old_start: 1,
                old_lines: 3,
                new_start: 1,
                new_lines: 2,
                lines: vec![
                    DiffLine::Context("a".into()),
                    DiffLine::Deletion("b".into()),
                    DiffLine::Context("c".into()),
                ],
                context: String::new(),
                old_missing_newline: false,
                new_missing_newline: false,
            }],
            mode_change: None,
            status: FileStatus::Modified,
            binary: false,
        };

        let outcome = apply_to_target(&repo, &patch, &CommitId::new("target")).unwrap();
        match outcome {
            ApplyOutcome::Conflict { conflicts, .. } => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].kind, ConflictKind::DeleteModifyConflict);
            }
            ApplyOutcome::Clean(_) => panic!("expected conflict"),
        }
    }

    #[test]
    fn missing_target_file_is_delete_modify_conflict() {
        let mut repo = FakeRepository::new();
        repo.add_commit(commit("c1", None), snapshot("a\nb\nc\n"));
        repo.add_commit(commit("c2", Some("c1")), snapshot("a\nB\nc\n"));
        repo.add_commit(commit("target", Some("c1")), HashMap::new());

        let source = CommitId::new("c2");
        let patch = Patch {
            id: PatchId::new(&source, &PathBuf::from("file.txt")),
            source_commit: source,
            target_file: PathBuf::from("file.txt"),
            hunks: vec![Hunk {
                old_start: 1,
                old_lines: 3,
                new_start: 1,
                new_lines: 3,
                lines: vec![
                    DiffLine::Context("a".into()),
                    DiffLine::Deletion("b".into()),
                    DiffLine::Addition("B".into()),
                    DiffLine::Context("c".into()),
                ],
                context: String::new(),
                old_missing_newline: false,
                new_missing_newline: false,
            }],
            mode_change: None,
            status: FileStatus::Modified,
            binary: false,
        };

        let outcome = apply_to_target(&repo, &patch, &CommitId::new("target")).unwrap();
        match outcome {
            ApplyOutcome::Conflict { conflicts, .. } => {
                assert_eq!(conflicts[0].kind, ConflictKind::DeleteModifyConflict);
            }
            ApplyOutcome::Clean(_) => panic!("expected conflict"),
        }
    }
}
