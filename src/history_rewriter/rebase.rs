//! Materializing one rewritten commit: applying a patch set onto a new parent's tree
//! via the Patch Applicator, then creating the resulting commit (spec §4.4 step 3).

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::Utc;

use crate::error::EngineError;
use crate::model::{CommitId, CommitInfo, Conflict, FileStatus, ModeChange, Patch};
use crate::patch_applicator::{apply_to_content, ApplyOutcome};
use crate::repository::{Repository, Signature, TreeEntry, TreeId};

const DEFAULT_FILE_MODE: u32 = 0o100644;

/// Apply `patches` (the full resulting patch set for this commit) onto
/// `new_parents`'s lead parent's tree (empty tree for a root commit), preserving
/// `original`'s author identity and message unless `message_override` is given
/// (Split/Create/Merge replace the message; Move preserves it).
pub fn materialize_commit(
    repo: &dyn Repository,
    original: &CommitInfo,
    new_parents: &[CommitId],
    patches: &[Patch],
    message_override: Option<&str>,
) -> Result<CommitId, EngineError> {
    let tree = materialize_tree(repo, new_parents.first(), patches)?;

    let author = Signature {
        name: original.author.clone(),
        email: original.email.clone(),
        timestamp: original.timestamp,
    };
    let committer = Signature {
        name: original.author.clone(),
        email: original.email.clone(),
        timestamp: Utc::now(),
    };
    let message = message_override.unwrap_or(&original.message);

    let id = repo.create_commit(new_parents, &tree, &author, &committer, message)?;
    Ok(id)
}

/// Build the full tree for a rewritten commit: start from `lead_parent`'s tree (or an
/// empty tree, for a root commit), then overlay the result of applying each patch in
/// order, each against whatever the previous patches in this same call already wrote —
/// not against `lead_parent`'s untouched blob — so that two patches touching the same
/// file (e.g. the commit's own original patch plus one just moved onto it) compose
/// instead of each independently overwriting the other.
fn materialize_tree(
    repo: &dyn Repository,
    lead_parent: Option<&CommitId>,
    patches: &[Patch],
) -> Result<TreeId, EngineError> {
    let mut entries: HashMap<PathBuf, TreeEntry> = HashMap::new();
    if let Some(parent) = lead_parent {
        for (path, mode) in repo.list_tree(parent)? {
            let content = repo.read_blob(parent, &path)?;
            entries.insert(path.clone(), TreeEntry { path, mode, content });
        }
    }

    let mut conflicts: Vec<Conflict> = Vec::new();
    for patch in patches {
        let current = entries
            .get(&patch.target_file)
            .map(|entry| String::from_utf8_lossy(&entry.content).into_owned());
        let outcome = apply_to_content(repo, patch, current.as_deref())?;
        match outcome {
            ApplyOutcome::Clean(content) => {
                if patch.status == FileStatus::Deleted {
                    entries.remove(&patch.target_file);
                } else {
                    let mode = resolve_mode(&patch.mode_change);
                    entries.insert(
                        patch.target_file.clone(),
                        TreeEntry {
                            path: patch.target_file.clone(),
                            mode,
                            content: content.into_bytes(),
                        },
                    );
                }
            }
            ApplyOutcome::Conflict { conflicts: found, .. } => conflicts.extend(found),
        }
    }

    if !conflicts.is_empty() {
        return Err(EngineError::Conflict(conflicts));
    }

    let mut entry_list: Vec<TreeEntry> = entries.into_values().collect();
    entry_list.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(repo.write_tree(&entry_list)?)
}

fn resolve_mode(mode_change: &Option<ModeChange>) -> u32 {
    match mode_change {
        Some(ModeChange::NewFile(mode)) => *mode,
        Some(ModeChange::ModeChange(_, new)) => *new,
        Some(ModeChange::DeletedFile(mode)) => *mode,
        None => DEFAULT_FILE_MODE,
    }
}
