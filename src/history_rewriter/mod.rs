//! The History Rewriter (spec §4.4, §5): transactional application of an `Operation`
//! to a repository, with preview, backup-and-rollback, and cooperative cancellation.
//!
//! A transaction moves through `Idle -> Planning -> Preflighting -> BackupTaken ->
//! Rewriting -> Rebasing -> Committing -> Done`, collapsing to `RollingBack -> Idle`
//! from any state on failure. `TransactionState` exists for observability (it's logged
//! at each transition); callers don't drive it directly, `apply_operation` does.

mod backup;
mod plan;
mod rebase;

pub use backup::{backup_ref_name, restore_from_backup, FileJournalStore, JournalRecord, JournalStore};
pub use plan::{derive_plan, RewritePlan};

use std::collections::HashMap;
use std::time::Duration;

use crate::cancel::CancellationToken;
use crate::commit_graph::CommitGraph;
use crate::conflict_detector::detect_conflicts;
use crate::diff_engine::{extract_patches, merge_patches};
use crate::error::{EngineError, RepositoryError};
use crate::model::{
    CommitId, InsertPosition, Operation, OperationPreview, OperationResult, Patch, PatchId,
    PreviewChange,
};
use crate::repository::Repository;

/// Tunable policy knobs for a rewrite transaction.
#[derive(Debug, Clone)]
pub struct RewritePolicy {
    /// Drop a rewritten commit entirely once its patch set becomes empty, rather than
    /// leaving a no-op commit in history. Default true.
    pub elide_empty_commits: bool,
    /// How long a backup ref is kept around before `prune_backups` is allowed to
    /// reclaim it. Not enforced by this module directly — it's advisory metadata for
    /// whatever maintenance job calls `prune_backups`.
    pub backup_retention: Duration,
    /// Soft budget for a single `apply_operation` call; exceeding it doesn't abort the
    /// transaction but is logged at `warn`, since there is no portable way to
    /// preempt an in-flight `git` subprocess call.
    pub transaction_timeout: Duration,
}

impl Default for RewritePolicy {
    fn default() -> Self {
        Self {
            elide_empty_commits: true,
            backup_retention: Duration::from_secs(14 * 24 * 60 * 60),
            transaction_timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Transaction lifecycle states (spec §5). Logged, not branched on, by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Planning,
    Preflighting,
    BackupTaken,
    Rewriting,
    Rebasing,
    Committing,
    Done,
    RollingBack,
}

fn transition(state: TransactionState) {
    log::debug!("transaction state -> {state:?}");
}

const HISTORY_WALK_LIMIT: usize = 10_000;

/// Orchestrates operations against one `Repository`. Stateless between calls other
/// than the policy/journal it was built with; all transaction state lives on the stack
/// of a single `apply_operation` call.
pub struct HistoryRewriter<'a> {
    repo: &'a dyn Repository,
    policy: RewritePolicy,
    journal: Option<&'a dyn JournalStore>,
}

impl<'a> HistoryRewriter<'a> {
    pub fn new(repo: &'a dyn Repository) -> Self {
        Self {
            repo,
            policy: RewritePolicy::default(),
            journal: None,
        }
    }

    pub fn with_policy(mut self, policy: RewritePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_journal(mut self, journal: &'a dyn JournalStore) -> Self {
        self.journal = Some(journal);
        self
    }

    fn build_graph(&self) -> Result<CommitGraph, EngineError> {
        let head = self.repo.head()?;
        let commits = self.repo.walk_history(&head, HISTORY_WALK_LIMIT)?;
        let mut graph = CommitGraph::new();
        for commit in commits {
            graph.insert(commit);
        }
        Ok(graph)
    }

    /// Dry-run `operation`: derive its plan and run the Conflict Detector against the
    /// resulting patch sets, without writing anything. Calling this twice in a row
    /// with no intervening repository change returns identical results (spec §8's
    /// "idempotent preview" property).
    pub fn preview_operation(&self, operation: &Operation) -> Result<OperationPreview, EngineError> {
        transition(TransactionState::Planning);
        let graph = self.build_graph()?;
        let plan = derive_plan(&graph, operation);
        let pool = build_patch_pool(self.repo, operation, &graph)?;

        let mut changes = Vec::new();
        let mut potential_conflicts = Vec::new();
        for commit in &plan.affected_commits {
            let patches = preview_patches_for(operation, commit, &pool)?;
            for patch in &patches {
                changes.push(PreviewChange {
                    commit: commit.clone(),
                    file: patch.target_file.clone(),
                    summary: format!("{:?} {}", patch.status, patch.target_file.display()),
                });
            }
            potential_conflicts.extend(detect_conflicts(self.repo, &patches, commit)?);
        }
        potential_conflicts.sort_by(|a, b| a.id.cmp(&b.id));
        potential_conflicts.dedup_by(|a, b| a.id == b.id);

        Ok(OperationPreview {
            changes,
            potential_conflicts,
            affected_commits: plan.affected_commits,
        })
    }

    /// Apply `operation` under the full transaction protocol: plan, preflight, back up,
    /// rewrite the directly-targeted commit(s), rebase affected descendants, then swap
    /// the branch ref. Any failure at any step rolls the branch back to its
    /// pre-transaction head via the backup ref (spec §5's "any state -> RollingBack").
    pub fn apply_operation(
        &self,
        operation: &Operation,
        cancel: &CancellationToken,
    ) -> Result<OperationResult, EngineError> {
        transition(TransactionState::Planning);
        let graph = self.build_graph()?;
        let plan = derive_plan(&graph, operation);
        if cancel.is_cancelled() {
            return Err(EngineError::OperationCancelled);
        }

        transition(TransactionState::Preflighting);
        if !self.repo.is_clean()? {
            return Err(EngineError::Repository(RepositoryError::CommandFailed(
                "working tree is not clean".to_string(),
            )));
        }
        // `current_branch` returns the short name (e.g. "main"); `update_ref` shells
        // out to `git update-ref`, which needs the fully-qualified ref path.
        let branch = format!("refs/heads/{}", self.repo.current_branch()?);
        let original_head = self.repo.head()?;
        if cancel.is_cancelled() {
            return Err(EngineError::OperationCancelled);
        }

        let operation_id = format!(
            "{}-{}",
            original_head.short(),
            chrono::Utc::now().format("%Y%m%dT%H%M%S%.f")
        );

        transition(TransactionState::BackupTaken);
        backup::create_backup(self.repo, &operation_id, &original_head)?;
        if let Some(journal) = self.journal {
            journal.save(&backup::JournalRecord {
                operation_id: operation_id.clone(),
                original_head: original_head.clone(),
                original_ref: branch.clone(),
                temp_files: Vec::new(),
                timestamp: chrono::Utc::now(),
            })?;
        }

        match self.run_rewrite(operation, &graph, &plan, &branch, &original_head, cancel) {
            Ok(result) => {
                transition(TransactionState::Done);
                if let Some(journal) = self.journal {
                    journal.delete(&operation_id)?;
                }
                Ok(result)
            }
            Err(err) => {
                transition(TransactionState::RollingBack);
                log::warn!("rewrite failed, rolling back: {err}");
                backup::restore_from_backup(self.repo, &branch, &operation_id)
                    .map_err(|rollback_err| rollback_err.into_aborted())?;
                transition(TransactionState::Idle);
                Err(err.into_aborted())
            }
        }
    }

    /// Recover a transaction that crashed or was killed mid-flight: restore `branch`
    /// from the backup ref its journal entry recorded, then drop the journal entry
    /// (spec §6.2's `recover`).
    pub fn recover(&self, operation_id: &str) -> Result<(), EngineError> {
        let journal = self
            .journal
            .ok_or_else(|| EngineError::InvalidCommitId("no journal store configured".to_string()))?;
        let record = journal
            .load(operation_id)?
            .ok_or_else(|| EngineError::InvalidCommitId(format!("no journal entry for {operation_id}")))?;
        backup::restore_from_backup(self.repo, &record.original_ref, operation_id)?;
        journal.delete(operation_id)?;
        Ok(())
    }

    fn run_rewrite(
        &self,
        operation: &Operation,
        graph: &CommitGraph,
        plan: &RewritePlan,
        branch: &str,
        original_head: &CommitId,
        cancel: &CancellationToken,
    ) -> Result<OperationResult, EngineError> {
        transition(TransactionState::Rewriting);
        let pool = build_patch_pool(self.repo, operation, graph)?;
        let mut new_ids: HashMap<CommitId, CommitId> = HashMap::new();
        let mut created = Vec::new();
        let mut modified = Vec::new();

        match operation {
            Operation::MovePatch {
                patch_id,
                from_commit,
                to_commit,
                ..
            } => {
                for commit in &plan.affected_commits {
                    if cancel.is_cancelled() {
                        return Err(EngineError::OperationCancelled);
                    }
                    let info = self.repo.commit_info(commit)?;
                    let new_parents = resolve_parents(&info, &new_ids);
                    let mut patches = extract_patches(self.repo, commit)?;
                    if commit == from_commit {
                        patches.retain(|p| &p.id != patch_id);
                    }
                    if commit == to_commit && !patches.iter().any(|p| &p.id == patch_id) {
                        if let Some(p) = pool.get(patch_id) {
                            patches.push(p.clone());
                        }
                    }
                    if patches.is_empty() && self.policy.elide_empty_commits && commit == from_commit {
                        // elide: this commit's id simply maps through to its parent.
                        new_ids.insert(commit.clone(), new_parents.first().cloned().unwrap_or_else(|| original_head.clone()));
                        continue;
                    }
                    let new_id = rebase::materialize_commit(self.repo, &info, &new_parents, &patches, None)?;
                    new_ids.insert(commit.clone(), new_id.clone());
                    modified.push(commit.clone());
                }
            }

            Operation::SplitCommit {
                source_commit,
                new_commits,
            } => {
                for commit in &plan.affected_commits {
                    if cancel.is_cancelled() {
                        return Err(EngineError::OperationCancelled);
                    }
                    let info = self.repo.commit_info(commit)?;
                    if commit == source_commit {
                        let mut parents = resolve_parents(&info, &new_ids);
                        for piece in new_commits {
                            let piece_patches: Vec<Patch> = piece
                                .patches
                                .iter()
                                .filter_map(|pid| pool.get(pid).cloned())
                                .collect();
                            let new_id = rebase::materialize_commit(
                                self.repo,
                                &info,
                                &parents,
                                &piece_patches,
                                Some(&piece.message),
                            )?;
                            created.push(new_id.clone());
                            parents = vec![new_id];
                        }
                        new_ids.insert(
                            commit.clone(),
                            parents.into_iter().next().unwrap_or_else(|| original_head.clone()),
                        );
                    } else {
                        let new_parents = resolve_parents(&info, &new_ids);
                        let patches = extract_patches(self.repo, commit)?;
                        let new_id = rebase::materialize_commit(self.repo, &info, &new_parents, &patches, None)?;
                        new_ids.insert(commit.clone(), new_id.clone());
                        modified.push(commit.clone());
                    }
                }
            }

            Operation::CreateCommit {
                patches: patch_ids,
                message,
                position,
            } => {
                let new_patches: Vec<Patch> = patch_ids.iter().filter_map(|pid| pool.get(pid).cloned()).collect();
                match position {
                    InsertPosition::AtBranchHead => {
                        let head_info = self.repo.commit_info(original_head)?;
                        let synth_id = rebase::materialize_commit(
                            self.repo,
                            &head_info,
                            std::slice::from_ref(original_head),
                            &new_patches,
                            Some(message),
                        )?;
                        created.push(synth_id);
                    }
                    InsertPosition::Before(anchor) | InsertPosition::After(anchor) => {
                        let insert_before = matches!(position, InsertPosition::Before(_));
                        for commit in &plan.affected_commits {
                            if cancel.is_cancelled() {
                                return Err(EngineError::OperationCancelled);
                            }
                            let info = self.repo.commit_info(commit)?;
                            let mut new_parents = resolve_parents(&info, &new_ids);
                            if commit == anchor && insert_before {
                                let synth_id = rebase::materialize_commit(
                                    self.repo,
                                    &info,
                                    &new_parents,
                                    &new_patches,
                                    Some(message),
                                )?;
                                created.push(synth_id.clone());
                                new_parents = vec![synth_id];
                            }
                            let patches = extract_patches(self.repo, commit)?;
                            let new_id = rebase::materialize_commit(self.repo, &info, &new_parents, &patches, None)?;
                            if commit == anchor && !insert_before {
                                let synth_id = rebase::materialize_commit(
                                    self.repo,
                                    &info,
                                    std::slice::from_ref(&new_id),
                                    &new_patches,
                                    Some(message),
                                )?;
                                created.push(synth_id.clone());
                                new_ids.insert(commit.clone(), synth_id);
                            } else {
                                new_ids.insert(commit.clone(), new_id);
                            }
                            modified.push(commit.clone());
                        }
                    }
                }
            }

            Operation::MergeCommits { commit_ids, message } => {
                // `commit_ids` are sorted to the front of `plan.affected_commits`
                // (they're each their own descendants-of-earliest seed); everything
                // after them in the plan is a pure descendant rebase.
                let merged_set: std::collections::HashSet<&CommitId> = commit_ids.iter().collect();
                let mut merge_parents: Vec<CommitId> = Vec::new();
                let mut commit_patches: Vec<Patch> = Vec::new();
                let mut first_parent_of: HashMap<CommitId, Option<CommitId>> = HashMap::new();
                let mut last_info = None;
                for commit in &plan.affected_commits {
                    if !merged_set.contains(commit) {
                        continue;
                    }
                    let info = self.repo.commit_info(commit)?;
                    for parent in resolve_parents(&info, &new_ids) {
                        if !merge_parents.contains(&parent) {
                            merge_parents.push(parent);
                        }
                    }
                    first_parent_of.insert(commit.clone(), info.parent_ids.first().cloned());
                    commit_patches.extend(extract_patches(self.repo, commit)?);
                    last_info = Some(info);
                }
                let anchor_info = last_info.ok_or_else(|| {
                    EngineError::InvalidCommitId("MergeCommits requires at least one commit".to_string())
                })?;

                // Two merged commits touching the same file produce two patches with the
                // same target_file. Folding them into one patch via the Diff Engine's
                // merge_patches (spec §4.1) is only sound when both patches were diffed
                // against the same base tree, i.e. the merged commits are true siblings
                // sharing one parent — merge_patches sorts and overlap-checks hunks in a
                // single shared old-coordinate-space, which a chain of linear commits
                // (each diffed against the previous one, not a common base) does not have.
                // Groups that don't share a base are left separate for materialize_tree's
                // existing sequential apply_to_content composition to handle instead.
                let mut by_file: HashMap<std::path::PathBuf, Vec<Patch>> = HashMap::new();
                for patch in commit_patches {
                    by_file.entry(patch.target_file.clone()).or_default().push(patch);
                }
                let mut merged_patches = Vec::new();
                for (_, group) in by_file {
                    let share_base = group.len() > 1
                        && group
                            .windows(2)
                            .all(|pair| first_parent_of.get(&pair[0].source_commit) == first_parent_of.get(&pair[1].source_commit));
                    if share_base {
                        merged_patches.push(merge_patches(&group)?);
                    } else {
                        merged_patches.extend(group);
                    }
                }

                let merged_id = rebase::materialize_commit(
                    self.repo,
                    &anchor_info,
                    &merge_parents,
                    &merged_patches,
                    Some(message),
                )?;
                created.push(merged_id.clone());
                for commit in commit_ids {
                    new_ids.insert(commit.clone(), merged_id.clone());
                }

                for commit in &plan.affected_commits {
                    if merged_set.contains(commit) {
                        continue;
                    }
                    if cancel.is_cancelled() {
                        return Err(EngineError::OperationCancelled);
                    }
                    let info = self.repo.commit_info(commit)?;
                    let new_parents = resolve_parents(&info, &new_ids);
                    let patches = extract_patches(self.repo, commit)?;
                    let new_id = rebase::materialize_commit(self.repo, &info, &new_parents, &patches, None)?;
                    new_ids.insert(commit.clone(), new_id.clone());
                    modified.push(commit.clone());
                }
            }
        }

        transition(TransactionState::Rebasing);
        let final_head = plan
            .affected_commits
            .last()
            .and_then(|id| new_ids.get(id).cloned())
            .or_else(|| created.last().cloned())
            .unwrap_or_else(|| original_head.clone());

        transition(TransactionState::Committing);
        self.repo.update_ref(branch, original_head, &final_head)?;

        Ok(OperationResult {
            success: true,
            new_commit_ids: created,
            modified_commits: modified,
            conflicts: Vec::new(),
            message: "operation applied".to_string(),
        })
    }
}

/// Resolve a commit's rewritten parent list: any parent already rewritten this
/// transaction maps through `new_ids`; parents outside the plan keep their original id
/// (they're untouched ancestors). Assumes `plan.affected_commits` is iterated in
/// topological order, so parents are always resolved before their children.
fn resolve_parents(info: &crate::model::CommitInfo, new_ids: &HashMap<CommitId, CommitId>) -> Vec<CommitId> {
    info.parent_ids
        .iter()
        .map(|p| new_ids.get(p).cloned().unwrap_or_else(|| p.clone()))
        .collect()
}

/// Build the full candidate patch pool an operation can reference by `PatchId`.
///
/// For `MovePatch`/`SplitCommit`/`MergeCommits`, every patch id an operation can name
/// originates from a commit the operation already names explicitly, so extracting just
/// those commits is exact. `CreateCommit.patches` carries bare `PatchId`s with no
/// accompanying source-commit field, so for that variant the pool is built by walking
/// the full reachable history — more expensive, but correct regardless of which commit
/// originally introduced the referenced patch.
fn build_patch_pool(
    repo: &dyn Repository,
    operation: &Operation,
    graph: &CommitGraph,
) -> Result<HashMap<PatchId, Patch>, EngineError> {
    let mut pool = HashMap::new();
    let extract_into = |commit: &CommitId, pool: &mut HashMap<PatchId, Patch>| -> Result<(), EngineError> {
        for patch in extract_patches(repo, commit)? {
            pool.insert(patch.id.clone(), patch);
        }
        Ok(())
    };

    match operation {
        Operation::MovePatch {
            from_commit,
            to_commit,
            ..
        } => {
            extract_into(from_commit, &mut pool)?;
            extract_into(to_commit, &mut pool)?;
        }
        Operation::SplitCommit { source_commit, .. } => {
            extract_into(source_commit, &mut pool)?;
        }
        Operation::MergeCommits { commit_ids, .. } => {
            for commit in commit_ids {
                extract_into(commit, &mut pool)?;
            }
        }
        Operation::CreateCommit { .. } => {
            let head = repo.head()?;
            for commit in graph.id_and_descendants(&head) {
                extract_into(&commit, &mut pool)?;
            }
            // `id_and_descendants` only covers descendants of HEAD (likely empty for
            // HEAD itself); also sweep the full reachable history so a patch minted
            // from any ancestor commit resolves too.
            for info in repo.walk_history(&head, HISTORY_WALK_LIMIT)? {
                extract_into(&info.id, &mut pool)?;
            }
        }
    }
    Ok(pool)
}

/// The patch set `operation` would leave a given `commit` with, for preview purposes
/// only (no tree materialization, no conflict resolution side effects).
fn preview_patches_for(
    operation: &Operation,
    commit: &CommitId,
    pool: &HashMap<PatchId, Patch>,
) -> Result<Vec<Patch>, EngineError> {
    match operation {
        Operation::MovePatch {
            patch_id,
            from_commit,
            to_commit,
            ..
        } => {
            let mut patches: Vec<Patch> = pool
                .values()
                .filter(|p| &p.source_commit == commit)
                .cloned()
                .collect();
            if commit == from_commit {
                patches.retain(|p| &p.id != patch_id);
            }
            if commit == to_commit {
                if let Some(p) = pool.get(patch_id) {
                    if !patches.iter().any(|existing| existing.id == *patch_id) {
                        patches.push(p.clone());
                    }
                }
            }
            Ok(patches)
        }
        _ => Ok(pool.values().filter(|p| &p.source_commit == commit).cloned().collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommitInfo, Operation, PatchId as ModelPatchId};
    use crate::repository::FakeRepository;
    use chrono::Utc;
    use std::collections::HashMap as StdHashMap;
    use std::path::PathBuf;

    fn commit(id: &str, parent: Option<&str>) -> CommitInfo {
        CommitInfo {
            id: CommitId::new(id),
            message: format!("commit {id}"),
            author: "Author".into(),
            email: "author@example.com".into(),
            timestamp: Utc::now(),
            parent_ids: parent.into_iter().map(CommitId::new).collect(),
            files_changed: vec![],
        }
    }

    #[test]
    fn transaction_state_enum_has_expected_variants() {
        // Exercises that every spec §5 state is representable; the orchestration
        // itself is covered by the tempfile-backed integration tests.
        let states = [
            TransactionState::Idle,
            TransactionState::Planning,
            TransactionState::Preflighting,
            TransactionState::BackupTaken,
            TransactionState::Rewriting,
            TransactionState::Rebasing,
            TransactionState::Committing,
            TransactionState::Done,
            TransactionState::RollingBack,
        ];
        assert_eq!(states.len(), 9);
    }

    #[test]
    fn preview_operation_reports_affected_commits_without_mutating() {
        let mut repo = FakeRepository::new();
        repo.add_commit(commit("c1", None), StdHashMap::new());
        repo.add_commit(commit("c2", Some("c1")), StdHashMap::new());
        repo.create_ref("refs/heads/main", &CommitId::new("c2")).unwrap();

        let operation = Operation::MovePatch {
            patch_id: ModelPatchId::new(&CommitId::new("c2"), &PathBuf::from("f.txt")),
            from_commit: CommitId::new("c2"),
            to_commit: CommitId::new("c1"),
            position: crate::model::InsertPosition::AtBranchHead,
        };

        let rewriter = HistoryRewriter::new(&repo);
        let preview = rewriter.preview_operation(&operation).unwrap();
        assert_eq!(
            preview.affected_commits,
            vec![CommitId::new("c1"), CommitId::new("c2")]
        );
        // FakeRepository's tree_to_tree_diff returns empty text, so no patches are
        // actually extracted here; this asserts the call completes without error and
        // is a pure read (repo.clean / refs are untouched).
        assert!(repo.is_clean().unwrap());
    }
}
