//! Deriving a rewrite plan — the ordered set of commits an `Operation` touches,
//! including descendants that must be rebased (spec §4.4, glossary "Rewrite plan").

use crate::commit_graph::CommitGraph;
use crate::model::{CommitId, CommitInfo, InsertPosition, Operation};

/// The ordered (oldest-first) set of commits a rewrite transaction must recreate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewritePlan {
    pub affected_commits: Vec<CommitId>,
}

/// Derive the affected-commit set for `operation`, per the four rules in spec §4.4.
pub fn derive_plan(graph: &CommitGraph, operation: &Operation) -> RewritePlan {
    let mut affected = match operation {
        Operation::MovePatch {
            from_commit,
            to_commit,
            ..
        } => {
            let older = older_of(graph, from_commit, to_commit);
            let mut set = vec![from_commit.clone(), to_commit.clone()];
            set.extend(graph.descendants(&older));
            set
        }
        Operation::SplitCommit { source_commit, .. } => {
            let mut set = vec![source_commit.clone()];
            set.extend(graph.descendants(source_commit));
            set
        }
        Operation::CreateCommit { position, .. } => match position {
            InsertPosition::Before(id) | InsertPosition::After(id) => {
                let mut set = vec![id.clone()];
                set.extend(graph.descendants(id));
                set
            }
            InsertPosition::AtBranchHead => Vec::new(),
        },
        Operation::MergeCommits { commit_ids, .. } => {
            let mut set = commit_ids.clone();
            if let Some(earliest) = earliest_of(graph, commit_ids) {
                set.extend(graph.descendants(&earliest));
            }
            set
        }
    };

    dedup_preserving_first(&mut affected);
    sort_topologically(graph, &mut affected);

    RewritePlan {
        affected_commits: affected,
    }
}

fn older_of(graph: &CommitGraph, a: &CommitId, b: &CommitId) -> CommitId {
    match (graph.get(a), graph.get(b)) {
        (Some(info_a), Some(info_b)) if info_a.timestamp <= info_b.timestamp => a.clone(),
        (Some(_), Some(_)) => b.clone(),
        _ => a.clone(),
    }
}

fn earliest_of(graph: &CommitGraph, ids: &[CommitId]) -> Option<CommitId> {
    ids.iter()
        .filter_map(|id| graph.get(id).map(|info| (id, info)))
        .min_by_key(|(_, info)| info.timestamp)
        .map(|(id, _): (&CommitId, &CommitInfo)| id.clone())
}

fn dedup_preserving_first(ids: &mut Vec<CommitId>) {
    let mut seen = std::collections::HashSet::new();
    ids.retain(|id| seen.insert(id.clone()));
}

/// Sort `ids` into true topological (ancestor-before-descendant) order via Kahn's
/// algorithm restricted to the parent/child edges among `ids` themselves. Commit
/// timestamps alone aren't reliable here — git's 1-second resolution means sibling
/// commits created in the same test run or fast rebase routinely tie — so ties are
/// only used to pick among candidates with no ordering constraint between them.
fn sort_topologically(graph: &CommitGraph, ids: &mut Vec<CommitId>) {
    use std::collections::{HashMap, HashSet};

    let members: HashSet<&CommitId> = ids.iter().collect();
    let mut in_degree: HashMap<CommitId, usize> = ids.iter().map(|id| (id.clone(), 0)).collect();
    for id in ids.iter() {
        for parent in graph.parents(id) {
            if members.contains(parent) {
                *in_degree.get_mut(id).unwrap() += 1;
            }
        }
    }

    let mut ready: Vec<CommitId> = ids
        .iter()
        .filter(|id| in_degree[*id] == 0)
        .cloned()
        .collect();
    sort_by_timestamp(graph, &mut ready);

    let mut ordered = Vec::with_capacity(ids.len());
    while !ready.is_empty() {
        let next = ready.remove(0);
        for child in graph.children(&next) {
            if let Some(degree) = in_degree.get_mut(child) {
                *degree -= 1;
                if *degree == 0 {
                    ready.push(child.clone());
                }
            }
        }
        sort_by_timestamp(graph, &mut ready);
        ordered.push(next);
    }

    // Any id the Kahn pass didn't reach (a parent outside `ids` was itself a member
    // but never inserted due to a graph gap) is appended in timestamp order as a
    // fallback, rather than silently dropped.
    for id in ids.iter() {
        if !ordered.contains(id) {
            ordered.push(id.clone());
        }
    }

    *ids = ordered;
}

fn sort_by_timestamp(graph: &CommitGraph, ids: &mut [CommitId]) {
    ids.sort_by_key(|id| graph.get(id).map(|info| info.timestamp));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn info(id: &str, parents: &[&str], minute: u32) -> CommitInfo {
        CommitInfo {
            id: CommitId::new(id),
            message: "m".into(),
            author: "a".into(),
            email: "a@example.com".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap(),
            parent_ids: parents.iter().map(|p| CommitId::new(*p)).collect(),
            files_changed: vec![],
        }
    }

    fn linear_graph() -> CommitGraph {
        let mut graph = CommitGraph::new();
        graph.insert(info("c1", &[], 0));
        graph.insert(info("c2", &["c1"], 1));
        graph.insert(info("c3", &["c2"], 2));
        graph
    }

    #[test]
    fn move_patch_includes_both_commits_and_descendants_of_older() {
        let graph = linear_graph();
        let op = Operation::MovePatch {
            patch_id: crate::model::PatchId::new(&CommitId::new("c2"), std::path::Path::new("f")),
            from_commit: CommitId::new("c2"),
            to_commit: CommitId::new("c1"),
            position: InsertPosition::AtBranchHead,
        };
        let plan = derive_plan(&graph, &op);
        assert_eq!(
            plan.affected_commits,
            vec![CommitId::new("c1"), CommitId::new("c2"), CommitId::new("c3")]
        );
    }

    #[test]
    fn split_commit_includes_source_and_descendants() {
        let graph = linear_graph();
        let op = Operation::SplitCommit {
            source_commit: CommitId::new("c1"),
            new_commits: vec![],
        };
        let plan = derive_plan(&graph, &op);
        assert_eq!(
            plan.affected_commits,
            vec![CommitId::new("c1"), CommitId::new("c2"), CommitId::new("c3")]
        );
    }

    #[test]
    fn tied_timestamps_still_sort_parent_before_child() {
        // git's 1-second commit resolution means a fast test run can produce
        // identical timestamps; the plan must still respect actual parentage.
        let mut graph = CommitGraph::new();
        graph.insert(info("c1", &[], 0));
        graph.insert(info("c2", &["c1"], 0));
        graph.insert(info("c3", &["c2"], 0));

        let op = Operation::MovePatch {
            patch_id: crate::model::PatchId::new(&CommitId::new("c2"), std::path::Path::new("f")),
            from_commit: CommitId::new("c2"),
            to_commit: CommitId::new("c1"),
            position: InsertPosition::AtBranchHead,
        };
        let plan = derive_plan(&graph, &op);
        assert_eq!(
            plan.affected_commits,
            vec![CommitId::new("c1"), CommitId::new("c2"), CommitId::new("c3")]
        );
    }

    #[test]
    fn merge_commits_includes_descendants_of_earliest() {
        let graph = linear_graph();
        let op = Operation::MergeCommits {
            commit_ids: vec![CommitId::new("c2"), CommitId::new("c1")],
            message: "squash".into(),
        };
        let plan = derive_plan(&graph, &op);
        assert_eq!(
            plan.affected_commits,
            vec![CommitId::new("c1"), CommitId::new("c2"), CommitId::new("c3")]
        );
    }
}
