//! In-memory commit graph: owned `CommitInfo` values, edges as id references only
//! (spec §9: "no back-pointers, no cycles — the DAG is acyclic by construction").

use std::collections::HashMap;

use crate::model::{CommitId, CommitInfo};

/// A DAG of commits, built from a `walk_history` call against a `Repository`.
#[derive(Debug, Default, Clone)]
pub struct CommitGraph {
    commits: HashMap<CommitId, CommitInfo>,
    children: HashMap<CommitId, Vec<CommitId>>,
}

impl CommitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a commit, wiring up the reverse (children) edges from its parents.
    pub fn insert(&mut self, info: CommitInfo) {
        let id = info.id.clone();
        for parent in &info.parent_ids {
            self.children.entry(parent.clone()).or_default().push(id.clone());
        }
        self.commits.insert(id, info);
    }

    pub fn get(&self, id: &CommitId) -> Option<&CommitInfo> {
        self.commits.get(id)
    }

    pub fn contains(&self, id: &CommitId) -> bool {
        self.commits.contains_key(id)
    }

    pub fn parents(&self, id: &CommitId) -> &[CommitId] {
        self.commits
            .get(id)
            .map(|c| c.parent_ids.as_slice())
            .unwrap_or(&[])
    }

    pub fn children(&self, id: &CommitId) -> &[CommitId] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All descendants of `id` (exclusive), in breadth-first order, following the
    /// first-recorded child edges. Used to derive a rewrite plan's affected set.
    pub fn descendants(&self, id: &CommitId) -> Vec<CommitId> {
        let mut seen = std::collections::HashSet::new();
        let mut queue: Vec<CommitId> = self.children(id).to_vec();
        let mut result = Vec::new();
        while let Some(next) = queue.pop() {
            if seen.insert(next.clone()) {
                queue.extend(self.children(&next).iter().cloned());
                result.push(next);
            }
        }
        result
    }

    /// `id` and all its descendants, oldest-relationship-preserving order not
    /// guaranteed; callers needing topological order should sort by commit timestamp
    /// or walk the graph themselves.
    pub fn id_and_descendants(&self, id: &CommitId) -> Vec<CommitId> {
        let mut result = vec![id.clone()];
        result.extend(self.descendants(id));
        result
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn info(id: &str, parents: &[&str]) -> CommitInfo {
        CommitInfo {
            id: CommitId::new(id),
            message: format!("commit {id}"),
            author: "Author".to_string(),
            email: "author@example.com".to_string(),
            timestamp: Utc::now(),
            parent_ids: parents.iter().map(|p| CommitId::new(*p)).collect(),
            files_changed: vec![],
        }
    }

    #[test]
    fn descendants_follow_linear_chain() {
        let mut graph = CommitGraph::new();
        graph.insert(info("c1", &[]));
        graph.insert(info("c2", &["c1"]));
        graph.insert(info("c3", &["c2"]));

        let mut desc = graph.descendants(&CommitId::new("c1"));
        desc.sort();
        assert_eq!(desc, vec![CommitId::new("c2"), CommitId::new("c3")]);
    }

    #[test]
    fn leaf_has_no_descendants() {
        let mut graph = CommitGraph::new();
        graph.insert(info("c1", &[]));
        assert!(graph.descendants(&CommitId::new("c1")).is_empty());
    }

    #[test]
    fn merge_commit_has_two_parents() {
        let mut graph = CommitGraph::new();
        graph.insert(info("c1", &[]));
        graph.insert(info("c2", &[]));
        graph.insert(info("m", &["c1", "c2"]));
        assert_eq!(graph.parents(&CommitId::new("m")).len(), 2);
        assert_eq!(graph.children(&CommitId::new("c1")), &[CommitId::new("m")]);
    }
}
