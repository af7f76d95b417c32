//! Push-cycle dependency graph
//!
//! Built fresh for every push cycle from the records awaiting push, with
//! an edge for every foreign key between two pending records. Waves of
//! ready nodes (all dependencies already pushed) are handed out via
//! [`DependencyGraph::take_ready`]; a failed push removes the node and all
//! of its transitive dependents so unrelated branches keep going.

use std::collections::{HashMap, HashSet};

use crate::codec::PendingRecord;
use crate::model::{EntityKind, LocalId};

/// Graph node identity: one pending record
pub type NodeKey = (EntityKind, LocalId);

/// Dependency graph over one push cycle's pending records
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// dependency -> records waiting on it
    dependents: HashMap<NodeKey, HashSet<NodeKey>>,
    /// record -> dependencies not yet pushed
    blocked_on: HashMap<NodeKey, HashSet<NodeKey>>,
    /// nodes not yet handed out
    remaining: HashSet<NodeKey>,
    /// nodes handed out, awaiting completion or failure
    in_flight: HashSet<NodeKey>,
}

impl DependencyGraph {
    /// Build the graph. Only relations between two pending records become
    /// edges; a relation to an already-synced record does not block.
    #[must_use]
    pub fn build(pending: &[PendingRecord]) -> Self {
        let keys: HashSet<NodeKey> = pending
            .iter()
            .map(|record| (record.kind, record.local_id))
            .collect();

        let mut graph = Self {
            remaining: keys.clone(),
            ..Self::default()
        };
        for record in pending {
            let key = (record.kind, record.local_id);
            for relation in &record.relations {
                let dependency = (relation.kind, relation.local_id);
                if dependency != key && keys.contains(&dependency) {
                    graph.dependents.entry(dependency).or_default().insert(key);
                    graph.blocked_on.entry(key).or_default().insert(dependency);
                }
            }
        }
        graph
    }

    /// Nodes still in the cycle, handed out or not
    #[must_use]
    pub fn len(&self) -> usize {
        self.remaining.len() + self.in_flight.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand out the current wave: every node whose dependencies have all
    /// been pushed. Each node is handed out at most once.
    pub fn take_ready(&mut self) -> Vec<NodeKey> {
        let ready: Vec<NodeKey> = self
            .remaining
            .iter()
            .filter(|key| self.blocked_on.get(*key).is_none_or(HashSet::is_empty))
            .copied()
            .collect();
        for key in &ready {
            self.remaining.remove(key);
            self.in_flight.insert(*key);
        }
        ready
    }

    /// A handed-out node was pushed successfully; its dependents may
    /// become ready.
    pub fn complete(&mut self, key: NodeKey) {
        self.in_flight.remove(&key);
        self.blocked_on.remove(&key);
        if let Some(waiting) = self.dependents.remove(&key) {
            for dependent in waiting {
                if let Some(blockers) = self.blocked_on.get_mut(&dependent) {
                    blockers.remove(&key);
                }
            }
        }
    }

    /// A handed-out node failed; remove it and every transitive dependent
    /// from the cycle. Returns the removed set, the failed node first.
    pub fn fail(&mut self, key: NodeKey) -> Vec<NodeKey> {
        let mut removed = Vec::new();
        let mut seen = HashSet::from([key]);
        let mut worklist = vec![key];
        while let Some(node) = worklist.pop() {
            self.in_flight.remove(&node);
            self.remaining.remove(&node);
            self.blocked_on.remove(&node);
            removed.push(node);
            if let Some(waiting) = self.dependents.remove(&node) {
                for dependent in waiting {
                    if seen.insert(dependent) {
                        worklist.push(dependent);
                    }
                }
            }
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::model::Relation;

    fn record(kind: EntityKind, deps: &[(EntityKind, LocalId)]) -> PendingRecord {
        PendingRecord {
            kind,
            local_id: LocalId::new(),
            relations: deps
                .iter()
                .map(|&(kind, local_id)| Relation::new(kind, local_id))
                .collect(),
        }
    }

    /// workspace <- project <- task <- time entry, plus workspace <- client
    fn chain() -> (Vec<PendingRecord>, Vec<NodeKey>) {
        let workspace = record(EntityKind::Workspace, &[]);
        let client = record(EntityKind::Client, &[(EntityKind::Workspace, workspace.local_id)]);
        let project = record(EntityKind::Project, &[(EntityKind::Workspace, workspace.local_id)]);
        let task = record(
            EntityKind::Task,
            &[
                (EntityKind::Workspace, workspace.local_id),
                (EntityKind::Project, project.local_id),
            ],
        );
        let entry = record(
            EntityKind::TimeEntry,
            &[
                (EntityKind::Workspace, workspace.local_id),
                (EntityKind::Project, project.local_id),
                (EntityKind::Task, task.local_id),
            ],
        );
        let keys = vec![
            (workspace.kind, workspace.local_id),
            (client.kind, client.local_id),
            (project.kind, project.local_id),
            (task.kind, task.local_id),
            (entry.kind, entry.local_id),
        ];
        (vec![workspace, client, project, task, entry], keys)
    }

    #[test]
    fn dependencies_come_ready_before_dependents() {
        let (pending, keys) = chain();
        let mut graph = DependencyGraph::build(&pending);

        let wave = graph.take_ready();
        assert_eq!(wave, vec![keys[0]]);

        graph.complete(keys[0]);
        let mut wave = graph.take_ready();
        wave.sort();
        let mut expected = vec![keys[1], keys[2]];
        expected.sort();
        assert_eq!(wave, expected);
    }

    #[test]
    fn every_node_is_handed_out_exactly_once() {
        let (pending, _) = chain();
        let mut graph = DependencyGraph::build(&pending);

        let mut visited = Vec::new();
        while !graph.is_empty() {
            let wave = graph.take_ready();
            assert!(!wave.is_empty(), "graph stalled with nodes remaining");
            for key in wave {
                visited.push(key);
                graph.complete(key);
            }
        }
        assert_eq!(visited.len(), pending.len());
        let unique: HashSet<NodeKey> = visited.iter().copied().collect();
        assert_eq!(unique.len(), pending.len());
    }

    #[test]
    fn failure_removes_whole_branch_but_not_siblings() {
        let (pending, keys) = chain();
        let mut graph = DependencyGraph::build(&pending);

        let wave = graph.take_ready();
        assert_eq!(wave, vec![keys[0]]);
        graph.complete(keys[0]);

        // Project fails: task and time entry go with it, client survives
        let mut wave = graph.take_ready();
        wave.sort();
        assert!(wave.contains(&keys[2]));
        let mut removed = graph.fail(keys[2]);
        removed.sort();
        let mut expected = vec![keys[2], keys[3], keys[4]];
        expected.sort();
        assert_eq!(removed, expected);

        // Client was already handed out in the same wave; completing it
        // drains the graph.
        graph.complete(keys[1]);
        assert!(graph.is_empty());
    }

    #[test]
    fn relations_to_synced_records_do_not_block() {
        let synced_workspace = LocalId::new();
        let project = record(EntityKind::Project, &[(EntityKind::Workspace, synced_workspace)]);
        let mut graph = DependencyGraph::build(std::slice::from_ref(&project));

        let wave = graph.take_ready();
        assert_eq!(wave, vec![(EntityKind::Project, project.local_id)]);
    }

    #[test]
    fn empty_graph_yields_no_waves() {
        let mut graph = DependencyGraph::build(&[]);
        assert!(graph.is_empty());
        assert!(graph.take_ready().is_empty());
    }
}
