//! Dependency graph ordering for task registration batches.
//!
//! A batch of new tasks may reference parents that are already persisted or that
//! are submitted in the same batch. [`sort_new_tasks`] orders the batch so that
//! every in-batch parent comes before its children.
//!
//! **Note:** The [`Dag`] type is internal plumbing; callers only use the sorter.

use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::Hash;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;

use cohort_core::ComputeTaskKey;

use crate::error::{Error, Result};
use crate::task::NewComputeTask;

/// A directed graph ordered with Kahn's algorithm.
///
/// Nodes may be *blocked*: a blocked node carries a dependency that can never
/// be satisfied, so neither it nor anything downstream is ever emitted.
#[derive(Debug, Clone)]
pub(crate) struct Dag<T>
where
    T: Clone + Eq + Hash,
{
    graph: DiGraph<T, ()>,
    index_map: HashMap<T, NodeIndex>,
    /// Insertion order for deterministic tie-breaking in toposort.
    insertion_order: Vec<NodeIndex>,
    blocked: HashSet<NodeIndex>,
}

impl<T> Dag<T>
where
    T: Clone + Eq + Hash,
{
    pub(crate) fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index_map: HashMap::new(),
            insertion_order: Vec::new(),
            blocked: HashSet::new(),
        }
    }

    /// Adds a node, returning the existing index if it is already present.
    pub(crate) fn add_node(&mut self, value: T) -> NodeIndex {
        if let Some(&idx) = self.index_map.get(&value) {
            return idx;
        }
        let idx = self.graph.add_node(value.clone());
        self.index_map.insert(value, idx);
        self.insertion_order.push(idx);
        idx
    }

    pub(crate) fn index_of(&self, value: &T) -> Option<NodeIndex> {
        self.index_map.get(value).copied()
    }

    /// Adds a `from -> to` edge. Parallel edges are collapsed.
    pub(crate) fn add_edge(&mut self, from: NodeIndex, to: NodeIndex) -> Result<()> {
        for idx in [from, to] {
            self.graph.node_weight(idx).ok_or_else(|| {
                Error::internal(format!("graph node index {} not found", idx.index()))
            })?;
        }
        self.graph.update_edge(from, to, ());
        Ok(())
    }

    /// Marks a node as depending on something that will never resolve.
    pub(crate) fn block(&mut self, node: NodeIndex) {
        self.blocked.insert(node);
    }

    /// Returns the nodes in dependency order.
    ///
    /// Ready nodes are emitted in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnresolvedTasks`] with the number of nodes that could not
    /// be placed when the graph has a cycle or a blocked node.
    pub(crate) fn toposort(&self) -> Result<Vec<T>> {
        let node_count = self.graph.node_count();
        let mut in_degree: HashMap<NodeIndex, usize> = HashMap::with_capacity(node_count);
        for idx in self.graph.node_indices() {
            in_degree.insert(idx, usize::from(self.blocked.contains(&idx)));
        }
        for edge in self.graph.edge_references() {
            *in_degree.entry(edge.target()).or_insert(0) += 1;
        }

        let position: HashMap<NodeIndex, usize> = self
            .insertion_order
            .iter()
            .enumerate()
            .map(|(pos, idx)| (*idx, pos))
            .collect();

        let mut queue: VecDeque<NodeIndex> = self
            .insertion_order
            .iter()
            .filter(|idx| in_degree.get(idx).copied().unwrap_or(0) == 0)
            .copied()
            .collect();

        let mut result = Vec::with_capacity(node_count);
        while let Some(idx) = queue.pop_front() {
            let node = self
                .graph
                .node_weight(idx)
                .ok_or_else(|| Error::internal(format!("graph node index {} not found", idx.index())))?;
            result.push(node.clone());

            let mut neighbors: Vec<NodeIndex> = self
                .graph
                .neighbors_directed(idx, Direction::Outgoing)
                .collect();
            neighbors.sort_by_key(|n| position.get(n).copied().unwrap_or(usize::MAX));

            for neighbor in neighbors {
                if let Some(deg) = in_degree.get_mut(&neighbor) {
                    *deg = deg.saturating_sub(1);
                    if *deg == 0 {
                        queue.push_back(neighbor);
                    }
                }
            }
        }

        if result.len() != node_count {
            return Err(Error::UnresolvedTasks {
                count: node_count - result.len(),
            });
        }
        Ok(result)
    }
}

/// Orders a registration batch so that parents precede their children.
///
/// `persisted` holds the parent keys already known to exist in storage. A parent
/// that is neither persisted nor part of the batch can never be resolved. Tasks
/// whose parents are all resolved keep their submission order.
///
/// # Errors
///
/// Returns [`Error::UnresolvedTasks`] if the batch contains a cycle or references
/// an unknown parent, and [`Error::Conflict`] if a key appears twice in the batch.
pub fn sort_new_tasks(
    tasks: Vec<NewComputeTask>,
    persisted: &HashSet<ComputeTaskKey>,
) -> Result<Vec<NewComputeTask>> {
    let mut dag = Dag::new();
    for task in &tasks {
        let before = dag.graph.node_count();
        dag.add_node(task.key);
        if dag.graph.node_count() == before {
            return Err(Error::conflict(format!(
                "compute task {} appears twice in the batch",
                task.key
            )));
        }
    }

    for task in &tasks {
        let child = dag
            .index_of(&task.key)
            .ok_or_else(|| Error::internal(format!("task {} missing from graph", task.key)))?;
        for parent in task.parent_task_keys() {
            if let Some(parent_idx) = dag.index_of(&parent) {
                dag.add_edge(parent_idx, child)?;
            } else if !persisted.contains(&parent) {
                dag.block(child);
            }
        }
    }

    let order = dag.toposort()?;
    let mut by_key: HashMap<ComputeTaskKey, NewComputeTask> =
        tasks.into_iter().map(|task| (task.key, task)).collect();
    order
        .into_iter()
        .map(|key| {
            by_key
                .remove(&key)
                .ok_or_else(|| Error::internal(format!("task {key} missing after sort")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use cohort_core::{ComputePlanKey, FunctionKey};

    use super::*;
    use crate::task::ComputeTaskInput;

    fn task(key: ComputeTaskKey, parents: &[ComputeTaskKey]) -> NewComputeTask {
        NewComputeTask {
            key,
            function_key: FunctionKey::generate(),
            compute_plan_key: ComputePlanKey::generate(),
            worker: None,
            inputs: parents
                .iter()
                .map(|p| ComputeTaskInput::parent_output("model", *p, "model"))
                .collect(),
            outputs: BTreeMap::new(),
            metadata: BTreeMap::new(),
        }
    }

    fn keys(tasks: &[NewComputeTask]) -> Vec<ComputeTaskKey> {
        tasks.iter().map(|t| t.key).collect()
    }

    #[test]
    fn reversed_chain_is_reordered() {
        let (a, b, c) = (
            ComputeTaskKey::generate(),
            ComputeTaskKey::generate(),
            ComputeTaskKey::generate(),
        );
        let batch = vec![task(c, &[b]), task(b, &[a]), task(a, &[])];
        let sorted = sort_new_tasks(batch, &HashSet::new()).unwrap();
        assert_eq!(keys(&sorted), vec![a, b, c]);
    }

    #[test]
    fn independent_tasks_keep_submission_order() {
        let ks: Vec<_> = (0..4).map(|_| ComputeTaskKey::generate()).collect();
        let batch = ks.iter().map(|k| task(*k, &[])).collect();
        let sorted = sort_new_tasks(batch, &HashSet::new()).unwrap();
        assert_eq!(keys(&sorted), ks);
    }

    #[test]
    fn persisted_parents_count_as_resolved() {
        let stored = ComputeTaskKey::generate();
        let child = ComputeTaskKey::generate();
        let sorted =
            sort_new_tasks(vec![task(child, &[stored])], &HashSet::from([stored])).unwrap();
        assert_eq!(keys(&sorted), vec![child]);
    }

    #[test]
    fn unknown_parent_blocks_task_and_descendants() {
        let missing = ComputeTaskKey::generate();
        let a = ComputeTaskKey::generate();
        let b = ComputeTaskKey::generate();
        let ok = ComputeTaskKey::generate();
        let batch = vec![task(a, &[missing]), task(b, &[a]), task(ok, &[])];
        let err = sort_new_tasks(batch, &HashSet::new()).unwrap_err();
        assert!(matches!(err, Error::UnresolvedTasks { count: 2 }));
    }

    #[test]
    fn cycle_is_reported() {
        let a = ComputeTaskKey::generate();
        let b = ComputeTaskKey::generate();
        let batch = vec![task(a, &[b]), task(b, &[a])];
        let err = sort_new_tasks(batch, &HashSet::new()).unwrap_err();
        assert!(matches!(err, Error::UnresolvedTasks { count: 2 }));
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let a = ComputeTaskKey::generate();
        let err = sort_new_tasks(vec![task(a, &[a])], &HashSet::new()).unwrap_err();
        assert!(matches!(err, Error::UnresolvedTasks { count: 1 }));
    }

    #[test]
    fn duplicate_keys_conflict() {
        let a = ComputeTaskKey::generate();
        let err = sort_new_tasks(vec![task(a, &[]), task(a, &[])], &HashSet::new()).unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[test]
    fn diamond_orders_parents_first() {
        let (root, left, right, sink) = (
            ComputeTaskKey::generate(),
            ComputeTaskKey::generate(),
            ComputeTaskKey::generate(),
            ComputeTaskKey::generate(),
        );
        let batch = vec![
            task(sink, &[left, right]),
            task(right, &[root]),
            task(left, &[root]),
            task(root, &[]),
        ];
        let sorted = sort_new_tasks(batch, &HashSet::new()).unwrap();
        assert_eq!(keys(&sorted), vec![root, right, left, sink]);
    }
}
