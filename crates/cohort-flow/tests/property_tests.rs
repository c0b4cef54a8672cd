//! Property-based tests for cohort-flow invariants.
//!
//! These tests use proptest to verify invariants hold across
//! randomly generated task graphs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::{BTreeMap, HashMap, HashSet};

use proptest::prelude::*;

use cohort_core::{ComputePlanKey, ComputeTaskKey, FunctionKey};
use cohort_flow::error::Error;
use cohort_flow::plan::{PlanStatus, TaskCounts, plan_status};
use cohort_flow::sort_new_tasks;
use cohort_flow::task::{
    ComputeTaskInput, NewComputeTask, TaskStatus, initial_status, rank_from_parents,
};

fn new_task(key: ComputeTaskKey, parents: &[ComputeTaskKey]) -> NewComputeTask {
    NewComputeTask {
        key,
        function_key: FunctionKey::generate(),
        compute_plan_key: ComputePlanKey::generate(),
        worker: None,
        inputs: parents
            .iter()
            .map(|parent| ComputeTaskInput::parent_output("models", *parent, "model"))
            .collect(),
        outputs: BTreeMap::new(),
        metadata: BTreeMap::new(),
    }
}

/// Generates an acyclic graph as, for each node, indices of earlier nodes it
/// depends on, together with a submission order.
fn arb_dag() -> impl Strategy<Value = (Vec<Vec<usize>>, Vec<usize>)> {
    (1usize..24).prop_flat_map(|n| {
        let parents = (0..n)
            .map(|i| {
                if i == 0 {
                    Just(Vec::new()).boxed()
                } else {
                    prop::collection::vec(0..i, 0..3).boxed()
                }
            })
            .collect::<Vec<_>>();
        let order = Just((0..n).collect::<Vec<_>>()).prop_shuffle();
        (parents, order)
    })
}

/// Builds the batch in submission order and returns it with the node keys.
fn build_batch(parents: &[Vec<usize>], order: &[usize]) -> (Vec<NewComputeTask>, Vec<ComputeTaskKey>) {
    let keys: Vec<ComputeTaskKey> = parents.iter().map(|_| ComputeTaskKey::generate()).collect();
    let batch = order
        .iter()
        .map(|&node| {
            let parent_keys: Vec<_> = parents[node].iter().map(|&p| keys[p]).collect();
            new_task(keys[node], &parent_keys)
        })
        .collect();
    (batch, keys)
}

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(TaskStatus::ALL.to_vec())
}

proptest! {
    /// INVARIANT: every parent in the batch precedes its children.
    #[test]
    fn sorted_batch_places_parents_first((parents, order) in arb_dag()) {
        let (batch, _) = build_batch(&parents, &order);
        let submitted: HashSet<_> = batch.iter().map(|task| task.key).collect();

        let sorted = sort_new_tasks(batch, &HashSet::new()).unwrap();

        prop_assert_eq!(sorted.len(), submitted.len());
        let mut seen = HashSet::new();
        for task in &sorted {
            for parent in task.parent_task_keys() {
                prop_assert!(seen.contains(&parent), "parent {} after child {}", parent, task.key);
            }
            seen.insert(task.key);
        }
        prop_assert_eq!(seen, submitted);
    }

    /// INVARIANT: rank is 0 for roots and one above the deepest parent otherwise.
    #[test]
    fn rank_is_longest_path_from_a_root((parents, order) in arb_dag()) {
        let (batch, keys) = build_batch(&parents, &order);
        let sorted = sort_new_tasks(batch, &HashSet::new()).unwrap();

        let mut ranks: HashMap<ComputeTaskKey, u32> = HashMap::new();
        for task in &sorted {
            let rank = rank_from_parents(task.parent_task_keys().iter().map(|p| ranks[p]));
            ranks.insert(task.key, rank);
        }

        let mut depth = vec![0u32; parents.len()];
        for node in 0..parents.len() {
            depth[node] = parents[node].iter().map(|&p| depth[p] + 1).max().unwrap_or(0);
        }
        for (node, key) in keys.iter().enumerate() {
            prop_assert_eq!(ranks[key], depth[node]);
        }
    }

    /// INVARIANT: closing a cycle makes the sort fail and report the stuck tasks.
    #[test]
    fn cycles_are_reported((parents, order) in arb_dag().prop_filter("need two nodes", |(p, _)| p.len() >= 2)) {
        let mut parents = parents;
        let last = parents.len() - 1;
        parents[0].push(last);
        // Make sure node 0 reaches `last` so the added edge closes a cycle.
        for node in 1..=last {
            if !parents[node].contains(&(node - 1)) {
                parents[node].push(node - 1);
            }
        }
        let (batch, _) = build_batch(&parents, &order);

        let err = sort_new_tasks(batch, &HashSet::new()).unwrap_err();
        match err {
            Error::UnresolvedTasks { count } => prop_assert_eq!(count, parents.len()),
            other => prop_assert!(false, "unexpected error: {other}"),
        }
    }

    /// INVARIANT: a task is only created ready when every parent is done, and is
    /// created canceled under a canceled or failed parent.
    #[test]
    fn initial_status_follows_parents(statuses in prop::collection::vec(arb_status(), 0..6)) {
        let expected = if statuses
            .iter()
            .any(|s| matches!(s, TaskStatus::Canceled | TaskStatus::Failed))
        {
            TaskStatus::Canceled
        } else if statuses.iter().all(|s| *s == TaskStatus::Done) {
            TaskStatus::Todo
        } else {
            TaskStatus::Waiting
        };
        prop_assert_eq!(initial_status(&statuses), expected);
    }

    /// INVARIANT: the derived plan status follows the precedence rules.
    #[test]
    fn plan_status_precedence(statuses in prop::collection::vec(arb_status(), 0..15), canceled in any::<bool>()) {
        let counts = TaskCounts::from_statuses(statuses.iter().copied());
        let cancelation = canceled.then(chrono::Utc::now);
        let status = plan_status(&counts, cancelation);

        let all = |s: TaskStatus| statuses.iter().all(|x| *x == s);
        let any = |s: TaskStatus| statuses.contains(&s);
        let expected = if statuses.is_empty() {
            PlanStatus::Empty
        } else if all(TaskStatus::Done) {
            PlanStatus::Done
        } else if any(TaskStatus::Canceled) || canceled {
            PlanStatus::Canceled
        } else if any(TaskStatus::Failed) {
            PlanStatus::Failed
        } else if all(TaskStatus::Waiting) {
            PlanStatus::Waiting
        } else if any(TaskStatus::Doing) {
            PlanStatus::Doing
        } else {
            PlanStatus::Todo
        };
        prop_assert_eq!(status, expected);
    }
}
