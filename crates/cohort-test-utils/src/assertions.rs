//! Custom assertion helpers for integration tests.

use std::collections::HashSet;
use std::fmt::Debug;

use cohort_core::ComputeTaskKey;
use cohort_flow::error::{ErrorKind, Result};
use cohort_flow::events::{Event, METADATA_STATUS};
use cohort_flow::task::{ComputeTask, TaskStatus};

use crate::fixtures::TestLedger;

/// Asserts that a task is in `expected`.
///
/// # Panics
///
/// Panics if the task is missing or in another status.
pub fn assert_task_status(ledger: &TestLedger, key: &ComputeTaskKey, expected: TaskStatus) {
    let actual = ledger.status(key);
    assert_eq!(
        actual, expected,
        "Expected task {key} to be {expected}, but it was {actual}"
    );
}

/// Asserts that a result failed with the given error kind.
///
/// # Panics
///
/// Panics if the result succeeded or failed with another kind.
pub fn assert_error_kind<T: Debug>(result: Result<T>, expected: ErrorKind) {
    match result {
        Ok(value) => panic!("Expected {expected} error, but call succeeded with {value:?}"),
        Err(err) => assert_eq!(
            err.kind(),
            expected,
            "Expected {expected} error, but got {}: {err}",
            err.kind()
        ),
    }
}

/// Asserts that every task appears after the parents it references in the list.
///
/// # Panics
///
/// Panics if a task precedes one of its parents.
pub fn assert_parents_before_children(tasks: &[ComputeTask]) {
    let mut seen = HashSet::new();
    let listed: HashSet<ComputeTaskKey> = tasks.iter().map(|task| task.key).collect();
    for task in tasks {
        for parent in task.parent_task_keys() {
            if listed.contains(&parent) {
                assert!(
                    seen.contains(&parent),
                    "Task {} is listed before its parent {parent}",
                    task.key
                );
            }
        }
        seen.insert(task.key);
    }
}

/// Returns the status-update events recorded for a task, in order.
pub fn status_events(ledger: &TestLedger, key: &ComputeTaskKey) -> Vec<Event> {
    let asset_key = key.to_string();
    ledger
        .store()
        .events()
        .expect("read events")
        .into_iter()
        .filter(|event| event.asset_key == asset_key && event.metadata_value(METADATA_STATUS).is_some())
        .collect()
}
