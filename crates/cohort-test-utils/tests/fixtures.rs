//! Sanity checks for the shared fixtures.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use cohort_flow::function::FunctionStatus;
use cohort_flow::plan::PlanStatus;
use cohort_flow::task::TaskStatus;
use cohort_test_utils::{
    OWNER, TestLedger, WORKER, assert_parents_before_children, assert_task_status, org,
};

#[test]
fn seeded_functions_are_ready() {
    let ledger = TestLedger::new();
    for key in [ledger.train, ledger.aggregate, ledger.evaluate] {
        let function = ledger.orchestrator.get_function(&key).unwrap();
        assert_eq!(function.status, FunctionStatus::Ready);
        assert_eq!(function.owner, org(OWNER));
    }
    assert_eq!(
        ledger.orchestrator.get_plan_status(&ledger.plan).unwrap(),
        PlanStatus::Empty
    );
}

#[test]
fn training_chain_runs_to_completion() {
    let ledger = TestLedger::new();
    let root = ledger.train_task(None);
    let child = ledger.train_task(Some(root.key));
    let (root_key, child_key) = (root.key, child.key);

    let created = ledger.register(vec![child, root]).unwrap();
    assert_parents_before_children(&created);
    assert_eq!(ledger.task(&root_key).worker, org(WORKER));

    ledger.complete(&root_key);
    assert_task_status(&ledger, &root_key, TaskStatus::Done);
    assert_task_status(&ledger, &child_key, TaskStatus::Todo);

    ledger.complete(&child_key);
    assert_eq!(
        ledger.orchestrator.get_plan_status(&ledger.plan).unwrap(),
        PlanStatus::Done
    );
}
