//! Cascades across plans, functions and task graphs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeMap;

use cohort_core::{ComputePlanKey, FunctionKey, NewPermissions};
use cohort_flow::asset::AssetKind;
use cohort_flow::config::OrchestratorConfig;
use cohort_flow::error::ErrorKind;
use cohort_flow::events::{AssetType, EventKind};
use cohort_flow::function::{FunctionAction, FunctionInput, FunctionOutput, NewFunction};
use cohort_flow::plan::{NewComputePlan, PlanAction, PlanStatus};
use cohort_flow::store::{EventQueryFilter, Pagination, TaskQueryFilter};
use cohort_flow::task::{TaskAction, TaskStatus};
use cohort_test_utils::{
    OUTSIDER, OWNER, TestLedger, WORKER, assert_error_kind, assert_task_status, org,
};

#[test]
fn canceling_a_partly_canceled_plan_succeeds() {
    let ledger = TestLedger::new();
    let first = ledger.train_task(None);
    let second = ledger.train_task(None);
    let done = ledger.train_task(None);
    let (first_key, second_key, done_key) = (first.key, second.key, done.key);
    ledger.register(vec![first, second, done]).unwrap();
    ledger.complete(&done_key);
    ledger
        .orchestrator
        .apply_task_action(&org(OWNER), &first_key, TaskAction::Cancel, "not needed")
        .unwrap();

    ledger
        .orchestrator
        .apply_plan_action(&org(OWNER), &ledger.plan, PlanAction::Cancel, "abort")
        .unwrap();

    assert_task_status(&ledger, &first_key, TaskStatus::Canceled);
    assert_task_status(&ledger, &second_key, TaskStatus::Canceled);
    assert_task_status(&ledger, &done_key, TaskStatus::Done);
    assert_eq!(
        ledger.orchestrator.get_plan_status(&ledger.plan).unwrap(),
        PlanStatus::Canceled
    );
    assert!(!ledger.orchestrator.is_plan_running(&ledger.plan).unwrap());

    assert_error_kind(
        ledger
            .orchestrator
            .apply_plan_action(&org(OWNER), &ledger.plan, PlanAction::Cancel, "again"),
        ErrorKind::TerminatedAction,
    );
    assert_error_kind(
        ledger.register(vec![ledger.train_task(None)]),
        ErrorKind::TerminatedAction,
    );
}

#[test]
fn plan_cancel_walks_every_page_of_tasks() {
    let ledger = TestLedger::with_config(OrchestratorConfig {
        cascade_page_size: 4,
        ..OrchestratorConfig::default()
    });
    let tasks: Vec<_> = (0..10).map(|_| ledger.train_task(None)).collect();
    let keys: Vec<_> = tasks.iter().map(|task| task.key).collect();
    ledger.register(tasks).unwrap();

    ledger
        .orchestrator
        .apply_plan_action(&org(OWNER), &ledger.plan, PlanAction::Cancel, "abort")
        .unwrap();

    for key in &keys {
        assert_task_status(&ledger, key, TaskStatus::Canceled);
    }
}

#[test]
fn only_the_plan_owner_cancels() {
    let ledger = TestLedger::new();
    assert_error_kind(
        ledger
            .orchestrator
            .apply_plan_action(&org(OUTSIDER), &ledger.plan, PlanAction::Cancel, ""),
        ErrorKind::PermissionDenied,
    );
    assert!(ledger.orchestrator.get_plan(&ledger.plan).unwrap().cancelation_date.is_none());
}

#[test]
fn failure_fails_descendants_and_the_plan() {
    let ledger = TestLedger::new();
    let root = ledger.train_task(None);
    let child = ledger.train_task(Some(root.key));
    let grandchild = ledger.aggregate_task(&[child.key]);
    let unrelated = ledger.train_task(None);
    let (root_key, child_key, grandchild_key, unrelated_key) =
        (root.key, child.key, grandchild.key, unrelated.key);
    ledger
        .register(vec![grandchild, child, root, unrelated])
        .unwrap();

    ledger.start(&root_key);
    ledger
        .orchestrator
        .apply_task_action(&org(WORKER), &root_key, TaskAction::Fail, "crashed")
        .unwrap();

    assert_task_status(&ledger, &root_key, TaskStatus::Failed);
    assert_task_status(&ledger, &child_key, TaskStatus::Failed);
    assert_task_status(&ledger, &grandchild_key, TaskStatus::Failed);
    assert_task_status(&ledger, &unrelated_key, TaskStatus::Todo);
    assert_eq!(
        ledger.orchestrator.get_plan_status(&ledger.plan).unwrap(),
        PlanStatus::Failed
    );

    let failed = ledger
        .orchestrator
        .query_tasks(
            &Pagination::first(50),
            &TaskQueryFilter {
                status: Some(TaskStatus::Failed),
                ..TaskQueryFilter::default()
            },
        )
        .unwrap();
    assert_eq!(failed.items.len(), 3);
}

#[test]
fn function_lifecycle_propagates_to_its_tasks() {
    let ledger = TestLedger::new();
    let owner = org(OWNER);
    let late = FunctionKey::generate();
    ledger
        .orchestrator
        .register_function(
            &owner,
            NewFunction {
                key: late,
                name: "late aggregate".into(),
                new_permissions: NewPermissions::public(),
                inputs: BTreeMap::from([(
                    "models".to_string(),
                    FunctionInput {
                        kind: AssetKind::Model,
                        optional: false,
                        multiple: true,
                    },
                )]),
                outputs: BTreeMap::from([(
                    "model".to_string(),
                    FunctionOutput {
                        kind: AssetKind::Model,
                        multiple: false,
                    },
                )]),
                metadata: BTreeMap::new(),
            },
        )
        .unwrap();

    let parent = ledger.train_task(None);
    let parent_key = parent.key;
    let mut pending = ledger.aggregate_task(&[parent_key]);
    pending.function_key = late;
    let pending_key = pending.key;
    ledger.register(vec![parent, pending]).unwrap();
    ledger.complete(&parent_key);
    assert_task_status(&ledger, &pending_key, TaskStatus::Todo);

    ledger
        .orchestrator
        .apply_function_action(&owner, &late, FunctionAction::Cancel, "deprecated")
        .unwrap();
    assert_task_status(&ledger, &pending_key, TaskStatus::Canceled);

    assert_error_kind(
        ledger
            .orchestrator
            .apply_function_action(&owner, &late, FunctionAction::StartBuild, "retry"),
        ErrorKind::TerminatedAction,
    );
}

#[test]
fn failed_request_leaves_no_trace() {
    let ledger = TestLedger::new();
    let plan_key = ComputePlanKey::generate();
    let events_before = ledger.event_count();

    let mut valid = ledger.train_task(None);
    valid.compute_plan_key = ledger.plan;
    let mut foreign_plan = ledger.train_task(None);
    foreign_plan.compute_plan_key = plan_key;
    ledger
        .orchestrator
        .register_plan(
            &org(OUTSIDER),
            NewComputePlan {
                key: plan_key,
                name: "someone else's".into(),
                tag: String::new(),
                metadata: BTreeMap::new(),
            },
        )
        .unwrap();
    let events_after_plan = ledger.event_count();
    assert_eq!(events_after_plan, events_before + 1);

    let valid_key = valid.key;
    assert_error_kind(
        ledger.register(vec![valid, foreign_plan]),
        ErrorKind::PermissionDenied,
    );
    assert!(ledger.orchestrator.get_task(&valid_key).is_err());
    assert_eq!(ledger.event_count(), events_after_plan);
    assert!(!ledger.store().in_transaction().unwrap());
}

#[test]
fn every_mutation_is_recorded_as_an_event() {
    let ledger = TestLedger::new();
    let task = ledger.train_task(None);
    let key = task.key;
    ledger.register(vec![task]).unwrap();
    ledger.complete(&key);

    let page = ledger
        .orchestrator
        .query_events(
            &Pagination::first(50),
            &EventQueryFilter {
                asset_key: Some(key.to_string()),
                ..EventQueryFilter::default()
            },
        )
        .unwrap();
    let kinds: Vec<_> = page.items.iter().map(|event| event.event_kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::AssetCreated,
            EventKind::AssetUpdated,
            EventKind::AssetUpdated
        ]
    );
    assert!(page.items.iter().all(|e| e.asset_kind == AssetType::ComputeTask));
    assert!(page.items.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

    let models = ledger
        .orchestrator
        .query_events(
            &Pagination::first(50),
            &EventQueryFilter {
                asset_kind: Some(AssetType::Model),
                ..EventQueryFilter::default()
            },
        )
        .unwrap();
    assert_eq!(models.items.len(), 1);
}
