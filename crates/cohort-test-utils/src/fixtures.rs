//! Pre-built test fixtures for common test scenarios.
//!
//! Provides a seeded ledger and factory methods to create registration requests
//! with sensible defaults.

use std::collections::BTreeMap;

use chrono::{TimeZone, Utc};
use cohort_core::{
    AssetKey, ComputePlanKey, ComputeTaskKey, FunctionKey, NewPermissions, OrganizationId,
    Permission, Permissions,
};
use cohort_flow::Orchestrator;
use cohort_flow::asset::{
    AssetKind, ComputeTaskOutputAsset, DataManager, DataSample, NewOutputAsset,
    NewTaskOutputAsset,
};
use cohort_flow::config::OrchestratorConfig;
use cohort_flow::context::SteppedClock;
use cohort_flow::error::Result;
use cohort_flow::function::{FunctionAction, FunctionInput, FunctionOutput, NewFunction};
use cohort_flow::plan::NewComputePlan;
use cohort_flow::store::memory::InMemoryStore;
use cohort_flow::task::{
    ComputeTask, ComputeTaskInput, NewComputeTask, NewComputeTaskOutput, TaskAction, TaskStatus,
};

/// Organization owning the plan and the functions.
pub const OWNER: &str = "org-owner";
/// Organization owning the dataset, and therefore running training tasks.
pub const WORKER: &str = "org-worker";
/// Organization with no role in the seeded plan.
pub const OUTSIDER: &str = "org-outsider";

/// Builds an organization id.
pub fn org(id: &str) -> OrganizationId {
    OrganizationId::new(id).expect("valid organization id")
}

/// An orchestrator over an in-memory store, seeded for task registration.
///
/// The seed contains three organizations, a public data manager owned by
/// [`WORKER`] with two data samples, a compute plan owned by [`OWNER`], and three
/// READY functions: `train`, `aggregate` and `evaluate`.
pub struct TestLedger {
    /// The orchestrator under test.
    pub orchestrator: Orchestrator<InMemoryStore>,
    /// The seeded compute plan.
    pub plan: ComputePlanKey,
    /// Training function: data manager + samples + optional model in, model out.
    pub train: FunctionKey,
    /// Aggregation function: many models in, one model out.
    pub aggregate: FunctionKey,
    /// Evaluation function: data manager + samples + model in, performance out.
    pub evaluate: FunctionKey,
    /// The seeded data manager.
    pub data_manager: AssetKey,
    /// Samples linked to the data manager.
    pub samples: Vec<AssetKey>,
}

impl TestLedger {
    /// Creates a seeded ledger with the default configuration.
    pub fn new() -> Self {
        Self::with_config(OrchestratorConfig::default())
    }

    /// Creates a seeded ledger with a custom configuration.
    pub fn with_config(config: OrchestratorConfig) -> Self {
        let store = InMemoryStore::new();
        for id in [OWNER, WORKER, OUTSIDER] {
            store.add_organization(org(id)).expect("seed organization");
        }
        let seeded_at = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();

        let data_manager = AssetKey::generate();
        store
            .add_data_manager(DataManager {
                key: data_manager,
                name: "hospital records".into(),
                owner: org(WORKER),
                permissions: Permissions::public(),
                logs_permission: Permission::owner_only(&org(WORKER)),
                creation_date: seeded_at,
            })
            .expect("seed data manager");
        let samples: Vec<AssetKey> = (0..2).map(|_| AssetKey::generate()).collect();
        for sample in &samples {
            store
                .add_data_sample(DataSample {
                    key: *sample,
                    owner: org(WORKER),
                    data_manager_keys: vec![data_manager],
                    creation_date: seeded_at,
                })
                .expect("seed data sample");
        }

        let orchestrator = Orchestrator::with_config(
            store,
            SteppedClock::new(Utc.with_ymd_and_hms(2025, 1, 2, 0, 0, 0).unwrap()),
            config,
        );
        let owner = org(OWNER);

        let plan = ComputePlanKey::generate();
        orchestrator
            .register_plan(
                &owner,
                NewComputePlan {
                    key: plan,
                    name: "federated training".into(),
                    tag: "fixture".into(),
                    metadata: BTreeMap::new(),
                },
            )
            .expect("seed plan");

        let train = Self::seed_function(
            &orchestrator,
            "train",
            [
                ("opener", input(AssetKind::DataManager, false, false)),
                ("datasamples", input(AssetKind::DataSample, false, true)),
                ("model", input(AssetKind::Model, true, false)),
            ],
            [("model", output(AssetKind::Model))],
        );
        let aggregate = Self::seed_function(
            &orchestrator,
            "aggregate",
            [("models", input(AssetKind::Model, false, true))],
            [("model", output(AssetKind::Model))],
        );
        let evaluate = Self::seed_function(
            &orchestrator,
            "evaluate",
            [
                ("opener", input(AssetKind::DataManager, false, false)),
                ("datasamples", input(AssetKind::DataSample, false, true)),
                ("model", input(AssetKind::Model, false, false)),
            ],
            [("performance", output(AssetKind::Performance))],
        );

        Self {
            orchestrator,
            plan,
            train,
            aggregate,
            evaluate,
            data_manager,
            samples,
        }
    }

    fn seed_function<const I: usize, const O: usize>(
        orchestrator: &Orchestrator<InMemoryStore>,
        name: &str,
        inputs: [(&str, FunctionInput); I],
        outputs: [(&str, FunctionOutput); O],
    ) -> FunctionKey {
        let owner = org(OWNER);
        let key = FunctionKey::generate();
        orchestrator
            .register_function(
                &owner,
                NewFunction {
                    key,
                    name: name.into(),
                    new_permissions: NewPermissions::public(),
                    inputs: inputs
                        .into_iter()
                        .map(|(id, input)| (id.to_string(), input))
                        .collect(),
                    outputs: outputs
                        .into_iter()
                        .map(|(id, output)| (id.to_string(), output))
                        .collect(),
                    metadata: BTreeMap::new(),
                },
            )
            .expect("seed function");
        for action in [FunctionAction::StartBuild, FunctionAction::MarkReady] {
            orchestrator
                .apply_function_action(&owner, &key, action, "fixture build")
                .expect("build seed function");
        }
        key
    }

    /// Returns the backing store.
    pub fn store(&self) -> &InMemoryStore {
        self.orchestrator.store()
    }

    /// A training task on the seeded dataset, optionally fine-tuning a parent's model.
    pub fn train_task(&self, parent: Option<ComputeTaskKey>) -> NewComputeTask {
        let mut inputs = self.dataset_inputs();
        if let Some(parent) = parent {
            inputs.push(ComputeTaskInput::parent_output("model", parent, "model"));
        }
        self.new_task(self.train, None, inputs, "model")
    }

    /// An aggregation of the parents' models, run by [`OWNER`].
    pub fn aggregate_task(&self, parents: &[ComputeTaskKey]) -> NewComputeTask {
        let inputs = parents
            .iter()
            .map(|parent| ComputeTaskInput::parent_output("models", *parent, "model"))
            .collect();
        self.new_task(self.aggregate, Some(org(OWNER)), inputs, "model")
    }

    /// An evaluation of a parent's model on the seeded dataset.
    pub fn evaluate_task(&self, parent: ComputeTaskKey) -> NewComputeTask {
        let mut inputs = self.dataset_inputs();
        inputs.push(ComputeTaskInput::parent_output("model", parent, "model"));
        self.new_task(self.evaluate, None, inputs, "performance")
    }

    /// Marks the output of a new task transient.
    pub fn transient(mut task: NewComputeTask) -> NewComputeTask {
        for output in task.outputs.values_mut() {
            output.transient = true;
        }
        task
    }

    fn dataset_inputs(&self) -> Vec<ComputeTaskInput> {
        let mut inputs = vec![ComputeTaskInput::asset("opener", self.data_manager)];
        inputs.extend(
            self.samples
                .iter()
                .map(|sample| ComputeTaskInput::asset("datasamples", *sample)),
        );
        inputs
    }

    fn new_task(
        &self,
        function_key: FunctionKey,
        worker: Option<OrganizationId>,
        inputs: Vec<ComputeTaskInput>,
        output: &str,
    ) -> NewComputeTask {
        NewComputeTask {
            key: ComputeTaskKey::generate(),
            function_key,
            compute_plan_key: self.plan,
            worker,
            inputs,
            outputs: BTreeMap::from([(
                output.to_string(),
                NewComputeTaskOutput {
                    permissions: NewPermissions::public(),
                    transient: false,
                },
            )]),
            metadata: BTreeMap::new(),
        }
    }

    /// Registers tasks as [`OWNER`].
    pub fn register(&self, tasks: Vec<NewComputeTask>) -> Result<Vec<ComputeTask>> {
        self.orchestrator.register_tasks(&org(OWNER), tasks)
    }

    /// Returns a task.
    pub fn task(&self, key: &ComputeTaskKey) -> ComputeTask {
        self.orchestrator.get_task(key).expect("task exists")
    }

    /// Returns the status of a task.
    pub fn status(&self, key: &ComputeTaskKey) -> TaskStatus {
        self.task(key).status
    }

    /// Starts a task as its worker.
    pub fn start(&self, key: &ComputeTaskKey) {
        let worker = self.task(key).worker;
        self.orchestrator
            .apply_task_action(&worker, key, TaskAction::Start, "started")
            .expect("start task");
    }

    /// Starts a task and registers one asset per declared output, completing it.
    pub fn complete(&self, key: &ComputeTaskKey) -> Vec<ComputeTaskOutputAsset> {
        self.start(key);
        let task = self.task(key);
        let outputs = task
            .outputs
            .keys()
            .map(|identifier| NewTaskOutputAsset {
                identifier: identifier.clone(),
                asset: if identifier == "performance" {
                    NewOutputAsset::Performance { value: 0.87 }
                } else {
                    let model = AssetKey::generate();
                    NewOutputAsset::Model {
                        key: model,
                        address: format!("s3://models/{model}"),
                    }
                },
            })
            .collect();
        self.orchestrator
            .register_task_outputs(&task.worker, key, outputs)
            .expect("register outputs")
    }

    /// Number of events recorded so far.
    pub fn event_count(&self) -> usize {
        self.store().event_count().expect("count events")
    }
}

impl Default for TestLedger {
    fn default() -> Self {
        Self::new()
    }
}

fn input(kind: AssetKind, optional: bool, multiple: bool) -> FunctionInput {
    FunctionInput {
        kind,
        optional,
        multiple,
    }
}

fn output(kind: AssetKind) -> FunctionOutput {
    FunctionOutput {
        kind,
        multiple: false,
    }
}
