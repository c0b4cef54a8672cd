//! Transactional entry point of the orchestration core.
//!
//! Every mutating call runs as one request: the transaction time is read once, a
//! fresh [`RequestContext`] is opened, a store transaction begins, the service
//! runs with its cascades inline, and the transaction commits on success or
//! rolls back on error. Read-only queries go straight to the store.

use std::cell::Cell;

use cohort_core::{ComputePlanKey, ComputeTaskKey, FunctionKey, OrganizationId, request_span};

use crate::asset::{ComputeTaskOutputAsset, NewTaskOutputAsset};
use crate::config::OrchestratorConfig;
use crate::context::{RequestContext, TransactionClock};
use crate::error::{Error, Result};
use crate::events::Event;
use crate::function::{Function, FunctionAction, NewFunction};
use crate::metrics::{FlowMetrics, TimingGuard};
use crate::orchestration::{ServiceDeps, Stores};
use crate::plan::{ComputePlan, NewComputePlan, PlanAction, PlanStatus};
use crate::store::{
    EventQueryFilter, LedgerStore, Page, Pagination, PlanQueryFilter, TaskQueryFilter,
};
use crate::task::{ComputeTask, NewComputeTask, TaskAction};

/// Transactional façade over the orchestration services.
pub struct Orchestrator<S> {
    store: S,
    clock: Box<dyn TransactionClock>,
    config: OrchestratorConfig,
    metrics: FlowMetrics,
}

impl<S> std::fmt::Debug for Orchestrator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl<S: LedgerStore> Orchestrator<S> {
    /// Creates an orchestrator with the default configuration.
    pub fn new(store: S, clock: impl TransactionClock + 'static) -> Self {
        Self::with_config(store, clock, OrchestratorConfig::default())
    }

    /// Creates an orchestrator with an explicit configuration.
    pub fn with_config(
        store: S,
        clock: impl TransactionClock + 'static,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            clock: Box::new(clock),
            config,
            metrics: FlowMetrics::new(),
        }
    }

    /// Returns the backing store.
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Returns the active configuration.
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Runs `op` as one transaction.
    fn execute<T>(
        &self,
        operation: &'static str,
        requester: &OrganizationId,
        op: impl FnOnce(ServiceDeps<'_>, &mut RequestContext) -> Result<T>,
    ) -> Result<T> {
        let outcome = Cell::new("error");
        let _timer = TimingGuard::new(|elapsed| {
            self.metrics
                .observe_request_duration(operation, outcome.get(), elapsed);
        });
        let _span = request_span(operation, requester.as_str()).entered();

        let mut ctx = RequestContext::new(self.clock.transaction_time());
        let deps = ServiceDeps::new(Stores::from_ledger(&self.store), self.config);

        self.store.begin()?;
        match op(deps, &mut ctx) {
            Ok(value) => {
                self.store.commit()?;
                outcome.set("ok");
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(kind = %err.kind(), error = %err, "request failed, rolling back");
                if let Err(rollback_err) = self.store.rollback() {
                    tracing::error!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Registers a compute plan.
    ///
    /// # Errors
    ///
    /// See [`ComputePlanService::register_plan`](crate::orchestration::ComputePlanService::register_plan).
    pub fn register_plan(
        &self,
        requester: &OrganizationId,
        new_plan: NewComputePlan,
    ) -> Result<ComputePlan> {
        self.execute("register_plan", requester, |deps, ctx| {
            deps.plans().register_plan(ctx, requester, new_plan)
        })
    }

    /// Applies an action to a compute plan.
    ///
    /// # Errors
    ///
    /// See [`ComputePlanService::apply_plan_action`](crate::orchestration::ComputePlanService::apply_plan_action).
    pub fn apply_plan_action(
        &self,
        requester: &OrganizationId,
        key: &ComputePlanKey,
        action: PlanAction,
        reason: &str,
    ) -> Result<()> {
        self.execute("apply_plan_action", requester, |deps, ctx| {
            deps.plans()
                .apply_plan_action(ctx, requester, key, action, reason)
        })
    }

    /// Renames a compute plan.
    ///
    /// # Errors
    ///
    /// See [`ComputePlanService::update_plan`](crate::orchestration::ComputePlanService::update_plan).
    pub fn update_plan(
        &self,
        requester: &OrganizationId,
        key: &ComputePlanKey,
        name: &str,
    ) -> Result<ComputePlan> {
        self.execute("update_plan", requester, |deps, ctx| {
            deps.plans().update_plan(ctx, requester, key, name)
        })
    }

    /// Registers a function.
    ///
    /// # Errors
    ///
    /// See [`FunctionService::register_function`](crate::orchestration::FunctionService::register_function).
    pub fn register_function(
        &self,
        requester: &OrganizationId,
        new_function: NewFunction,
    ) -> Result<Function> {
        self.execute("register_function", requester, |deps, ctx| {
            deps.functions()
                .register_function(ctx, requester, new_function)
        })
    }

    /// Applies a build-lifecycle action to a function.
    ///
    /// # Errors
    ///
    /// See [`FunctionService::apply_function_action`](crate::orchestration::FunctionService::apply_function_action).
    pub fn apply_function_action(
        &self,
        requester: &OrganizationId,
        key: &FunctionKey,
        action: FunctionAction,
        reason: &str,
    ) -> Result<()> {
        self.execute("apply_function_action", requester, |deps, ctx| {
            deps.functions()
                .apply_function_action(ctx, requester, key, action, reason)
        })
    }

    /// Registers a batch of compute tasks.
    ///
    /// # Errors
    ///
    /// See [`ComputeTaskService::register_tasks`](crate::orchestration::ComputeTaskService::register_tasks).
    pub fn register_tasks(
        &self,
        requester: &OrganizationId,
        new_tasks: Vec<NewComputeTask>,
    ) -> Result<Vec<ComputeTask>> {
        self.execute("register_tasks", requester, |deps, ctx| {
            deps.tasks().register_tasks(ctx, requester, new_tasks)
        })
    }

    /// Applies an action to a compute task.
    ///
    /// # Errors
    ///
    /// See [`ComputeTaskService::apply_task_action`](crate::orchestration::ComputeTaskService::apply_task_action).
    pub fn apply_task_action(
        &self,
        requester: &OrganizationId,
        key: &ComputeTaskKey,
        action: TaskAction,
        reason: &str,
    ) -> Result<()> {
        self.execute("apply_task_action", requester, |deps, ctx| {
            deps.tasks()
                .apply_task_action(ctx, requester, key, action, reason)
        })
    }

    /// Registers assets produced by a running task.
    ///
    /// # Errors
    ///
    /// See [`ComputeTaskService::register_task_outputs`](crate::orchestration::ComputeTaskService::register_task_outputs).
    pub fn register_task_outputs(
        &self,
        requester: &OrganizationId,
        key: &ComputeTaskKey,
        outputs: Vec<NewTaskOutputAsset>,
    ) -> Result<Vec<ComputeTaskOutputAsset>> {
        self.execute("register_task_outputs", requester, |deps, ctx| {
            deps.tasks()
                .register_task_outputs(ctx, requester, key, outputs)
        })
    }

    /// Deletes the artifacts of a transient task output.
    ///
    /// # Errors
    ///
    /// See [`ComputeTaskService::disable_task_output`](crate::orchestration::ComputeTaskService::disable_task_output).
    pub fn disable_task_output(
        &self,
        requester: &OrganizationId,
        key: &ComputeTaskKey,
        identifier: &str,
    ) -> Result<()> {
        self.execute("disable_task_output", requester, |deps, ctx| {
            deps.tasks()
                .disable_task_output(ctx, requester, key, identifier)
        })
    }

    /// Gets a compute task.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the task does not exist.
    pub fn get_task(&self, key: &ComputeTaskKey) -> Result<ComputeTask> {
        self.store
            .get_compute_task(key)?
            .ok_or_else(|| Error::not_found("compute task", key))
    }

    /// Queries compute tasks.
    ///
    /// # Errors
    ///
    /// Returns a bad-request error for a malformed page token.
    pub fn query_tasks(
        &self,
        pagination: &Pagination,
        filter: &TaskQueryFilter,
    ) -> Result<Page<ComputeTask>> {
        self.store.query_compute_tasks(pagination, filter)
    }

    /// Lists the assets registered under a task's outputs.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the task does not exist.
    pub fn get_task_outputs(&self, key: &ComputeTaskKey) -> Result<Vec<ComputeTaskOutputAsset>> {
        if !self.store.compute_task_exists(key)? {
            return Err(Error::not_found("compute task", key));
        }
        self.store.get_compute_task_output_assets(key, None)
    }

    /// Gets a compute plan.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the plan does not exist.
    pub fn get_plan(&self, key: &ComputePlanKey) -> Result<ComputePlan> {
        self.store
            .get_compute_plan(key)?
            .ok_or_else(|| Error::not_found("compute plan", key))
    }

    /// Queries compute plans.
    ///
    /// # Errors
    ///
    /// Returns a bad-request error for a malformed page token.
    pub fn query_plans(
        &self,
        pagination: &Pagination,
        filter: &PlanQueryFilter,
    ) -> Result<Page<ComputePlan>> {
        self.store.query_compute_plans(pagination, filter)
    }

    /// Returns the derived status of a compute plan.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the plan does not exist.
    pub fn get_plan_status(&self, key: &ComputePlanKey) -> Result<PlanStatus> {
        self.read_only(|deps, ctx| deps.plans().get_plan_status(ctx, key))
    }

    /// Returns true if the plan is still making progress.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the plan does not exist.
    pub fn is_plan_running(&self, key: &ComputePlanKey) -> Result<bool> {
        self.read_only(|deps, ctx| deps.plans().is_plan_running(ctx, key))
    }

    /// Gets a function.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the function does not exist.
    pub fn get_function(&self, key: &FunctionKey) -> Result<Function> {
        self.store
            .get_function(key)?
            .ok_or_else(|| Error::not_found("function", key))
    }

    /// Queries functions.
    ///
    /// # Errors
    ///
    /// Returns a bad-request error for a malformed page token.
    pub fn query_functions(&self, pagination: &Pagination) -> Result<Page<Function>> {
        self.store.query_functions(pagination)
    }

    /// Queries recorded events.
    ///
    /// # Errors
    ///
    /// Returns a bad-request error for a malformed page token.
    pub fn query_events(
        &self,
        pagination: &Pagination,
        filter: &EventQueryFilter,
    ) -> Result<Page<Event>> {
        self.store.query_events(pagination, filter)
    }

    fn read_only<T>(
        &self,
        op: impl FnOnce(ServiceDeps<'_>, &mut RequestContext) -> Result<T>,
    ) -> Result<T> {
        let mut ctx = RequestContext::new(self.clock.transaction_time());
        op(
            ServiceDeps::new(Stores::from_ledger(&self.store), self.config),
            &mut ctx,
        )
    }
}
