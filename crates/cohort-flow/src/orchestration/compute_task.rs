//! Compute task orchestration.
//!
//! Registration runs in three phases: the batch is ordered so that parents come
//! first, every task is validated and built against the request context, and
//! only then is anything written. A failed validation therefore leaves storage
//! untouched.
//!
//! Status changes always go through [`TASK_TRANSITIONS`]. After each transition
//! the post-transition hook cascades the new status to dependents.

use std::collections::{BTreeMap, HashMap, HashSet};

use cohort_core::{ComputeTaskKey, OrganizationId};

use super::ServiceDeps;
use crate::asset::{
    AssetKind, ComputeTaskOutputAsset, DataManager, Model, NewOutputAsset, NewTaskOutputAsset,
    Performance,
};
use crate::context::RequestContext;
use crate::dag::sort_new_tasks;
use crate::error::{Error, Result};
use crate::events::{EventAsset, NewEvent};
use crate::function::{Function, FunctionInput};
use crate::store::{Pagination, TaskQueryFilter};
use crate::task::{
    ComputeTask, ComputeTaskInput, ComputeTaskOutput, InputRef, NewComputeTask, TASK_TRANSITIONS,
    TaskAction, TaskStatus, initial_status, rank_from_parents,
};
use crate::validation::{
    resolve_logs_permission, resolve_worker, validate_input_identifiers, validate_outputs,
};

/// Reason recorded when a task completes through output registration.
pub const REASON_OUTPUTS_REGISTERED: &str = "outputs registered";

/// Registers tasks and drives their state machine.
#[derive(Debug, Clone, Copy)]
pub struct ComputeTaskService<'a> {
    deps: ServiceDeps<'a>,
}

impl<'a> ComputeTaskService<'a> {
    /// Creates the service.
    #[must_use]
    pub const fn new(deps: ServiceDeps<'a>) -> Self {
        Self { deps }
    }

    /// Registers a batch of tasks.
    ///
    /// Returns the created tasks in dependency order.
    ///
    /// # Errors
    ///
    /// Returns an error, before any write, if the batch is empty or too large, a
    /// key already exists, the batch cannot be ordered, or any task fails
    /// validation.
    #[tracing::instrument(skip(self, ctx, new_tasks), fields(requester = %requester, count = new_tasks.len()))]
    pub fn register_tasks(
        &self,
        ctx: &mut RequestContext,
        requester: &OrganizationId,
        new_tasks: Vec<NewComputeTask>,
    ) -> Result<Vec<ComputeTask>> {
        if new_tasks.is_empty() {
            return Err(Error::bad_request("no compute task to register"));
        }
        if new_tasks.len() > self.deps.config.max_task_batch {
            return Err(Error::bad_request(format!(
                "batch of {} compute tasks exceeds the limit of {}",
                new_tasks.len(),
                self.deps.config.max_task_batch
            )));
        }

        let batch_keys: HashSet<ComputeTaskKey> = new_tasks.iter().map(|t| t.key).collect();
        let mut persisted = HashSet::new();
        for task in &new_tasks {
            if ctx.find_task(self.deps.stores.tasks, &task.key)?.is_some() {
                return Err(Error::conflict(format!(
                    "compute task {} already exists",
                    task.key
                )));
            }
            for parent in task.parent_task_keys() {
                if !batch_keys.contains(&parent)
                    && ctx.find_task(self.deps.stores.tasks, &parent)?.is_some()
                {
                    persisted.insert(parent);
                }
            }
        }

        let sorted = sort_new_tasks(new_tasks, &persisted)?;

        let mut built = Vec::with_capacity(sorted.len());
        for new_task in &sorted {
            let task = self.build_task(ctx, requester, new_task)?;
            ctx.cache_task(task.clone());
            built.push(task);
        }

        let recorder = self.deps.stores.recorder();
        for task in &built {
            self.deps.stores.tasks.add_compute_task(task)?;
            self.deps
                .metrics
                .record_task_registered(task.status.as_label());
        }
        recorder.record(
            ctx,
            built
                .iter()
                .map(|task| NewEvent::created(EventAsset::ComputeTask(task.clone()))),
        )?;

        tracing::info!(count = built.len(), "registered compute tasks");
        Ok(built)
    }

    /// Validates a new task and builds the task to persist.
    fn build_task(
        &self,
        ctx: &mut RequestContext,
        requester: &OrganizationId,
        new_task: &NewComputeTask,
    ) -> Result<ComputeTask> {
        let stores = self.deps.stores;

        let plan = ctx.plan(stores.plans, &new_task.compute_plan_key)?;
        if &plan.owner != requester {
            return Err(Error::permission_denied(format!(
                "{requester} does not own compute plan {}",
                plan.key
            )));
        }
        if plan.is_canceled_or_failed() {
            return Err(Error::terminated_action(format!(
                "compute plan {} is terminated and accepts no new task",
                plan.key
            )));
        }

        let function = ctx.function(stores.functions, &new_task.function_key)?;
        if !function.permissions.can_process(requester) {
            return Err(Error::permission_denied(format!(
                "{requester} cannot process function {}",
                function.key
            )));
        }

        validate_input_identifiers(&function, &new_task.inputs)?;
        validate_outputs(&function, &new_task.outputs)?;

        let mut parents = Vec::new();
        for parent_key in new_task.parent_task_keys() {
            let parent = ctx.task(stores.tasks, &parent_key)?;
            if parent.status == TaskStatus::Done {
                self.check_parent_models_available(&parent)?;
            }
            parents.push(parent);
        }

        let data_manager = self.resolve_data_manager(ctx, requester, &function, &new_task.inputs)?;
        let worker = resolve_worker(new_task.worker.as_ref(), data_manager.as_ref())?;

        for input in &new_task.inputs {
            let contract = function.inputs.get(&input.identifier).ok_or_else(|| {
                Error::internal(format!("input '{}' vanished from contract", input.identifier))
            })?;
            self.validate_input(ctx, requester, &worker, data_manager.as_ref(), input, contract)?;
        }

        let permission_service = self.deps.permissions();
        let mut outputs = BTreeMap::new();
        for (identifier, requested) in &new_task.outputs {
            let permissions =
                permission_service.create_permissions(ctx, requester, &requested.permissions)?;
            outputs.insert(
                identifier.clone(),
                ComputeTaskOutput {
                    permissions,
                    transient: requested.transient,
                },
            );
        }

        let parent_statuses: Vec<TaskStatus> = parents.iter().map(|p| p.status).collect();
        Ok(ComputeTask {
            key: new_task.key,
            owner: requester.clone(),
            worker,
            compute_plan_key: new_task.compute_plan_key,
            function_key: new_task.function_key,
            status: initial_status(&parent_statuses),
            rank: rank_from_parents(parents.iter().map(|p| p.rank)),
            inputs: new_task.inputs.clone(),
            outputs,
            logs_permission: resolve_logs_permission(requester, data_manager.as_ref(), &parents),
            creation_date: ctx.transaction_time(),
            metadata: new_task.metadata.clone(),
        })
    }

    /// Rejects building on a parent whose model artifacts were deleted.
    fn check_parent_models_available(&self, parent: &ComputeTask) -> Result<()> {
        let models = self.deps.stores.models.get_compute_task_models(&parent.key)?;
        if let Some(model) = models.iter().find(|m| m.is_disabled()) {
            return Err(Error::invalid_asset(format!(
                "parent compute task {} has disabled model {}",
                parent.key, model.key
            )));
        }
        Ok(())
    }

    fn resolve_data_manager(
        &self,
        ctx: &mut RequestContext,
        requester: &OrganizationId,
        function: &Function,
        inputs: &[ComputeTaskInput],
    ) -> Result<Option<DataManager>> {
        let Some(identifier) = function.data_manager_input() else {
            return Ok(None);
        };
        let Some(input) = inputs.iter().find(|i| i.identifier == identifier) else {
            return Ok(None);
        };
        let InputRef::AssetKey(key) = &input.reference else {
            return Err(Error::invalid_asset(format!(
                "data manager input '{identifier}' must reference an asset key"
            )));
        };

        let data_manager = ctx.data_manager(self.deps.stores.data_managers, key)?;
        if !data_manager.permissions.can_process(requester) {
            return Err(Error::permission_denied(format!(
                "{requester} cannot process data manager {key}"
            )));
        }
        Ok(Some(data_manager))
    }

    fn validate_input(
        &self,
        ctx: &mut RequestContext,
        requester: &OrganizationId,
        worker: &OrganizationId,
        data_manager: Option<&DataManager>,
        input: &ComputeTaskInput,
        contract: &FunctionInput,
    ) -> Result<()> {
        let stores = self.deps.stores;
        match (contract.kind, &input.reference) {
            (AssetKind::DataManager, InputRef::AssetKey(_)) => Ok(()),
            (AssetKind::DataSample, InputRef::AssetKey(key)) => {
                let sample = stores
                    .data_samples
                    .get_data_sample(key)?
                    .ok_or_else(|| Error::not_found("data sample", key))?;
                let dm = data_manager.ok_or_else(|| {
                    Error::invalid_asset(format!("data sample {key} requires a data manager input"))
                })?;
                if !sample.data_manager_keys.contains(&dm.key) {
                    return Err(Error::invalid_asset(format!(
                        "data sample {key} does not belong to data manager {}",
                        dm.key
                    )));
                }
                Ok(())
            }
            (AssetKind::DataManager | AssetKind::DataSample, InputRef::ParentTaskOutput { .. }) => {
                Err(Error::invalid_asset(format!(
                    "input '{}' of kind {} must reference an asset key",
                    input.identifier, contract.kind
                )))
            }
            (AssetKind::Model, InputRef::AssetKey(key)) => {
                let model = stores
                    .models
                    .get_model(key)?
                    .ok_or_else(|| Error::not_found("model", key))?;
                if model.is_disabled() {
                    return Err(Error::invalid_asset(format!("model {key} is disabled")));
                }
                if !model.permissions.can_process(requester) {
                    return Err(Error::permission_denied(format!(
                        "{requester} cannot process model {key}"
                    )));
                }
                Ok(())
            }
            (
                AssetKind::Model,
                InputRef::ParentTaskOutput {
                    parent_task_key,
                    output_identifier,
                },
            ) => {
                let parent = ctx.task(stores.tasks, parent_task_key)?;
                let parent_function = ctx.function(stores.functions, &parent.function_key)?;
                let produced = parent_function.outputs.get(output_identifier).ok_or_else(|| {
                    Error::invalid_asset(format!(
                        "parent compute task {parent_task_key} has no output '{output_identifier}'"
                    ))
                })?;
                if produced.kind != contract.kind {
                    return Err(Error::invalid_asset(format!(
                        "input '{}' expects {} but parent output '{output_identifier}' produces {}",
                        input.identifier, contract.kind, produced.kind
                    )));
                }
                if produced.multiple && !contract.multiple {
                    return Err(Error::invalid_asset(format!(
                        "input '{}' is not multiple but parent output '{output_identifier}' is",
                        input.identifier
                    )));
                }
                let slot = parent.outputs.get(output_identifier).ok_or_else(|| {
                    Error::invalid_asset(format!(
                        "parent compute task {parent_task_key} has no output '{output_identifier}'"
                    ))
                })?;
                if !slot.permissions.can_process(worker) {
                    return Err(Error::permission_denied(format!(
                        "worker {worker} cannot process output '{output_identifier}' of compute task {parent_task_key}"
                    )));
                }
                Ok(())
            }
            (AssetKind::Performance, _) => Err(Error::unimplemented(format!(
                "input '{}' of kind PERFORMANCE is not supported",
                input.identifier
            ))),
        }
    }

    /// Applies an action requested by an organization.
    ///
    /// Cancel is reserved to the task owner; Start and Fail to the worker. Other
    /// actions are applied by the orchestrator itself and are always denied here.
    ///
    /// # Errors
    ///
    /// Returns a permission error for unauthorized requesters and an invalid
    /// transition error when the action is illegal in the current status.
    #[tracing::instrument(skip(self, ctx), fields(requester = %requester, task = %key))]
    pub fn apply_task_action(
        &self,
        ctx: &mut RequestContext,
        requester: &OrganizationId,
        key: &ComputeTaskKey,
        action: TaskAction,
        reason: &str,
    ) -> Result<()> {
        let task = ctx.task(self.deps.stores.tasks, key)?;
        authorize_task_action(&task, requester, action)?;
        self.transition(ctx, task, action, reason)
    }

    /// Applies an action on behalf of the orchestrator, without authorization.
    pub(crate) fn apply_system_action(
        &self,
        ctx: &mut RequestContext,
        key: &ComputeTaskKey,
        action: TaskAction,
        reason: &str,
    ) -> Result<()> {
        let task = ctx.task(self.deps.stores.tasks, key)?;
        self.transition(ctx, task, action, reason)
    }

    /// Applies a cascaded action, swallowing illegal transitions.
    pub(crate) fn apply_cascade_action(
        &self,
        ctx: &mut RequestContext,
        key: &ComputeTaskKey,
        action: TaskAction,
        reason: &str,
    ) -> Result<()> {
        match self.apply_system_action(ctx, key, action, reason) {
            Err(err) if err.is_invalid_transition() => {
                tracing::debug!(task = %key, %action, error = %err, "skipping cascaded action");
                self.deps.metrics.record_cascade_skipped(&action.to_string());
                Ok(())
            }
            other => other,
        }
    }

    fn transition(
        &self,
        ctx: &mut RequestContext,
        mut task: ComputeTask,
        action: TaskAction,
        reason: &str,
    ) -> Result<()> {
        let from = task.status;
        let to = TASK_TRANSITIONS
            .next(from, action)
            .ok_or_else(|| Error::InvalidStateTransition {
                entity: "compute task",
                key: task.key.to_string(),
                from: from.to_string(),
                action: action.to_string(),
                terminal: from.is_terminal(),
            })?;

        task.status = to;
        self.deps.stores.tasks.update_compute_task(&task)?;
        ctx.cache_task(task.clone());
        self.deps
            .metrics
            .record_task_transition(from.as_label(), to.as_label());
        tracing::debug!(task = %task.key, %from, %to, reason, "compute task transition");

        self.deps.stores.recorder().record_one(
            ctx,
            NewEvent::status_updated(EventAsset::ComputeTask(task.clone()), to, reason),
        )?;

        self.on_transition(ctx, &task)
    }

    /// Post-transition hook.
    fn on_transition(&self, ctx: &mut RequestContext, task: &ComputeTask) -> Result<()> {
        match task.status {
            TaskStatus::Canceled => self.cascade_to_children(ctx, task, TaskAction::Cancel),
            TaskStatus::Failed => {
                let reason = format!("compute task {} failed", task.key);
                self.deps
                    .plans()
                    .fail_plan(ctx, &task.compute_plan_key, &reason)?;
                self.cascade_to_children(ctx, task, TaskAction::Fail)
            }
            TaskStatus::Done => {
                let reason = format!("parent compute task {} done", task.key);
                for child in self.children(task)? {
                    self.promote_if_ready(ctx, &child, &reason)?;
                }
                Ok(())
            }
            TaskStatus::Waiting | TaskStatus::Todo | TaskStatus::Doing => Ok(()),
        }
    }

    fn cascade_to_children(
        &self,
        ctx: &mut RequestContext,
        parent: &ComputeTask,
        action: TaskAction,
    ) -> Result<()> {
        let reason = format!("parent compute task {} {}", parent.key, parent.status);
        for child in self.children(parent)? {
            self.apply_cascade_action(ctx, &child, action, &reason)?;
        }
        Ok(())
    }

    fn children(&self, parent: &ComputeTask) -> Result<Vec<ComputeTaskKey>> {
        Ok(self
            .deps
            .stores
            .tasks
            .get_compute_task_children(&parent.key)?
            .into_iter()
            .map(|child| child.key)
            .collect())
    }

    /// Moves a waiting task to TODO once every parent is DONE.
    ///
    /// Parent statuses are re-read through the request context, so the check
    /// sees transitions made earlier in the same request.
    pub(crate) fn promote_if_ready(
        &self,
        ctx: &mut RequestContext,
        key: &ComputeTaskKey,
        reason: &str,
    ) -> Result<()> {
        let task = ctx.task(self.deps.stores.tasks, key)?;
        if !TASK_TRANSITIONS.can_apply(task.status, TaskAction::MarkReady) {
            return Ok(());
        }
        for parent_key in task.parent_task_keys() {
            if ctx.task(self.deps.stores.tasks, &parent_key)?.status != TaskStatus::Done {
                return Ok(());
            }
        }
        self.apply_cascade_action(ctx, key, TaskAction::MarkReady, reason)
    }

    /// Collects the keys of every task matching `filter`, walking all pages.
    pub(crate) fn collect_task_keys(&self, filter: &TaskQueryFilter) -> Result<Vec<ComputeTaskKey>> {
        let size = i64::from(self.deps.config.cascade_page_size);
        let mut pagination = Pagination::first(size);
        let mut keys = Vec::new();
        loop {
            let page = self
                .deps
                .stores
                .tasks
                .query_compute_tasks(&pagination, filter)?;
            keys.extend(page.items.iter().map(|task| task.key));
            if page.is_last() {
                return Ok(keys);
            }
            pagination = Pagination::new(page.next_token, size);
        }
    }

    /// Registers assets produced by a running task.
    ///
    /// Once every declared output holds at least one asset the task completes.
    ///
    /// # Errors
    ///
    /// Returns a permission error if the requester is not the worker, an invalid
    /// transition error if the task is not running, an invalid-asset error for
    /// undeclared or mismatched outputs, and a conflict for duplicate model keys.
    #[tracing::instrument(skip(self, ctx, outputs), fields(requester = %requester, task = %key))]
    pub fn register_task_outputs(
        &self,
        ctx: &mut RequestContext,
        requester: &OrganizationId,
        key: &ComputeTaskKey,
        outputs: Vec<NewTaskOutputAsset>,
    ) -> Result<Vec<ComputeTaskOutputAsset>> {
        if outputs.is_empty() {
            return Err(Error::bad_request("no output asset to register"));
        }
        let stores = self.deps.stores;
        let task = ctx.task(stores.tasks, key)?;
        if requester != &task.worker {
            return Err(Error::permission_denied(format!(
                "only worker {} can register outputs of compute task {key}",
                task.worker
            )));
        }
        if task.status != TaskStatus::Doing {
            return Err(Error::InvalidStateTransition {
                entity: "compute task",
                key: key.to_string(),
                from: task.status.to_string(),
                action: "register outputs of".to_string(),
                terminal: task.status.is_terminal(),
            });
        }
        let function = ctx.function(stores.functions, &task.function_key)?;

        let mut counts: HashMap<String, usize> = HashMap::new();
        for link in stores.output_assets.get_compute_task_output_assets(key, None)? {
            *counts.entry(link.identifier).or_insert(0) += 1;
        }

        let mut new_model_keys = HashSet::new();
        let mut links = Vec::with_capacity(outputs.len());
        let mut events = Vec::new();
        for output in outputs {
            let contract = function.outputs.get(&output.identifier).ok_or_else(|| {
                Error::invalid_asset(format!(
                    "output '{}' is not declared by function {}",
                    output.identifier, function.key
                ))
            })?;
            if contract.kind != output.asset.kind() {
                return Err(Error::invalid_asset(format!(
                    "output '{}' expects {} but received {}",
                    output.identifier,
                    contract.kind,
                    output.asset.kind()
                )));
            }
            let slot = task.outputs.get(&output.identifier).ok_or_else(|| {
                Error::invalid_asset(format!(
                    "compute task {key} has no output '{}'",
                    output.identifier
                ))
            })?;
            let count = counts.entry(output.identifier.clone()).or_insert(0);
            if *count >= 1 && !contract.multiple {
                return Err(Error::invalid_asset(format!(
                    "output '{}' is not multiple and already holds an asset",
                    output.identifier
                )));
            }
            *count += 1;

            let (asset_key, asset_event) = match output.asset {
                NewOutputAsset::Model {
                    key: model_key,
                    address,
                } => {
                    if !new_model_keys.insert(model_key)
                        || stores.models.get_model(&model_key)?.is_some()
                    {
                        return Err(Error::conflict(format!("model {model_key} already exists")));
                    }
                    let model = Model {
                        key: model_key,
                        compute_task_key: task.key,
                        identifier: output.identifier.clone(),
                        owner: task.owner.clone(),
                        permissions: slot.permissions.clone(),
                        address: Some(address),
                        creation_date: ctx.transaction_time(),
                    };
                    stores.models.add_model(&model)?;
                    (model_key.to_string(), EventAsset::Model(model))
                }
                NewOutputAsset::Performance { value } => {
                    let performance = Performance {
                        compute_task_key: task.key,
                        identifier: output.identifier.clone(),
                        value,
                        creation_date: ctx.transaction_time(),
                    };
                    stores.performances.add_performance(&performance)?;
                    (performance.key(), EventAsset::Performance(performance))
                }
            };

            let link = ComputeTaskOutputAsset {
                compute_task_key: task.key,
                identifier: output.identifier,
                asset_kind: contract.kind,
                asset_key,
            };
            stores.output_assets.add_compute_task_output_asset(&link)?;
            events.push(NewEvent::created(asset_event));
            events.push(NewEvent::created(EventAsset::ComputeTaskOutputAsset(
                link.clone(),
            )));
            links.push(link);
        }
        stores.recorder().record(ctx, events)?;

        let complete = function
            .outputs
            .keys()
            .all(|identifier| counts.get(identifier).copied().unwrap_or(0) > 0);
        if complete {
            self.transition(ctx, task, TaskAction::Complete, REASON_OUTPUTS_REGISTERED)?;
        }
        Ok(links)
    }

    /// Deletes the artifacts produced under a transient output.
    ///
    /// # Errors
    ///
    /// Returns a permission error if the requester is not the worker, and an
    /// invalid-asset error if the output is not transient or if the task or one
    /// of its children is not in a final status.
    #[tracing::instrument(skip(self, ctx), fields(requester = %requester, task = %key))]
    pub fn disable_task_output(
        &self,
        ctx: &mut RequestContext,
        requester: &OrganizationId,
        key: &ComputeTaskKey,
        identifier: &str,
    ) -> Result<()> {
        let stores = self.deps.stores;
        let task = ctx.task(stores.tasks, key)?;
        if requester != &task.worker {
            return Err(Error::permission_denied(format!(
                "only worker {} can disable outputs of compute task {key}",
                task.worker
            )));
        }
        let output = task.outputs.get(identifier).ok_or_else(|| {
            Error::invalid_asset(format!("compute task {key} has no output '{identifier}'"))
        })?;
        if !output.transient {
            return Err(Error::invalid_asset(format!(
                "output '{identifier}' of compute task {key} is not transient"
            )));
        }
        if !task.status.is_terminal() {
            return Err(Error::invalid_asset(format!(
                "compute task {key} not in final state"
            )));
        }
        for child_key in self.children(&task)? {
            let child = ctx.task(stores.tasks, &child_key)?;
            if !child.status.is_terminal() {
                return Err(Error::invalid_asset(format!(
                    "child not in final state: compute task {child_key} is {}",
                    child.status
                )));
            }
        }

        let mut events = Vec::new();
        for mut model in stores.models.get_compute_task_models(key)? {
            if model.identifier != identifier || model.is_disabled() {
                continue;
            }
            model.address = None;
            stores.models.update_model(&model)?;
            events.push(NewEvent::disabled(EventAsset::Model(model)));
        }
        tracing::info!(output = identifier, disabled = events.len(), "disabled task output");
        stores.recorder().record(ctx, events)?;
        Ok(())
    }
}

fn authorize_task_action(
    task: &ComputeTask,
    requester: &OrganizationId,
    action: TaskAction,
) -> Result<()> {
    let allowed = match action {
        TaskAction::Cancel => requester == &task.owner,
        TaskAction::Start | TaskAction::Fail => requester == &task.worker,
        TaskAction::MarkReady | TaskAction::Complete => false,
    };
    if allowed {
        Ok(())
    } else {
        Err(Error::permission_denied(format!(
            "{requester} is not allowed to {action} compute task {}",
            task.key
        )))
    }
}
