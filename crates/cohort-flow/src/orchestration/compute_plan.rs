//! Compute plan orchestration.

use cohort_core::{ComputePlanKey, OrganizationId};

use super::ServiceDeps;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::events::{EventAsset, METADATA_REASON, NewEvent};
use crate::plan::{ComputePlan, NewComputePlan, PlanAction, PlanStatus, plan_status};
use crate::store::TaskQueryFilter;
use crate::task::TaskAction;

/// Registers plans and applies plan-level actions.
#[derive(Debug, Clone, Copy)]
pub struct ComputePlanService<'a> {
    deps: ServiceDeps<'a>,
}

impl<'a> ComputePlanService<'a> {
    /// Creates the service.
    #[must_use]
    pub const fn new(deps: ServiceDeps<'a>) -> Self {
        Self { deps }
    }

    /// Registers a plan owned by `requester`.
    ///
    /// # Errors
    ///
    /// Returns a conflict if the key is already taken.
    #[tracing::instrument(skip(self, ctx, new_plan), fields(requester = %requester, plan = %new_plan.key))]
    pub fn register_plan(
        &self,
        ctx: &mut RequestContext,
        requester: &OrganizationId,
        new_plan: NewComputePlan,
    ) -> Result<ComputePlan> {
        let stores = self.deps.stores;
        if stores.plans.get_compute_plan(&new_plan.key)?.is_some() {
            return Err(Error::conflict(format!(
                "compute plan {} already exists",
                new_plan.key
            )));
        }

        let plan = ComputePlan {
            key: new_plan.key,
            owner: requester.clone(),
            name: new_plan.name,
            tag: new_plan.tag,
            metadata: new_plan.metadata,
            creation_date: ctx.transaction_time(),
            cancelation_date: None,
            failure_date: None,
        };
        stores.plans.add_compute_plan(&plan)?;
        ctx.cache_plan(plan.clone());
        stores
            .recorder()
            .record_one(ctx, NewEvent::created(EventAsset::ComputePlan(plan.clone())))?;
        tracing::info!("registered compute plan");
        Ok(plan)
    }

    /// Applies an owner action to a plan.
    ///
    /// Canceling stamps the plan and cancels every task still able to be
    /// canceled; tasks already in a final status are left untouched.
    ///
    /// # Errors
    ///
    /// Returns a permission error if the requester is not the owner and a
    /// terminated-action error if the plan is already canceled, failed or done.
    #[tracing::instrument(skip(self, ctx), fields(requester = %requester, plan = %key))]
    pub fn apply_plan_action(
        &self,
        ctx: &mut RequestContext,
        requester: &OrganizationId,
        key: &ComputePlanKey,
        action: PlanAction,
        reason: &str,
    ) -> Result<()> {
        let stores = self.deps.stores;
        let mut plan = ctx.plan(stores.plans, key)?;
        if &plan.owner != requester {
            return Err(Error::permission_denied(format!(
                "{requester} is not allowed to {action} compute plan {key}"
            )));
        }

        let counts = stores.tasks.count_compute_plan_tasks(key)?;
        if plan.is_terminated(&counts) {
            return Err(Error::terminated_action(format!(
                "compute plan {key} is {} and does not accept {action}",
                plan_status(&counts, plan.cancelation_date)
            )));
        }

        match action {
            PlanAction::Cancel => {
                plan.cancelation_date = Some(ctx.transaction_time());
                stores.plans.update_compute_plan(&plan)?;
                ctx.cache_plan(plan.clone());
                stores.recorder().record_one(
                    ctx,
                    NewEvent::updated(EventAsset::ComputePlan(plan))
                        .with_metadata(METADATA_REASON, reason),
                )?;

                let tasks = self.deps.tasks();
                let filter = TaskQueryFilter {
                    compute_plan_key: Some(*key),
                    ..TaskQueryFilter::default()
                };
                let task_reason = format!("compute plan {key} canceled");
                for task_key in tasks.collect_task_keys(&filter)? {
                    tasks.apply_cascade_action(ctx, &task_key, TaskAction::Cancel, &task_reason)?;
                }
            }
        }
        Ok(())
    }

    /// Renames a plan.
    ///
    /// # Errors
    ///
    /// Returns a permission error if the requester is not the owner and a
    /// bad-request error for an empty name.
    #[tracing::instrument(skip(self, ctx), fields(requester = %requester, plan = %key))]
    pub fn update_plan(
        &self,
        ctx: &mut RequestContext,
        requester: &OrganizationId,
        key: &ComputePlanKey,
        name: &str,
    ) -> Result<ComputePlan> {
        if name.trim().is_empty() {
            return Err(Error::bad_request("compute plan name cannot be empty"));
        }
        let stores = self.deps.stores;
        let mut plan = ctx.plan(stores.plans, key)?;
        if &plan.owner != requester {
            return Err(Error::permission_denied(format!(
                "{requester} is not allowed to update compute plan {key}"
            )));
        }

        name.clone_into(&mut plan.name);
        stores.plans.update_compute_plan(&plan)?;
        ctx.cache_plan(plan.clone());
        stores
            .recorder()
            .record_one(ctx, NewEvent::updated(EventAsset::ComputePlan(plan.clone())))?;
        Ok(plan)
    }

    /// Stamps the failure date of a plan after one of its tasks failed.
    ///
    /// Only the first failure is recorded, and canceled plans are left alone.
    pub(crate) fn fail_plan(
        &self,
        ctx: &mut RequestContext,
        key: &ComputePlanKey,
        reason: &str,
    ) -> Result<()> {
        let stores = self.deps.stores;
        let mut plan = ctx.plan(stores.plans, key)?;
        if plan.is_canceled_or_failed() {
            return Ok(());
        }

        plan.failure_date = Some(ctx.transaction_time());
        stores.plans.update_compute_plan(&plan)?;
        ctx.cache_plan(plan.clone());
        tracing::info!(plan = %key, reason, "compute plan failed");
        stores.recorder().record_one(
            ctx,
            NewEvent::updated(EventAsset::ComputePlan(plan))
                .with_metadata(METADATA_REASON, reason),
        )?;
        Ok(())
    }

    /// Returns the derived status of a plan.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the plan does not exist.
    pub fn get_plan_status(
        &self,
        ctx: &mut RequestContext,
        key: &ComputePlanKey,
    ) -> Result<PlanStatus> {
        let plan = ctx.plan(self.deps.stores.plans, key)?;
        let counts = self.deps.stores.tasks.count_compute_plan_tasks(key)?;
        Ok(plan_status(&counts, plan.cancelation_date))
    }

    /// Returns true if the plan is not terminated and some task is ready or running.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the plan does not exist.
    pub fn is_plan_running(&self, ctx: &mut RequestContext, key: &ComputePlanKey) -> Result<bool> {
        let plan = ctx.plan(self.deps.stores.plans, key)?;
        let counts = self.deps.stores.tasks.count_compute_plan_tasks(key)?;
        if plan.is_terminated(&counts) {
            return Ok(false);
        }
        self.deps.stores.tasks.compute_plan_has_active_task(key)
    }
}
