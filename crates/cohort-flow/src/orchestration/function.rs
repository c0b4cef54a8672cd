//! Function orchestration and build-status propagation.

use cohort_core::{FunctionKey, OrganizationId};

use super::ServiceDeps;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::events::{EventAsset, NewEvent};
use crate::function::{FUNCTION_TRANSITIONS, Function, FunctionAction, FunctionStatus, NewFunction};
use crate::store::TaskQueryFilter;
use crate::task::{TaskAction, TaskStatus};
use crate::validation::validate_function_contract;

/// Task statuses reached by a READY function.
const WAITING: &[TaskStatus] = &[TaskStatus::Waiting];

/// Task statuses reached by a CANCELED or FAILED function.
const PENDING: &[TaskStatus] = &[TaskStatus::Waiting, TaskStatus::Todo];

/// Registers functions and drives their build lifecycle.
#[derive(Debug, Clone, Copy)]
pub struct FunctionService<'a> {
    deps: ServiceDeps<'a>,
}

impl<'a> FunctionService<'a> {
    /// Creates the service.
    #[must_use]
    pub const fn new(deps: ServiceDeps<'a>) -> Self {
        Self { deps }
    }

    /// Registers a function owned by `requester`.
    ///
    /// # Errors
    ///
    /// Returns a conflict on a duplicate key, an invalid-asset error for an
    /// inconsistent contract, and a bad-request error if the permissions name an
    /// unknown organization.
    #[tracing::instrument(skip(self, ctx, new_function), fields(requester = %requester, function = %new_function.key))]
    pub fn register_function(
        &self,
        ctx: &mut RequestContext,
        requester: &OrganizationId,
        new_function: NewFunction,
    ) -> Result<Function> {
        let stores = self.deps.stores;
        if stores.functions.get_function(&new_function.key)?.is_some() {
            return Err(Error::conflict(format!(
                "function {} already exists",
                new_function.key
            )));
        }
        validate_function_contract(&new_function.inputs, &new_function.outputs)?;

        let permissions = self.deps.permissions().create_permissions(
            ctx,
            requester,
            &new_function.new_permissions,
        )?;
        let function = Function {
            key: new_function.key,
            name: new_function.name,
            owner: requester.clone(),
            permissions,
            inputs: new_function.inputs,
            outputs: new_function.outputs,
            status: FunctionStatus::Waiting,
            creation_date: ctx.transaction_time(),
            metadata: new_function.metadata,
        };
        stores.functions.add_function(&function)?;
        ctx.cache_function(function.clone());
        stores
            .recorder()
            .record_one(ctx, NewEvent::created(EventAsset::Function(function.clone())))?;
        tracing::info!("registered function");
        Ok(function)
    }

    /// Applies a build-lifecycle action and propagates the new status to the
    /// tasks invoking the function.
    ///
    /// # Errors
    ///
    /// Returns a permission error if the requester is not the owner and an
    /// invalid transition error when the action is illegal in the current status.
    #[tracing::instrument(skip(self, ctx), fields(requester = %requester, function = %key))]
    pub fn apply_function_action(
        &self,
        ctx: &mut RequestContext,
        requester: &OrganizationId,
        key: &FunctionKey,
        action: FunctionAction,
        reason: &str,
    ) -> Result<()> {
        let stores = self.deps.stores;
        let mut function = ctx.function(stores.functions, key)?;
        if &function.owner != requester {
            return Err(Error::permission_denied(format!(
                "{requester} is not allowed to {action} function {key}"
            )));
        }

        let from = function.status;
        let to = FUNCTION_TRANSITIONS.next(from, action).ok_or_else(|| {
            Error::InvalidStateTransition {
                entity: "function",
                key: key.to_string(),
                from: from.to_string(),
                action: action.to_string(),
                terminal: from.is_terminal(),
            }
        })?;

        function.status = to;
        stores.functions.update_function(&function)?;
        ctx.cache_function(function.clone());
        self.deps
            .metrics
            .record_function_transition(from.as_label(), to.as_label());
        tracing::debug!(%from, %to, reason, "function transition");
        stores.recorder().record_one(
            ctx,
            NewEvent::status_updated(EventAsset::Function(function), to, reason),
        )?;

        self.propagate(ctx, key, to)
    }

    /// Applies the consequence of a function status change to its tasks.
    fn propagate(
        &self,
        ctx: &mut RequestContext,
        key: &FunctionKey,
        status: FunctionStatus,
    ) -> Result<()> {
        let tasks = self.deps.tasks();
        let (eligible, action, reason) = match status {
            FunctionStatus::Ready => (WAITING, TaskAction::MarkReady, "build finished"),
            FunctionStatus::Canceled => (PENDING, TaskAction::Cancel, "canceled"),
            FunctionStatus::Failed => (PENDING, TaskAction::Fail, "failed"),
            FunctionStatus::Building | FunctionStatus::Waiting => {
                tracing::debug!(function = %key, %status, "no task propagation for build started");
                return Ok(());
            }
        };

        let mut affected = Vec::new();
        for task_status in eligible {
            affected.extend(tasks.collect_task_keys(&TaskQueryFilter {
                function_key: Some(*key),
                status: Some(*task_status),
                ..TaskQueryFilter::default()
            })?);
        }
        tracing::debug!(function = %key, %status, count = affected.len(), "propagating function status");

        for task_key in affected {
            if action == TaskAction::MarkReady {
                tasks.promote_if_ready(ctx, &task_key, reason)?;
            } else {
                tasks.apply_cascade_action(ctx, &task_key, action, reason)?;
            }
        }
        Ok(())
    }
}
