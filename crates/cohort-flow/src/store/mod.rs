//! Pluggable storage for ledger state.
//!
//! The orchestrator depends on narrow capability traits, one per entity, so each
//! component only sees the operations it needs. A concrete backend implements all
//! of them and is usable as a [`LedgerStore`].
//!
//! ## Design Principles
//!
//! - **Narrow capabilities**: Get/Add/Update/Query per entity, nothing more
//! - **Opaque pagination**: queries take a token and a page size and return the
//!   next token; an empty token marks the last page
//! - **Transactions**: a backend groups the writes of one request; the façade
//!   commits on success and rolls back on error
//! - **Testability**: [`memory::InMemoryStore`] implements every trait

pub mod memory;

use cohort_core::{AssetKey, ComputePlanKey, ComputeTaskKey, FunctionKey, OrganizationId};

use crate::asset::{ComputeTaskOutputAsset, DataManager, DataSample, Model, Performance};
use crate::error::{Error, Result};
use crate::events::{AssetType, Event, EventKind};
use crate::function::Function;
use crate::plan::{ComputePlan, TaskCounts};
use crate::task::{ComputeTask, TaskStatus};

/// Page size applied when a query does not specify a positive one.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Position and size of a query page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pagination {
    /// Opaque token returned by the previous page; empty for the first page.
    pub token: String,
    /// Requested page size; zero or negative means [`DEFAULT_PAGE_SIZE`].
    pub size: i64,
}

impl Pagination {
    /// Creates a pagination request.
    #[must_use]
    pub fn new(token: impl Into<String>, size: i64) -> Self {
        Self {
            token: token.into(),
            size,
        }
    }

    /// The first page with the given size.
    #[must_use]
    pub fn first(size: i64) -> Self {
        Self::new(String::new(), size)
    }

    /// Returns the page size to apply.
    #[must_use]
    pub fn effective_size(&self) -> usize {
        usize::try_from(self.size)
            .ok()
            .filter(|size| *size > 0)
            .unwrap_or(DEFAULT_PAGE_SIZE)
    }
}

/// One page of query results.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    /// Results of this page.
    pub items: Vec<T>,
    /// Token of the next page; empty when this is the last page.
    pub next_token: String,
}

impl<T> Page<T> {
    /// Returns true if no page follows.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.next_token.is_empty()
    }
}

/// Filter applied to task queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskQueryFilter {
    /// Only tasks of this plan.
    pub compute_plan_key: Option<ComputePlanKey>,
    /// Only tasks invoking this function.
    pub function_key: Option<FunctionKey>,
    /// Only tasks executed by this worker.
    pub worker: Option<OrganizationId>,
    /// Only tasks in this status.
    pub status: Option<TaskStatus>,
}

impl TaskQueryFilter {
    /// Returns true if `task` passes the filter.
    #[must_use]
    pub fn matches(&self, task: &ComputeTask) -> bool {
        self.compute_plan_key
            .is_none_or(|key| task.compute_plan_key == key)
            && self.function_key.is_none_or(|key| task.function_key == key)
            && self.worker.as_ref().is_none_or(|worker| &task.worker == worker)
            && self.status.is_none_or(|status| task.status == status)
    }
}

/// Filter applied to plan queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanQueryFilter {
    /// Only plans owned by this organization.
    pub owner: Option<OrganizationId>,
}

/// Filter applied to event queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQueryFilter {
    /// Only events about this asset.
    pub asset_key: Option<String>,
    /// Only events about this asset type.
    pub asset_kind: Option<AssetType>,
    /// Only events of this kind.
    pub event_kind: Option<EventKind>,
}

impl EventQueryFilter {
    /// Returns true if `event` passes the filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        self.asset_key.as_ref().is_none_or(|key| &event.asset_key == key)
            && self.asset_kind.is_none_or(|kind| event.asset_kind == kind)
            && self.event_kind.is_none_or(|kind| event.event_kind == kind)
    }
}

/// Task persistence.
pub trait ComputeTaskStore: Send + Sync {
    /// Gets a task by key.
    ///
    /// Returns `None` if the task does not exist.
    fn get_compute_task(&self, key: &ComputeTaskKey) -> Result<Option<ComputeTask>>;

    /// Returns true if a task with this key exists.
    fn compute_task_exists(&self, key: &ComputeTaskKey) -> Result<bool> {
        Ok(self.get_compute_task(key)?.is_some())
    }

    /// Inserts a new task.
    fn add_compute_task(&self, task: &ComputeTask) -> Result<()>;

    /// Replaces an existing task.
    fn update_compute_task(&self, task: &ComputeTask) -> Result<()>;

    /// Gets the tasks that reference `key` as a parent, in registration order.
    fn get_compute_task_children(&self, key: &ComputeTaskKey) -> Result<Vec<ComputeTask>>;

    /// Queries tasks in registration order.
    fn query_compute_tasks(
        &self,
        pagination: &Pagination,
        filter: &TaskQueryFilter,
    ) -> Result<Page<ComputeTask>>;

    /// Counts the tasks of a plan per status.
    fn count_compute_plan_tasks(&self, plan_key: &ComputePlanKey) -> Result<TaskCounts>;

    /// Returns true if the plan has a task that is ready or running.
    fn compute_plan_has_active_task(&self, plan_key: &ComputePlanKey) -> Result<bool> {
        Ok(self.count_compute_plan_tasks(plan_key)?.has_active_task())
    }
}

/// Plan persistence.
pub trait ComputePlanStore: Send + Sync {
    /// Gets a plan by key.
    fn get_compute_plan(&self, key: &ComputePlanKey) -> Result<Option<ComputePlan>>;

    /// Inserts a new plan.
    fn add_compute_plan(&self, plan: &ComputePlan) -> Result<()>;

    /// Replaces an existing plan.
    fn update_compute_plan(&self, plan: &ComputePlan) -> Result<()>;

    /// Queries plans in registration order.
    fn query_compute_plans(
        &self,
        pagination: &Pagination,
        filter: &PlanQueryFilter,
    ) -> Result<Page<ComputePlan>>;
}

/// Function persistence.
pub trait FunctionStore: Send + Sync {
    /// Gets a function by key.
    fn get_function(&self, key: &FunctionKey) -> Result<Option<Function>>;

    /// Inserts a new function.
    fn add_function(&self, function: &Function) -> Result<()>;

    /// Replaces an existing function.
    fn update_function(&self, function: &Function) -> Result<()>;

    /// Queries functions in registration order.
    fn query_functions(&self, pagination: &Pagination) -> Result<Page<Function>>;
}

/// Model persistence.
pub trait ModelStore: Send + Sync {
    /// Gets a model by key.
    fn get_model(&self, key: &AssetKey) -> Result<Option<Model>>;

    /// Inserts a new model.
    fn add_model(&self, model: &Model) -> Result<()>;

    /// Replaces an existing model.
    fn update_model(&self, model: &Model) -> Result<()>;

    /// Gets the models produced by a task.
    fn get_compute_task_models(&self, task_key: &ComputeTaskKey) -> Result<Vec<Model>>;
}

/// Performance persistence.
pub trait PerformanceStore: Send + Sync {
    /// Inserts a new performance.
    fn add_performance(&self, performance: &Performance) -> Result<()>;
}

/// Persistence of links between task outputs and produced assets.
pub trait OutputAssetStore: Send + Sync {
    /// Inserts a new link.
    fn add_compute_task_output_asset(&self, link: &ComputeTaskOutputAsset) -> Result<()>;

    /// Gets the links of a task, optionally restricted to one output.
    fn get_compute_task_output_assets(
        &self,
        task_key: &ComputeTaskKey,
        identifier: Option<&str>,
    ) -> Result<Vec<ComputeTaskOutputAsset>>;
}

/// Read access to data managers.
pub trait DataManagerStore: Send + Sync {
    /// Gets a data manager by key.
    fn get_data_manager(&self, key: &AssetKey) -> Result<Option<DataManager>>;
}

/// Read access to data samples.
pub trait DataSampleStore: Send + Sync {
    /// Gets a data sample by key.
    fn get_data_sample(&self, key: &AssetKey) -> Result<Option<DataSample>>;
}

/// Read access to the organization directory.
pub trait OrganizationStore: Send + Sync {
    /// Lists every known organization.
    fn get_all_organizations(&self) -> Result<Vec<OrganizationId>>;
}

/// Event persistence.
pub trait EventStore: Send + Sync {
    /// Appends events in order.
    ///
    /// Implementations must reject an event whose ID is already recorded.
    fn add_events(&self, events: &[Event]) -> Result<()>;

    /// Returns the number of recorded events.
    fn count_events(&self) -> Result<u64>;

    /// Queries events in recording order.
    fn query_events(
        &self,
        pagination: &Pagination,
        filter: &EventQueryFilter,
    ) -> Result<Page<Event>>;
}

/// Transaction control of a backend.
pub trait TransactionalStore: Send + Sync {
    /// Starts a transaction.
    fn begin(&self) -> Result<()>;

    /// Makes the writes of the current transaction durable.
    fn commit(&self) -> Result<()>;

    /// Discards the writes of the current transaction.
    fn rollback(&self) -> Result<()>;
}

/// A backend providing every capability the orchestrator needs.
pub trait LedgerStore:
    ComputeTaskStore
    + ComputePlanStore
    + FunctionStore
    + ModelStore
    + PerformanceStore
    + OutputAssetStore
    + DataManagerStore
    + DataSampleStore
    + OrganizationStore
    + EventStore
    + TransactionalStore
{
}

impl<T> LedgerStore for T where
    T: ComputeTaskStore
        + ComputePlanStore
        + FunctionStore
        + ModelStore
        + PerformanceStore
        + OutputAssetStore
        + DataManagerStore
        + DataSampleStore
        + OrganizationStore
        + EventStore
        + TransactionalStore
{
}

/// Slices `items` according to an offset-based pagination token.
///
/// Backends without native cursors can encode the offset of the next item as the
/// token.
///
/// # Errors
///
/// Returns a bad-request error if the token is not an offset.
pub fn paginate<T, I>(items: I, pagination: &Pagination) -> Result<Page<T>>
where
    I: IntoIterator<Item = T>,
{
    let offset = if pagination.token.is_empty() {
        0
    } else {
        pagination.token.parse::<usize>().map_err(|_| {
            Error::bad_request(format!("invalid pagination token '{}'", pagination.token))
        })?
    };
    let size = pagination.effective_size();

    let mut rest = items.into_iter().skip(offset);
    let page: Vec<T> = rest.by_ref().take(size).collect();
    let next_token = if rest.next().is_some() {
        (offset + page.len()).to_string()
    } else {
        String::new()
    };
    Ok(Page {
        items: page,
        next_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_positive_size_uses_default() {
        assert_eq!(Pagination::first(0).effective_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(Pagination::first(-3).effective_size(), DEFAULT_PAGE_SIZE);
        assert_eq!(Pagination::first(7).effective_size(), 7);
    }

    #[test]
    fn paginate_walks_all_items() {
        let items: Vec<u32> = (0..5).collect();
        let first = paginate(items.clone(), &Pagination::first(2)).unwrap();
        assert_eq!(first.items, vec![0, 1]);
        assert_eq!(first.next_token, "2");

        let second = paginate(items.clone(), &Pagination::new(first.next_token, 2)).unwrap();
        assert_eq!(second.items, vec![2, 3]);

        let last = paginate(items, &Pagination::new(second.next_token, 2)).unwrap();
        assert_eq!(last.items, vec![4]);
        assert!(last.is_last());
    }

    #[test]
    fn exact_fit_has_no_next_page() {
        let page = paginate(vec![1, 2], &Pagination::first(2)).unwrap();
        assert!(page.is_last());
    }

    #[test]
    fn malformed_token_is_bad_request() {
        let err = paginate(vec![1], &Pagination::new("abc", 2)).unwrap_err();
        assert!(matches!(err, Error::BadRequest { .. }));
    }
}
