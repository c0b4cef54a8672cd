//! Request-scoped state.
//!
//! A [`RequestContext`] lives for exactly one orchestration request. It holds the
//! transaction time, the ledger position of its next event and a cache of the entities the
//! request already loaded or wrote. The cache is authoritative for the rest of
//! the request: cascades see the statuses written earlier in the same request
//! even if the backend does not offer read-your-writes.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

use cohort_core::{AssetKey, ComputePlanKey, ComputeTaskKey, EventId, FunctionKey, OrganizationId};

use crate::asset::DataManager;
use crate::error::{Error, Result};
use crate::function::Function;
use crate::plan::ComputePlan;
use crate::store::{
    ComputePlanStore, ComputeTaskStore, DataManagerStore, EventStore, FunctionStore,
    OrganizationStore,
};
use crate::task::ComputeTask;

/// Source of the transaction time.
///
/// The execution environment supplies the time (e.g. a consensus timestamp) so
/// that replays of a transaction produce identical state.
pub trait TransactionClock: Send + Sync {
    /// Returns the time of the transaction about to run.
    fn transaction_time(&self) -> DateTime<Utc>;
}

impl<F> TransactionClock for F
where
    F: Fn() -> DateTime<Utc> + Send + Sync,
{
    fn transaction_time(&self) -> DateTime<Utc> {
        self()
    }
}

/// A clock that advances by a fixed step every time it is read.
///
/// Useful in tests: every transaction gets a distinct, predictable time.
#[derive(Debug)]
pub struct SteppedClock {
    next: Mutex<DateTime<Utc>>,
    step: Duration,
}

impl SteppedClock {
    /// Creates a clock starting at `start` and advancing by one second per read.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self::with_step(start, Duration::seconds(1))
    }

    /// Creates a clock with a custom step.
    #[must_use]
    pub fn with_step(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            next: Mutex::new(start),
            step,
        }
    }
}

impl TransactionClock for SteppedClock {
    fn transaction_time(&self) -> DateTime<Utc> {
        let mut next = self.next.lock().unwrap_or_else(PoisonError::into_inner);
        let now = *next;
        *next = now + self.step;
        now
    }
}

/// State shared by every step of one orchestration request.
#[derive(Debug)]
pub struct RequestContext {
    transaction_time: DateTime<Utc>,
    event_sequence: Option<u64>,
    tasks: HashMap<ComputeTaskKey, ComputeTask>,
    plans: HashMap<ComputePlanKey, ComputePlan>,
    functions: HashMap<FunctionKey, Function>,
    data_managers: HashMap<AssetKey, DataManager>,
    organizations: Option<Vec<OrganizationId>>,
}

impl RequestContext {
    /// Creates the context of a request running at `transaction_time`.
    #[must_use]
    pub fn new(transaction_time: DateTime<Utc>) -> Self {
        Self {
            transaction_time,
            event_sequence: None,
            tasks: HashMap::new(),
            plans: HashMap::new(),
            functions: HashMap::new(),
            data_managers: HashMap::new(),
            organizations: None,
        }
    }

    /// Returns the transaction time.
    #[must_use]
    pub const fn transaction_time(&self) -> DateTime<Utc> {
        self.transaction_time
    }

    /// Returns the identifier of the next event of this request.
    ///
    /// The sequence continues from the number of events already in the ledger,
    /// read once per request, so two transactions sharing a timestamp still get
    /// distinct identifiers and a replay on the same state yields the same ones.
    ///
    /// # Errors
    ///
    /// Returns an error if the event count cannot be read.
    pub fn next_event_id(&mut self, store: &dyn EventStore) -> Result<EventId> {
        let sequence = match self.event_sequence {
            Some(sequence) => sequence,
            None => store.count_events()?,
        };
        self.event_sequence = Some(sequence + 1);
        Ok(EventId::sequenced(self.transaction_time, sequence))
    }

    /// Finds a task, consulting the request cache first.
    ///
    /// # Errors
    ///
    /// Returns an error if the store lookup fails.
    pub fn find_task(
        &mut self,
        store: &dyn ComputeTaskStore,
        key: &ComputeTaskKey,
    ) -> Result<Option<ComputeTask>> {
        if let Some(task) = self.tasks.get(key) {
            return Ok(Some(task.clone()));
        }
        let found = store.get_compute_task(key)?;
        if let Some(task) = &found {
            self.tasks.insert(task.key, task.clone());
        }
        Ok(found)
    }

    /// Gets a task, consulting the request cache first.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the task does not exist.
    pub fn task(
        &mut self,
        store: &dyn ComputeTaskStore,
        key: &ComputeTaskKey,
    ) -> Result<ComputeTask> {
        self.find_task(store, key)?
            .ok_or_else(|| Error::not_found("compute task", key))
    }

    /// Records the latest version of a task.
    pub fn cache_task(&mut self, task: ComputeTask) {
        self.tasks.insert(task.key, task);
    }

    /// Gets a plan, consulting the request cache first.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the plan does not exist.
    pub fn plan(
        &mut self,
        store: &dyn ComputePlanStore,
        key: &ComputePlanKey,
    ) -> Result<ComputePlan> {
        if let Some(plan) = self.plans.get(key) {
            return Ok(plan.clone());
        }
        let plan = store
            .get_compute_plan(key)?
            .ok_or_else(|| Error::not_found("compute plan", key))?;
        self.plans.insert(plan.key, plan.clone());
        Ok(plan)
    }

    /// Records the latest version of a plan.
    pub fn cache_plan(&mut self, plan: ComputePlan) {
        self.plans.insert(plan.key, plan);
    }

    /// Gets a function, consulting the request cache first.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the function does not exist.
    pub fn function(
        &mut self,
        store: &dyn FunctionStore,
        key: &FunctionKey,
    ) -> Result<Function> {
        if let Some(function) = self.functions.get(key) {
            return Ok(function.clone());
        }
        let function = store
            .get_function(key)?
            .ok_or_else(|| Error::not_found("function", key))?;
        self.functions.insert(function.key, function.clone());
        Ok(function)
    }

    /// Records the latest version of a function.
    pub fn cache_function(&mut self, function: Function) {
        self.functions.insert(function.key, function);
    }

    /// Gets a data manager, consulting the request cache first.
    ///
    /// # Errors
    ///
    /// Returns a not-found error if the data manager does not exist.
    pub fn data_manager(
        &mut self,
        store: &dyn DataManagerStore,
        key: &AssetKey,
    ) -> Result<DataManager> {
        if let Some(data_manager) = self.data_managers.get(key) {
            return Ok(data_manager.clone());
        }
        let data_manager = store
            .get_data_manager(key)?
            .ok_or_else(|| Error::not_found("data manager", key))?;
        self.data_managers
            .insert(data_manager.key, data_manager.clone());
        Ok(data_manager)
    }

    /// Returns the organization directory, loading it once per request.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory lookup fails.
    pub fn organizations(&mut self, store: &dyn OrganizationStore) -> Result<Vec<OrganizationId>> {
        if let Some(organizations) = &self.organizations {
            return Ok(organizations.clone());
        }
        let organizations = store.get_all_organizations()?;
        self.organizations = Some(organizations.clone());
        Ok(organizations)
    }
}
