//! In-memory store implementation for testing.
//!
//! This module provides [`InMemoryStore`], an implementation of every storage
//! capability suitable for tests and development.
//!
//! ## Limitations
//!
//! - **NOT suitable for production**: No durability, no cross-process coordination
//! - **Single transaction**: `begin` snapshots the whole state; nested
//!   transactions are rejected
//! - **No persistence**: All state is lost when the process exits

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::{PoisonError, RwLock};

use cohort_core::{
    AssetKey, ComputePlanKey, ComputeTaskKey, EventId, FunctionKey, OrganizationId,
};

use super::{
    ComputePlanStore, ComputeTaskStore, DataManagerStore, DataSampleStore, EventQueryFilter,
    EventStore, FunctionStore, ModelStore, OrganizationStore, OutputAssetStore, Page, Pagination,
    PerformanceStore, PlanQueryFilter, TaskQueryFilter, TransactionalStore, paginate,
};
use crate::asset::{ComputeTaskOutputAsset, DataManager, DataSample, Model, Performance};
use crate::error::{Error, Result};
use crate::events::Event;
use crate::function::Function;
use crate::plan::{ComputePlan, TaskCounts};
use crate::task::{ComputeTask, TaskStatus};

/// Rows keyed by primary key, iterated in insertion order.
#[derive(Debug, Clone)]
struct Table<K, V> {
    rows: HashMap<K, V>,
    order: Vec<K>,
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            rows: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<K, V> Table<K, V>
where
    K: Copy + Eq + Hash + std::fmt::Display,
    V: Clone,
{
    fn get(&self, key: &K) -> Option<V> {
        self.rows.get(key).cloned()
    }

    fn insert(&mut self, entity: &'static str, key: K, value: V) -> Result<()> {
        if self.rows.contains_key(&key) {
            return Err(Error::conflict(format!("{entity} {key} already exists")));
        }
        self.rows.insert(key, value);
        self.order.push(key);
        Ok(())
    }

    fn replace(&mut self, entity: &'static str, key: K, value: V) -> Result<()> {
        let row = self
            .rows
            .get_mut(&key)
            .ok_or_else(|| Error::not_found(entity, key))?;
        *row = value;
        Ok(())
    }

    fn values(&self) -> impl Iterator<Item = &V> {
        self.order.iter().filter_map(|key| self.rows.get(key))
    }
}

#[derive(Debug, Clone, Default)]
struct LedgerState {
    tasks: Table<ComputeTaskKey, ComputeTask>,
    plans: Table<ComputePlanKey, ComputePlan>,
    functions: Table<FunctionKey, Function>,
    models: Table<AssetKey, Model>,
    data_managers: Table<AssetKey, DataManager>,
    data_samples: Table<AssetKey, DataSample>,
    performances: Vec<Performance>,
    output_assets: Vec<ComputeTaskOutputAsset>,
    organizations: Vec<OrganizationId>,
    events: Vec<Event>,
}

/// In-memory ledger store for testing.
///
/// Provides a thread-safe implementation of every storage trait using `RwLock`
/// for synchronization. Writes are visible to subsequent reads immediately;
/// [`TransactionalStore::rollback`] restores the state captured by `begin`.
///
/// ## Example
///
/// ```rust
/// use cohort_flow::store::memory::InMemoryStore;
///
/// let store = InMemoryStore::new();
/// // Use store in tests...
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<LedgerState>,
    snapshot: RwLock<Option<LedgerState>>,
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an organization in the directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn add_organization(&self, id: OrganizationId) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        if !state.organizations.contains(&id) {
            state.organizations.push(id);
        }
        Ok(())
    }

    /// Registers a data manager.
    ///
    /// # Errors
    ///
    /// Returns a conflict if the key is taken, or an error if the lock is poisoned.
    pub fn add_data_manager(&self, data_manager: DataManager) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state
            .data_managers
            .insert("data manager", data_manager.key, data_manager)
    }

    /// Registers a data sample.
    ///
    /// # Errors
    ///
    /// Returns a conflict if the key is taken, or an error if the lock is poisoned.
    pub fn add_data_sample(&self, data_sample: DataSample) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state
            .data_samples
            .insert("data sample", data_sample.key, data_sample)
    }

    /// Returns every recorded event in order.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn events(&self) -> Result<Vec<Event>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.events.clone())
    }

    /// Returns the number of recorded events.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn event_count(&self) -> Result<usize> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.events.len())
    }

    /// Returns true if a transaction is open.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn in_transaction(&self) -> Result<bool> {
        Ok(self.snapshot.read().map_err(poison_err)?.is_some())
    }
}

impl ComputeTaskStore for InMemoryStore {
    fn get_compute_task(&self, key: &ComputeTaskKey) -> Result<Option<ComputeTask>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.tasks.get(key))
    }

    fn add_compute_task(&self, task: &ComputeTask) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.tasks.insert("compute task", task.key, task.clone())
    }

    fn update_compute_task(&self, task: &ComputeTask) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.tasks.replace("compute task", task.key, task.clone())
    }

    fn get_compute_task_children(&self, key: &ComputeTaskKey) -> Result<Vec<ComputeTask>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state
            .tasks
            .values()
            .filter(|task| task.parent_task_keys().contains(key))
            .cloned()
            .collect())
    }

    fn query_compute_tasks(
        &self,
        pagination: &Pagination,
        filter: &TaskQueryFilter,
    ) -> Result<Page<ComputeTask>> {
        let state = self.state.read().map_err(poison_err)?;
        paginate(
            state.tasks.values().filter(|task| filter.matches(task)).cloned(),
            pagination,
        )
    }

    fn count_compute_plan_tasks(&self, plan_key: &ComputePlanKey) -> Result<TaskCounts> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(TaskCounts::from_statuses(
            state
                .tasks
                .values()
                .filter(|task| &task.compute_plan_key == plan_key)
                .map(|task| task.status),
        ))
    }

    fn compute_plan_has_active_task(&self, plan_key: &ComputePlanKey) -> Result<bool> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.tasks.values().any(|task| {
            &task.compute_plan_key == plan_key
                && matches!(task.status, TaskStatus::Todo | TaskStatus::Doing)
        }))
    }
}

impl ComputePlanStore for InMemoryStore {
    fn get_compute_plan(&self, key: &ComputePlanKey) -> Result<Option<ComputePlan>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.plans.get(key))
    }

    fn add_compute_plan(&self, plan: &ComputePlan) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.plans.insert("compute plan", plan.key, plan.clone())
    }

    fn update_compute_plan(&self, plan: &ComputePlan) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.plans.replace("compute plan", plan.key, plan.clone())
    }

    fn query_compute_plans(
        &self,
        pagination: &Pagination,
        filter: &PlanQueryFilter,
    ) -> Result<Page<ComputePlan>> {
        let state = self.state.read().map_err(poison_err)?;
        paginate(
            state
                .plans
                .values()
                .filter(|plan| filter.owner.as_ref().is_none_or(|owner| &plan.owner == owner))
                .cloned(),
            pagination,
        )
    }
}

impl FunctionStore for InMemoryStore {
    fn get_function(&self, key: &FunctionKey) -> Result<Option<Function>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.functions.get(key))
    }

    fn add_function(&self, function: &Function) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state
            .functions
            .insert("function", function.key, function.clone())
    }

    fn update_function(&self, function: &Function) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state
            .functions
            .replace("function", function.key, function.clone())
    }

    fn query_functions(&self, pagination: &Pagination) -> Result<Page<Function>> {
        let state = self.state.read().map_err(poison_err)?;
        paginate(state.functions.values().cloned(), pagination)
    }
}

impl ModelStore for InMemoryStore {
    fn get_model(&self, key: &AssetKey) -> Result<Option<Model>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.models.get(key))
    }

    fn add_model(&self, model: &Model) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.models.insert("model", model.key, model.clone())
    }

    fn update_model(&self, model: &Model) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.models.replace("model", model.key, model.clone())
    }

    fn get_compute_task_models(&self, task_key: &ComputeTaskKey) -> Result<Vec<Model>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state
            .models
            .values()
            .filter(|model| &model.compute_task_key == task_key)
            .cloned()
            .collect())
    }
}

impl PerformanceStore for InMemoryStore {
    fn add_performance(&self, performance: &Performance) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let key = performance.key();
        if state.performances.iter().any(|p| p.key() == key) {
            return Err(Error::conflict(format!("performance {key} already exists")));
        }
        state.performances.push(performance.clone());
        Ok(())
    }
}

impl OutputAssetStore for InMemoryStore {
    fn add_compute_task_output_asset(&self, link: &ComputeTaskOutputAsset) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        state.output_assets.push(link.clone());
        Ok(())
    }

    fn get_compute_task_output_assets(
        &self,
        task_key: &ComputeTaskKey,
        identifier: Option<&str>,
    ) -> Result<Vec<ComputeTaskOutputAsset>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state
            .output_assets
            .iter()
            .filter(|link| &link.compute_task_key == task_key)
            .filter(|link| identifier.is_none_or(|id| link.identifier == id))
            .cloned()
            .collect())
    }
}

impl DataManagerStore for InMemoryStore {
    fn get_data_manager(&self, key: &AssetKey) -> Result<Option<DataManager>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.data_managers.get(key))
    }
}

impl DataSampleStore for InMemoryStore {
    fn get_data_sample(&self, key: &AssetKey) -> Result<Option<DataSample>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.data_samples.get(key))
    }
}

impl OrganizationStore for InMemoryStore {
    fn get_all_organizations(&self) -> Result<Vec<OrganizationId>> {
        let state = self.state.read().map_err(poison_err)?;
        Ok(state.organizations.clone())
    }
}

impl EventStore for InMemoryStore {
    fn add_events(&self, events: &[Event]) -> Result<()> {
        let mut state = self.state.write().map_err(poison_err)?;
        let mut ids: HashSet<EventId> = state.events.iter().map(|event| event.id).collect();
        if let Some(duplicate) = events.iter().find(|event| !ids.insert(event.id)) {
            return Err(Error::conflict(format!(
                "event {} already exists",
                duplicate.id
            )));
        }
        state.events.extend_from_slice(events);
        Ok(())
    }

    fn count_events(&self) -> Result<u64> {
        let state = self.state.read().map_err(poison_err)?;
        u64::try_from(state.events.len())
            .map_err(|err| Error::storage_with_source("event count overflow", err))
    }

    fn query_events(
        &self,
        pagination: &Pagination,
        filter: &EventQueryFilter,
    ) -> Result<Page<Event>> {
        let state = self.state.read().map_err(poison_err)?;
        paginate(
            state.events.iter().filter(|event| filter.matches(event)).cloned(),
            pagination,
        )
    }
}

impl TransactionalStore for InMemoryStore {
    fn begin(&self) -> Result<()> {
        let mut snapshot = self.snapshot.write().map_err(poison_err)?;
        if snapshot.is_some() {
            return Err(Error::storage("a transaction is already open"));
        }
        let state = self.state.read().map_err(poison_err)?;
        *snapshot = Some(state.clone());
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        let mut snapshot = self.snapshot.write().map_err(poison_err)?;
        snapshot
            .take()
            .ok_or_else(|| Error::storage("no open transaction to commit"))?;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let mut snapshot = self.snapshot.write().map_err(poison_err)?;
        let saved = snapshot
            .take()
            .ok_or_else(|| Error::storage("no open transaction to roll back"))?;
        let mut state = self.state.write().map_err(poison_err)?;
        *state = saved;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use cohort_core::{Permission, Permissions};

    use super::*;
    use crate::events::{AssetType, EventAsset, EventKind};
    use crate::task::ComputeTaskInput;

    fn org() -> OrganizationId {
        OrganizationId::new_unchecked("org-1")
    }

    fn task(plan: ComputePlanKey, status: TaskStatus, parents: &[ComputeTaskKey]) -> ComputeTask {
        ComputeTask {
            key: ComputeTaskKey::generate(),
            owner: org(),
            worker: org(),
            compute_plan_key: plan,
            function_key: FunctionKey::generate(),
            status,
            rank: 0,
            inputs: parents
                .iter()
                .map(|p| ComputeTaskInput::parent_output("model", *p, "model"))
                .collect(),
            outputs: BTreeMap::new(),
            logs_permission: Permission::owner_only(&org()),
            creation_date: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn duplicate_task_conflicts() {
        let store = InMemoryStore::new();
        let t = task(ComputePlanKey::generate(), TaskStatus::Todo, &[]);
        store.add_compute_task(&t).unwrap();
        let err = store.add_compute_task(&t).unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[test]
    fn update_missing_task_is_not_found() {
        let store = InMemoryStore::new();
        let t = task(ComputePlanKey::generate(), TaskStatus::Todo, &[]);
        let err = store.update_compute_task(&t).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[test]
    fn children_are_listed_in_registration_order() {
        let store = InMemoryStore::new();
        let plan = ComputePlanKey::generate();
        let parent = task(plan, TaskStatus::Todo, &[]);
        let first = task(plan, TaskStatus::Waiting, &[parent.key]);
        let unrelated = task(plan, TaskStatus::Todo, &[]);
        let second = task(plan, TaskStatus::Waiting, &[parent.key]);
        for t in [&parent, &first, &unrelated, &second] {
            store.add_compute_task(t).unwrap();
        }

        let children: Vec<_> = store
            .get_compute_task_children(&parent.key)
            .unwrap()
            .into_iter()
            .map(|t| t.key)
            .collect();
        assert_eq!(children, vec![first.key, second.key]);
    }

    #[test]
    fn plan_counts_and_filters() {
        let store = InMemoryStore::new();
        let plan = ComputePlanKey::generate();
        store.add_compute_task(&task(plan, TaskStatus::Done, &[])).unwrap();
        store.add_compute_task(&task(plan, TaskStatus::Doing, &[])).unwrap();
        store
            .add_compute_task(&task(ComputePlanKey::generate(), TaskStatus::Doing, &[]))
            .unwrap();

        let counts = store.count_compute_plan_tasks(&plan).unwrap();
        assert_eq!(counts.total(), 2);
        assert_eq!(counts.doing, 1);
        assert!(store.compute_plan_has_active_task(&plan).unwrap());

        let idle = ComputePlanKey::generate();
        store.add_compute_task(&task(idle, TaskStatus::Waiting, &[])).unwrap();
        store.add_compute_task(&task(idle, TaskStatus::Done, &[])).unwrap();
        assert!(!store.compute_plan_has_active_task(&idle).unwrap());

        let filter = TaskQueryFilter {
            status: Some(TaskStatus::Doing),
            ..TaskQueryFilter::default()
        };
        let page = store
            .query_compute_tasks(&Pagination::default(), &filter)
            .unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.is_last());
    }

    #[test]
    fn rollback_restores_snapshot() {
        let store = InMemoryStore::new();
        let kept = task(ComputePlanKey::generate(), TaskStatus::Todo, &[]);
        store.add_compute_task(&kept).unwrap();

        store.begin().unwrap();
        assert!(store.in_transaction().unwrap());
        let discarded = task(ComputePlanKey::generate(), TaskStatus::Todo, &[]);
        store.add_compute_task(&discarded).unwrap();
        store.rollback().unwrap();

        assert!(store.compute_task_exists(&kept.key).unwrap());
        assert!(!store.compute_task_exists(&discarded.key).unwrap());
        assert!(!store.in_transaction().unwrap());
    }

    #[test]
    fn commit_keeps_writes_and_rejects_nesting() {
        let store = InMemoryStore::new();
        store.begin().unwrap();
        assert!(store.begin().is_err());
        let t = task(ComputePlanKey::generate(), TaskStatus::Todo, &[]);
        store.add_compute_task(&t).unwrap();
        store.commit().unwrap();
        assert!(store.compute_task_exists(&t.key).unwrap());
        assert!(store.commit().is_err());
    }

    #[test]
    fn duplicate_event_ids_are_rejected() {
        let store = InMemoryStore::new();
        let t = task(ComputePlanKey::generate(), TaskStatus::Todo, &[]);
        let event = Event {
            id: EventId::sequenced(Utc::now(), 0),
            asset_key: t.key.to_string(),
            asset_kind: AssetType::ComputeTask,
            event_kind: EventKind::AssetCreated,
            timestamp: Utc::now(),
            asset: EventAsset::ComputeTask(t),
            metadata: BTreeMap::new(),
        };
        store.add_events(&[event.clone()]).unwrap();

        let err = store.add_events(&[event.clone()]).unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        let mut other = event.clone();
        other.id = EventId::sequenced(event.timestamp, 1);
        let err = store.add_events(&[other.clone(), other]).unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        assert_eq!(store.count_events().unwrap(), 1);
    }

    #[test]
    fn model_lookup_by_task() {
        let store = InMemoryStore::new();
        let task_key = ComputeTaskKey::generate();
        let model = Model {
            key: AssetKey::generate(),
            compute_task_key: task_key,
            identifier: "model".into(),
            owner: org(),
            permissions: Permissions::owner_only(&org()),
            address: Some("s3://models/1".into()),
            creation_date: Utc::now(),
        };
        store.add_model(&model).unwrap();
        assert_eq!(store.get_compute_task_models(&task_key).unwrap(), vec![model]);
    }
}
