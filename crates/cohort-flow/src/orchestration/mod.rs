//! Orchestration services.
//!
//! Each service is a thin, request-independent view over the storage
//! capabilities it needs. All request-scoped state lives in the
//! [`RequestContext`](crate::context::RequestContext) passed to every call, so
//! services can be rebuilt freely and cascades can call across services.
//!
//! ## Cascades
//!
//! ```text
//! task CANCELED/FAILED ──► children: cancel / fail   (illegal transitions swallowed)
//! task FAILED          ──► plan: failure date
//! task DONE            ──► children: mark ready when every parent is DONE
//! plan canceled        ──► every task of the plan: cancel
//! function READY       ──► WAITING tasks: mark ready when every parent is DONE
//! function CANCELED    ──► WAITING/TODO tasks: cancel
//! function FAILED      ──► WAITING/TODO tasks: fail
//! ```

pub mod compute_plan;
pub mod compute_task;
pub mod function;
pub mod permission;

use crate::config::OrchestratorConfig;
use crate::metrics::FlowMetrics;
use crate::recorder::EventRecorder;
use crate::store::{
    ComputePlanStore, ComputeTaskStore, DataManagerStore, DataSampleStore, EventStore,
    FunctionStore, LedgerStore, ModelStore, OrganizationStore, OutputAssetStore,
    PerformanceStore,
};

pub use compute_plan::ComputePlanService;
pub use compute_task::ComputeTaskService;
pub use function::FunctionService;
pub use permission::PermissionService;

/// Storage capabilities shared by the orchestration services.
///
/// Assembled once per request from a backend and copied into each service.
#[derive(Clone, Copy)]
pub struct Stores<'a> {
    /// Task persistence.
    pub tasks: &'a dyn ComputeTaskStore,
    /// Plan persistence.
    pub plans: &'a dyn ComputePlanStore,
    /// Function persistence.
    pub functions: &'a dyn FunctionStore,
    /// Model persistence.
    pub models: &'a dyn ModelStore,
    /// Performance persistence.
    pub performances: &'a dyn PerformanceStore,
    /// Task output links.
    pub output_assets: &'a dyn OutputAssetStore,
    /// Data managers.
    pub data_managers: &'a dyn DataManagerStore,
    /// Data samples.
    pub data_samples: &'a dyn DataSampleStore,
    /// Organization directory.
    pub organizations: &'a dyn OrganizationStore,
    /// Event persistence.
    pub events: &'a dyn EventStore,
}

impl<'a> Stores<'a> {
    /// Uses one backend for every capability.
    #[must_use]
    pub fn from_ledger<S: LedgerStore>(store: &'a S) -> Self {
        Self {
            tasks: store,
            plans: store,
            functions: store,
            models: store,
            performances: store,
            output_assets: store,
            data_managers: store,
            data_samples: store,
            organizations: store,
            events: store,
        }
    }

    /// Returns an event recorder over the event store.
    #[must_use]
    pub fn recorder(&self) -> EventRecorder<'a> {
        EventRecorder::new(self.events)
    }
}

impl std::fmt::Debug for Stores<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stores").finish_non_exhaustive()
    }
}

/// Dependencies shared by every service.
#[derive(Debug, Clone, Copy)]
pub struct ServiceDeps<'a> {
    /// Storage capabilities.
    pub stores: Stores<'a>,
    /// Limits.
    pub config: OrchestratorConfig,
    /// Metrics recorder.
    pub metrics: FlowMetrics,
}

impl<'a> ServiceDeps<'a> {
    /// Bundles the dependencies.
    #[must_use]
    pub const fn new(stores: Stores<'a>, config: OrchestratorConfig) -> Self {
        Self {
            stores,
            config,
            metrics: FlowMetrics::new(),
        }
    }

    /// The task service.
    #[must_use]
    pub const fn tasks(self) -> ComputeTaskService<'a> {
        ComputeTaskService::new(self)
    }

    /// The plan service.
    #[must_use]
    pub const fn plans(self) -> ComputePlanService<'a> {
        ComputePlanService::new(self)
    }

    /// The function service.
    #[must_use]
    pub const fn functions(self) -> FunctionService<'a> {
        FunctionService::new(self)
    }

    /// The permission service.
    #[must_use]
    pub const fn permissions(self) -> PermissionService<'a> {
        PermissionService::new(self)
    }
}
