//! # cohort-flow
//!
//! Orchestration core of the Cohort federated-learning ledger.
//!
//! This crate decides, for every request a participant submits, which compute
//! tasks, compute plans and functions change state and which events are
//! recorded:
//!
//! - **Batch Registration**: Tasks submitted together are ordered parent-first,
//!   validated against their function's contract, then written at once
//! - **State Machines**: Explicit transition tables for tasks and function builds
//! - **Cascades**: Cancelation, failure and completion propagate to dependents
//!   inside the same request
//! - **Event Trail**: Every mutation records an event stamped with the
//!   transaction time
//!
//! ## Guarantees
//!
//! - **Deterministic**: The core never reads a local clock or random source; the
//!   same request replayed at the same transaction time yields the same state
//! - **All-or-nothing**: Validation runs before any write, and the
//!   [`Orchestrator`] rolls back the store transaction of a failed request
//!
//! ## Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//!
//! use chrono::Utc;
//! use cohort_core::{ComputePlanKey, OrganizationId};
//! use cohort_flow::error::Result;
//! use cohort_flow::plan::{NewComputePlan, PlanStatus};
//! use cohort_flow::store::memory::InMemoryStore;
//! use cohort_flow::Orchestrator;
//!
//! # fn main() -> Result<()> {
//! let orchestrator = Orchestrator::new(InMemoryStore::new(), Utc::now);
//! let owner = OrganizationId::new("org-1")?;
//! let key = ComputePlanKey::generate();
//!
//! orchestrator.register_plan(
//!     &owner,
//!     NewComputePlan {
//!         key,
//!         name: "federated training".into(),
//!         tag: String::new(),
//!         metadata: BTreeMap::new(),
//!     },
//! )?;
//! assert_eq!(orchestrator.get_plan_status(&key)?, PlanStatus::Empty);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

// Internal modules - not exposed in public API.
pub(crate) mod dag;

pub mod asset;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod function;
pub mod metrics;
pub mod orchestration;
pub mod orchestrator;
pub mod plan;
pub mod recorder;
pub mod state_machine;
pub mod store;
pub mod task;
pub mod validation;

pub use dag::sort_new_tasks;
pub use orchestrator::Orchestrator;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::asset::{AssetKind, NewOutputAsset, NewTaskOutputAsset};
    pub use crate::config::OrchestratorConfig;
    pub use crate::context::{RequestContext, SteppedClock, TransactionClock};
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::function::{FunctionAction, FunctionStatus, NewFunction};
    pub use crate::orchestrator::Orchestrator;
    pub use crate::plan::{NewComputePlan, PlanAction, PlanStatus};
    pub use crate::store::memory::InMemoryStore;
    pub use crate::store::{LedgerStore, Page, Pagination};
    pub use crate::task::{ComputeTaskInput, NewComputeTask, TaskAction, TaskStatus};
}
