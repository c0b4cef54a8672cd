//! # cohort-core
//!
//! Shared primitives for the Cohort ledger orchestrator.
//!
//! This crate provides the foundational types used by every Cohort component:
//!
//! - **Keys**: Strongly-typed ULID keys for tasks, plans, functions and assets
//! - **Organizations**: Validated identifiers of ledger participants
//! - **Permissions**: The access-control algebra (union, intersection, process checks)
//! - **Error Types**: Shared error definitions and result types
//! - **Observability**: Logging initialization
//!
//! ## Example
//!
//! ```rust
//! use cohort_core::prelude::*;
//!
//! let owner = OrganizationId::new("org-1").unwrap();
//! let perm = Permission::owner_only(&owner);
//! assert!(perm.can_process(&owner));
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod error;
pub mod id;
pub mod observability;
pub mod organization;
pub mod permission;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::id::{AssetKey, ComputePlanKey, ComputeTaskKey, EventId, FunctionKey};
    pub use crate::organization::OrganizationId;
    pub use crate::permission::{NewPermissions, Permission, Permissions};
}

pub use error::{Error, Result};
pub use id::{AssetKey, ComputePlanKey, ComputeTaskKey, EventId, FunctionKey};
pub use observability::{LogFormat, init_logging, request_span};
pub use organization::OrganizationId;
pub use permission::{NewPermissions, Permission, Permissions};
