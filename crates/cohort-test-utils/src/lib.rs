//! Shared test utilities for Cohort integration tests.
//!
//! This crate provides:
//! - [`TestLedger`]: An orchestrator over an in-memory store, seeded with
//!   organizations, a dataset, a compute plan and ready functions
//! - Factory methods for task registration requests
//! - Custom assertion helpers
//!
//! # Example
//!
//! ```rust
//! use cohort_flow::task::TaskStatus;
//! use cohort_test_utils::{TestLedger, assert_task_status};
//!
//! let ledger = TestLedger::new();
//! let task = ledger.train_task(None);
//! let key = task.key;
//! ledger.register(vec![task]).unwrap();
//! assert_task_status(&ledger, &key, TaskStatus::Todo);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::panic)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;

pub use assertions::*;
pub use fixtures::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("cohort_flow=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
