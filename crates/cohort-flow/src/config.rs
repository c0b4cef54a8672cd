//! Orchestrator configuration.
//!
//! Limits are explicit so that every execution node replaying a transaction
//! applies the same bounds.

use std::str::FromStr;

use crate::error::{Error, Result};

const ENV_MAX_TASK_BATCH: &str = "COHORT_MAX_TASK_BATCH";
const ENV_CASCADE_PAGE_SIZE: &str = "COHORT_CASCADE_PAGE_SIZE";

const DEFAULT_MAX_TASK_BATCH: usize = 10_000;
const DEFAULT_CASCADE_PAGE_SIZE: u32 = 50;

/// Limits applied by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Maximum number of tasks in one registration batch.
    pub max_task_batch: usize,
    /// Page size used when the orchestrator walks query results itself.
    pub cascade_page_size: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_task_batch: DEFAULT_MAX_TASK_BATCH,
            cascade_page_size: DEFAULT_CASCADE_PAGE_SIZE,
        }
    }
}

impl OrchestratorConfig {
    /// Loads the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a value is not a positive integer or
    /// exceeds the supported range.
    pub fn from_env() -> Result<Self> {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Loads the configuration with a custom environment source.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a value is not a positive integer or
    /// exceeds the supported range.
    pub fn from_env_with<F>(get_env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            max_task_batch: parse_positive_env(&get_env, ENV_MAX_TASK_BATCH, DEFAULT_MAX_TASK_BATCH)?,
            cascade_page_size: parse_positive_env(
                &get_env,
                ENV_CASCADE_PAGE_SIZE,
                DEFAULT_CASCADE_PAGE_SIZE,
            )?,
        })
    }
}

fn parse_positive_env<T, F>(get_env: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr + Default + PartialEq,
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = get_env(key) else {
        return Ok(default);
    };

    let parsed = raw.trim().parse::<T>().map_err(|_| {
        Error::configuration(format!(
            "{key} must be a positive integer within the supported range, got '{raw}'"
        ))
    })?;
    if parsed == T::default() {
        return Err(Error::configuration(format!(
            "{key} must be greater than zero"
        )));
    }
    Ok(parsed)
}
