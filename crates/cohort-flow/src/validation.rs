//! Structural validation of functions and tasks.
//!
//! These checks only look at the request and at already-resolved entities; the
//! checks that need storage lookups (data samples, models, parent outputs) run in
//! the task orchestrator.

use std::collections::{BTreeMap, HashMap};

use cohort_core::{OrganizationId, Permission};

use crate::asset::{AssetKind, DataManager};
use crate::error::{Error, Result};
use crate::function::{Function, FunctionInput, FunctionOutput};
use crate::task::{ComputeTask, ComputeTaskInput, NewComputeTaskOutput};

/// Validates the input and output contracts of a new function.
///
/// # Errors
///
/// Returns an invalid-asset error describing the first violated rule.
pub fn validate_function_contract(
    inputs: &BTreeMap<String, FunctionInput>,
    outputs: &BTreeMap<String, FunctionOutput>,
) -> Result<()> {
    let mut data_managers = 0_usize;
    let mut has_data_samples = false;
    for (identifier, input) in inputs {
        match input.kind {
            AssetKind::DataManager => {
                data_managers += 1;
                if input.optional || input.multiple {
                    return Err(Error::invalid_asset(format!(
                        "data manager input '{identifier}' cannot be optional or multiple"
                    )));
                }
            }
            AssetKind::DataSample => has_data_samples = true,
            AssetKind::Model | AssetKind::Performance => {}
        }
    }
    if data_managers > 1 {
        return Err(Error::invalid_asset(
            "a function accepts at most one data manager input",
        ));
    }
    if has_data_samples && data_managers == 0 {
        return Err(Error::invalid_asset(
            "data sample inputs require a data manager input",
        ));
    }

    for (identifier, output) in outputs {
        match output.kind {
            AssetKind::Model => {}
            AssetKind::Performance if output.multiple => {
                return Err(Error::invalid_asset(format!(
                    "performance output '{identifier}' cannot be multiple"
                )));
            }
            AssetKind::Performance => {}
            AssetKind::DataManager | AssetKind::DataSample => {
                return Err(Error::invalid_asset(format!(
                    "output '{identifier}' has kind {} but only MODEL and PERFORMANCE can be produced",
                    output.kind
                )));
            }
        }
    }
    if outputs.is_empty() {
        return Err(Error::invalid_asset(
            "a function must declare at least one output",
        ));
    }
    Ok(())
}

/// Checks task input identifiers against the function's input contract.
///
/// Every identifier must be declared, repeated identifiers must be declared
/// multiple, and every mandatory input must be provided.
///
/// # Errors
///
/// Returns an invalid-asset error for contract violations and an unimplemented
/// error for performance inputs.
pub fn validate_input_identifiers(function: &Function, inputs: &[ComputeTaskInput]) -> Result<()> {
    let mut provided: HashMap<&str, usize> = HashMap::new();
    for input in inputs {
        let contract = function.inputs.get(&input.identifier).ok_or_else(|| {
            Error::invalid_asset(format!(
                "input '{}' is not declared by function {}",
                input.identifier, function.key
            ))
        })?;
        if contract.kind == AssetKind::Performance {
            return Err(Error::unimplemented(format!(
                "input '{}' of kind PERFORMANCE is not supported",
                input.identifier
            )));
        }

        let count = provided.entry(input.identifier.as_str()).or_insert(0);
        *count += 1;
        if *count > 1 && !contract.multiple {
            return Err(Error::invalid_asset(format!(
                "input '{}' is provided several times but is not multiple",
                input.identifier
            )));
        }
    }

    for (identifier, contract) in &function.inputs {
        if !contract.optional && !provided.contains_key(identifier.as_str()) {
            return Err(Error::invalid_asset(format!(
                "mandatory input '{identifier}' is missing"
            )));
        }
    }
    Ok(())
}

/// Checks requested task outputs against the function's output contract.
///
/// # Errors
///
/// Returns an invalid-asset error if an output is missing or undeclared, or if a
/// performance output is not public or is transient.
pub fn validate_outputs(
    function: &Function,
    outputs: &BTreeMap<String, NewComputeTaskOutput>,
) -> Result<()> {
    for identifier in outputs.keys() {
        if !function.outputs.contains_key(identifier) {
            return Err(Error::invalid_asset(format!(
                "output '{identifier}' is not declared by function {}",
                function.key
            )));
        }
    }

    for (identifier, contract) in &function.outputs {
        let output = outputs.get(identifier).ok_or_else(|| {
            Error::invalid_asset(format!("output '{identifier}' is missing"))
        })?;
        if contract.kind == AssetKind::Performance {
            if !output.permissions.public {
                return Err(Error::invalid_asset(format!(
                    "performance output '{identifier}' must be public"
                )));
            }
            if output.transient {
                return Err(Error::invalid_asset(format!(
                    "performance output '{identifier}' cannot be transient"
                )));
            }
        }
    }
    Ok(())
}

/// Determines which organization executes a task.
///
/// Tasks reading a data manager run on the data manager's owner. Other tasks
/// (e.g. aggregations) need an explicit worker.
///
/// # Errors
///
/// Returns a bad-request error if an explicit worker contradicts the data
/// manager's owner or if no worker can be determined.
pub fn resolve_worker(
    requested: Option<&OrganizationId>,
    data_manager: Option<&DataManager>,
) -> Result<OrganizationId> {
    match (requested, data_manager) {
        (Some(worker), Some(dm)) if worker != &dm.owner => Err(Error::bad_request(format!(
            "worker {worker} does not match data manager owner {}",
            dm.owner
        ))),
        (_, Some(dm)) => Ok(dm.owner.clone()),
        (Some(worker), None) => Ok(worker.clone()),
        (None, None) => Err(Error::bad_request(
            "worker cannot be inferred without a data manager input and must be specified",
        )),
    }
}

/// Determines who may read a task's logs.
///
/// Tasks reading a data manager inherit its logs permission; other tasks start
/// from the owner and accumulate their parents' logs permissions.
#[must_use]
pub fn resolve_logs_permission(
    owner: &OrganizationId,
    data_manager: Option<&DataManager>,
    parents: &[ComputeTask],
) -> Permission {
    if let Some(dm) = data_manager {
        return dm.logs_permission.clone();
    }
    parents
        .iter()
        .fold(Permission::owner_only(owner), |acc, parent| {
            acc.union(&parent.logs_permission)
        })
}
