//! Compute tasks and their status state machine.
//!
//! This module provides:
//! - `TaskStatus`: The lifecycle status of a compute task
//! - `TaskAction`: Actions that move a task along its lifecycle
//! - `TASK_TRANSITIONS`: The legal `(status, action) -> status` edges
//! - `ComputeTask`: A persisted task
//! - `NewComputeTask`: A task registration request
//!
//! ```text
//!              mark ready            start             complete
//! ┌─────────┐ ──────────► ┌──────┐ ───────► ┌───────┐ ────────► ┌──────┐
//! │ WAITING │             │ TODO │          │ DOING │           │ DONE │
//! └─────────┘             └──────┘          └───────┘           └──────┘
//!      │                      │                 │
//!      └──────────────────────┴─────────────────┴──── cancel ──► CANCELED
//!                                                └─── fail ────► FAILED
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cohort_core::{
    AssetKey, ComputePlanKey, ComputeTaskKey, FunctionKey, NewPermissions, OrganizationId,
    Permission, Permissions,
};

use crate::state_machine::{Transition, TransitionTable};

/// Lifecycle status of a compute task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    /// Blocked on parents that are not done yet.
    #[default]
    Waiting,
    /// Ready to be picked up by its worker.
    Todo,
    /// Being executed by its worker.
    Doing,
    /// Completed successfully.
    Done,
    /// Canceled by its owner or by a cascade.
    Canceled,
    /// Failed during execution or by a cascade.
    Failed,
}

impl TaskStatus {
    /// All statuses, in lifecycle order.
    pub const ALL: [Self; 6] = [
        Self::Waiting,
        Self::Todo,
        Self::Doing,
        Self::Done,
        Self::Canceled,
        Self::Failed,
    ];

    /// Returns true if this is a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Canceled | Self::Failed)
    }

    /// Returns the wire label of this status.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Todo => "TODO",
            Self::Doing => "DOING",
            Self::Done => "DONE",
            Self::Canceled => "CANCELED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Actions accepted by the task lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskAction {
    /// Abort the task (owner).
    Cancel,
    /// All parents are done (system).
    MarkReady,
    /// Execution started (worker).
    Start,
    /// Every output was registered (system).
    Complete,
    /// Execution failed (worker).
    Fail,
}

impl fmt::Display for TaskAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Cancel => "cancel",
            Self::MarkReady => "mark ready",
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Fail => "fail",
        };
        f.write_str(label)
    }
}

/// Legal task transitions.
pub const TASK_TRANSITIONS: TransitionTable<TaskStatus, TaskAction> = TransitionTable::new(&[
    Transition {
        action: TaskAction::Cancel,
        sources: &[TaskStatus::Todo, TaskStatus::Waiting, TaskStatus::Doing],
        destination: TaskStatus::Canceled,
    },
    Transition {
        action: TaskAction::MarkReady,
        sources: &[TaskStatus::Waiting],
        destination: TaskStatus::Todo,
    },
    Transition {
        action: TaskAction::Start,
        sources: &[TaskStatus::Todo],
        destination: TaskStatus::Doing,
    },
    Transition {
        action: TaskAction::Complete,
        sources: &[TaskStatus::Doing],
        destination: TaskStatus::Done,
    },
    Transition {
        action: TaskAction::Fail,
        sources: &[TaskStatus::Todo, TaskStatus::Waiting, TaskStatus::Doing],
        destination: TaskStatus::Failed,
    },
]);

/// Where a task input comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputRef {
    /// An already registered asset.
    AssetKey(AssetKey),
    /// An output of a parent task.
    #[serde(rename_all = "camelCase")]
    ParentTaskOutput {
        /// Key of the parent task.
        parent_task_key: ComputeTaskKey,
        /// Output identifier on the parent task.
        output_identifier: String,
    },
}

/// One input of a compute task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeTaskInput {
    /// Input identifier in the function contract.
    pub identifier: String,
    /// Source of the input.
    pub reference: InputRef,
}

impl ComputeTaskInput {
    /// Input referencing an existing asset.
    #[must_use]
    pub fn asset(identifier: impl Into<String>, key: AssetKey) -> Self {
        Self {
            identifier: identifier.into(),
            reference: InputRef::AssetKey(key),
        }
    }

    /// Input referencing a parent task output.
    #[must_use]
    pub fn parent_output(
        identifier: impl Into<String>,
        parent_task_key: ComputeTaskKey,
        output_identifier: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            reference: InputRef::ParentTaskOutput {
                parent_task_key,
                output_identifier: output_identifier.into(),
            },
        }
    }
}

/// An output slot of a compute task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeTaskOutput {
    /// Permissions applied to assets produced under this output.
    pub permissions: Permissions,
    /// Produced assets may be deleted once every consumer is done.
    #[serde(default)]
    pub transient: bool,
}

/// Requested output slot of a new compute task.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComputeTaskOutput {
    /// Requested permissions.
    pub permissions: NewPermissions,
    /// Produced assets may be deleted once every consumer is done.
    #[serde(default)]
    pub transient: bool,
}

/// A registered compute task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeTask {
    /// Key of the task.
    pub key: ComputeTaskKey,
    /// Submitting organization.
    pub owner: OrganizationId,
    /// Executing organization.
    pub worker: OrganizationId,
    /// Plan grouping the task.
    pub compute_plan_key: ComputePlanKey,
    /// Function invoked by the task.
    pub function_key: FunctionKey,
    /// Current status.
    pub status: TaskStatus,
    /// Depth in the dependency graph.
    pub rank: u32,
    /// Ordered inputs.
    pub inputs: Vec<ComputeTaskInput>,
    /// Output slots by identifier.
    pub outputs: BTreeMap<String, ComputeTaskOutput>,
    /// Who may read the execution logs.
    pub logs_permission: Permission,
    /// Registration date.
    pub creation_date: DateTime<Utc>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl ComputeTask {
    /// Returns the distinct parent task keys, in input order.
    #[must_use]
    pub fn parent_task_keys(&self) -> Vec<ComputeTaskKey> {
        parent_keys(&self.inputs)
    }
}

/// Registration request for a compute task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComputeTask {
    /// Key chosen by the submitter.
    pub key: ComputeTaskKey,
    /// Function to invoke.
    pub function_key: FunctionKey,
    /// Plan to register the task in.
    pub compute_plan_key: ComputePlanKey,
    /// Explicit worker; inferred from the data manager when omitted.
    #[serde(default)]
    pub worker: Option<OrganizationId>,
    /// Ordered inputs.
    #[serde(default)]
    pub inputs: Vec<ComputeTaskInput>,
    /// Requested output slots.
    #[serde(default)]
    pub outputs: BTreeMap<String, NewComputeTaskOutput>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl NewComputeTask {
    /// Returns the distinct parent task keys, in input order.
    #[must_use]
    pub fn parent_task_keys(&self) -> Vec<ComputeTaskKey> {
        parent_keys(&self.inputs)
    }
}

fn parent_keys(inputs: &[ComputeTaskInput]) -> Vec<ComputeTaskKey> {
    let mut keys = Vec::new();
    for input in inputs {
        if let InputRef::ParentTaskOutput {
            parent_task_key, ..
        } = &input.reference
        {
            if !keys.contains(parent_task_key) {
                keys.push(*parent_task_key);
            }
        }
    }
    keys
}

/// Derives the status of a new task from its parents' statuses.
///
/// Any canceled or failed parent cancels the task; otherwise the task is ready
/// when every parent is done (or there is none) and waits in every other case.
#[must_use]
pub fn initial_status(parent_statuses: &[TaskStatus]) -> TaskStatus {
    if parent_statuses
        .iter()
        .any(|s| matches!(s, TaskStatus::Canceled | TaskStatus::Failed))
    {
        TaskStatus::Canceled
    } else if parent_statuses.iter().all(|s| *s == TaskStatus::Done) {
        TaskStatus::Todo
    } else {
        TaskStatus::Waiting
    }
}

/// Computes the rank of a task from its parents' ranks.
#[must_use]
pub fn rank_from_parents(parent_ranks: impl IntoIterator<Item = u32>) -> u32 {
    parent_ranks
        .into_iter()
        .max()
        .map_or(0, |max| max.saturating_add(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_lifecycle() {
        let mut status = TaskStatus::Waiting;
        for action in [TaskAction::MarkReady, TaskAction::Start, TaskAction::Complete] {
            status = TASK_TRANSITIONS.next(status, action).unwrap();
        }
        assert_eq!(status, TaskStatus::Done);
    }

    #[test]
    fn transition_table_matches_lifecycle() {
        use TaskAction::{Cancel, Complete, Fail, MarkReady, Start};
        use TaskStatus::{Canceled, Doing, Done, Failed, Todo, Waiting};

        let expected = [
            (Cancel, vec![Waiting, Todo, Doing], Canceled),
            (MarkReady, vec![Waiting], Todo),
            (Start, vec![Todo], Doing),
            (Complete, vec![Doing], Done),
            (Fail, vec![Waiting, Todo, Doing], Failed),
        ];

        for (action, sources, destination) in expected {
            for from in TaskStatus::ALL {
                let next = TASK_TRANSITIONS.next(from, action);
                if sources.contains(&from) {
                    assert_eq!(next, Some(destination), "{action} from {from}");
                } else {
                    assert_eq!(next, None, "{action} from {from}");
                }
            }
        }
    }

    #[test]
    fn terminal_statuses() {
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Canceled.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Doing.is_terminal());
    }

    #[test]
    fn initial_status_from_parents() {
        assert_eq!(initial_status(&[]), TaskStatus::Todo);
        assert_eq!(initial_status(&[TaskStatus::Done, TaskStatus::Done]), TaskStatus::Todo);
        assert_eq!(initial_status(&[TaskStatus::Done, TaskStatus::Waiting]), TaskStatus::Waiting);
        assert_eq!(initial_status(&[TaskStatus::Doing, TaskStatus::Failed]), TaskStatus::Canceled);
        assert_eq!(initial_status(&[TaskStatus::Canceled]), TaskStatus::Canceled);
    }

    #[test]
    fn rank_is_one_above_deepest_parent() {
        assert_eq!(rank_from_parents([]), 0);
        assert_eq!(rank_from_parents([0]), 1);
        assert_eq!(rank_from_parents([2, 5, 1]), 6);
    }

    #[test]
    fn parent_keys_are_deduplicated_in_order() {
        let a = ComputeTaskKey::generate();
        let b = ComputeTaskKey::generate();
        let task = NewComputeTask {
            key: ComputeTaskKey::generate(),
            function_key: FunctionKey::generate(),
            compute_plan_key: ComputePlanKey::generate(),
            worker: None,
            inputs: vec![
                ComputeTaskInput::parent_output("models", b, "model"),
                ComputeTaskInput::asset("opener", AssetKey::generate()),
                ComputeTaskInput::parent_output("models", a, "model"),
                ComputeTaskInput::parent_output("models", b, "model"),
            ],
            outputs: BTreeMap::new(),
            metadata: BTreeMap::new(),
        };
        assert_eq!(task.parent_task_keys(), vec![b, a]);
    }

    #[test]
    fn input_ref_wire_shape() {
        let parent = ComputeTaskKey::generate();
        let input = ComputeTaskInput::parent_output("model", parent, "trained");
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json["reference"]["parentTaskOutput"]["outputIdentifier"], "trained");
    }
}
