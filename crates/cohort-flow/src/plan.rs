//! Compute plans and aggregate status derivation.
//!
//! A plan groups related tasks. Its status is never stored: it is derived from the
//! counts of its tasks' statuses and from its cancelation date.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cohort_core::{ComputePlanKey, OrganizationId};

use crate::task::TaskStatus;

/// A registered compute plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputePlan {
    /// Key of the plan.
    pub key: ComputePlanKey,
    /// Registering organization.
    pub owner: OrganizationId,
    /// Human-readable name.
    pub name: String,
    /// Free-form tag.
    #[serde(default)]
    pub tag: String,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Registration date.
    pub creation_date: DateTime<Utc>,
    /// Set when the owner canceled the plan.
    #[serde(default)]
    pub cancelation_date: Option<DateTime<Utc>>,
    /// Set when the first task of the plan failed.
    #[serde(default)]
    pub failure_date: Option<DateTime<Utc>>,
}

/// Registration request for a compute plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComputePlan {
    /// Key chosen by the submitter.
    pub key: ComputePlanKey,
    /// Human-readable name.
    pub name: String,
    /// Free-form tag.
    #[serde(default)]
    pub tag: String,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// Actions accepted by a compute plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanAction {
    /// Cancel the plan and every task in it.
    Cancel,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancel => f.write_str("cancel"),
        }
    }
}

/// Derived status of a compute plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    /// The plan has no task.
    Empty,
    /// Every task is waiting.
    Waiting,
    /// No task started yet but some are ready.
    Todo,
    /// At least one task is running.
    Doing,
    /// Every task is done.
    Done,
    /// The plan or one of its tasks was canceled.
    Canceled,
    /// One of its tasks failed.
    Failed,
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Empty => "EMPTY",
            Self::Waiting => "WAITING",
            Self::Todo => "TODO",
            Self::Doing => "DOING",
            Self::Done => "DONE",
            Self::Canceled => "CANCELED",
            Self::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

/// Counts of a plan's tasks per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCounts {
    /// Tasks in WAITING.
    pub waiting: u64,
    /// Tasks in TODO.
    pub todo: u64,
    /// Tasks in DOING.
    pub doing: u64,
    /// Tasks in DONE.
    pub done: u64,
    /// Tasks in CANCELED.
    pub canceled: u64,
    /// Tasks in FAILED.
    pub failed: u64,
}

impl TaskCounts {
    /// Builds counts from a list of statuses.
    #[must_use]
    pub fn from_statuses(statuses: impl IntoIterator<Item = TaskStatus>) -> Self {
        let mut counts = Self::default();
        for status in statuses {
            counts.increment(status);
        }
        counts
    }

    /// Adds one task in `status`.
    pub fn increment(&mut self, status: TaskStatus) {
        let slot = match status {
            TaskStatus::Waiting => &mut self.waiting,
            TaskStatus::Todo => &mut self.todo,
            TaskStatus::Doing => &mut self.doing,
            TaskStatus::Done => &mut self.done,
            TaskStatus::Canceled => &mut self.canceled,
            TaskStatus::Failed => &mut self.failed,
        };
        *slot += 1;
    }

    /// Total number of tasks.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.waiting + self.todo + self.doing + self.done + self.canceled + self.failed
    }

    /// Returns true if some task is ready or running.
    #[must_use]
    pub const fn has_active_task(&self) -> bool {
        self.todo > 0 || self.doing > 0
    }
}

/// Derives a plan status from task counts and the plan's cancelation date.
#[must_use]
pub fn plan_status(counts: &TaskCounts, cancelation_date: Option<DateTime<Utc>>) -> PlanStatus {
    let total = counts.total();
    if total == 0 {
        PlanStatus::Empty
    } else if counts.done == total {
        PlanStatus::Done
    } else if counts.canceled > 0 || cancelation_date.is_some() {
        PlanStatus::Canceled
    } else if counts.failed > 0 {
        PlanStatus::Failed
    } else if counts.waiting == total {
        PlanStatus::Waiting
    } else if counts.doing > 0 {
        PlanStatus::Doing
    } else {
        PlanStatus::Todo
    }
}

impl ComputePlan {
    /// Returns true if the plan was canceled or one of its tasks failed.
    #[must_use]
    pub const fn is_canceled_or_failed(&self) -> bool {
        self.cancelation_date.is_some() || self.failure_date.is_some()
    }

    /// Returns true if the plan accepts no further status-changing action.
    ///
    /// A plan is terminated once canceled, once one of its tasks failed, or once
    /// every one of its tasks is done. Individually canceled tasks do not
    /// terminate the plan.
    #[must_use]
    pub const fn is_terminated(&self, counts: &TaskCounts) -> bool {
        self.is_canceled_or_failed() || (counts.total() > 0 && counts.done == counts.total())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counts(statuses: &[(TaskStatus, usize)]) -> TaskCounts {
        TaskCounts::from_statuses(
            statuses
                .iter()
                .flat_map(|(status, n)| std::iter::repeat_n(*status, *n)),
        )
    }

    #[test]
    fn empty_plan() {
        assert_eq!(plan_status(&TaskCounts::default(), None), PlanStatus::Empty);
        assert_eq!(
            plan_status(&TaskCounts::default(), Some(Utc::now())),
            PlanStatus::Empty
        );
    }

    #[test]
    fn all_done_wins_over_cancelation_date() {
        let c = counts(&[(TaskStatus::Done, 11)]);
        assert_eq!(plan_status(&c, None), PlanStatus::Done);
        assert_eq!(plan_status(&c, Some(Utc::now())), PlanStatus::Done);
    }

    #[test]
    fn one_failure_fails_the_plan() {
        let c = counts(&[(TaskStatus::Done, 10), (TaskStatus::Failed, 1)]);
        assert_eq!(plan_status(&c, None), PlanStatus::Failed);
    }

    #[test]
    fn cancelation_takes_precedence_over_failure() {
        let c = counts(&[(TaskStatus::Canceled, 1), (TaskStatus::Failed, 1)]);
        assert_eq!(plan_status(&c, None), PlanStatus::Canceled);
        let running = counts(&[(TaskStatus::Doing, 2)]);
        assert_eq!(plan_status(&running, Some(Utc::now())), PlanStatus::Canceled);
    }

    #[test]
    fn waiting_doing_todo() {
        assert_eq!(
            plan_status(&counts(&[(TaskStatus::Waiting, 3)]), None),
            PlanStatus::Waiting
        );
        assert_eq!(
            plan_status(&counts(&[(TaskStatus::Waiting, 2), (TaskStatus::Doing, 1)]), None),
            PlanStatus::Doing
        );
        assert_eq!(
            plan_status(&counts(&[(TaskStatus::Waiting, 2), (TaskStatus::Todo, 1)]), None),
            PlanStatus::Todo
        );
        assert_eq!(
            plan_status(&counts(&[(TaskStatus::Done, 2), (TaskStatus::Todo, 1)]), None),
            PlanStatus::Todo
        );
    }

    #[test]
    fn termination() {
        let mut plan = ComputePlan {
            key: ComputePlanKey::generate(),
            owner: OrganizationId::new_unchecked("org-1"),
            name: "plan".into(),
            tag: String::new(),
            metadata: BTreeMap::new(),
            creation_date: Utc::now(),
            cancelation_date: None,
            failure_date: None,
        };
        let partly_canceled = counts(&[(TaskStatus::Canceled, 1), (TaskStatus::Todo, 2)]);
        assert!(!plan.is_terminated(&partly_canceled));
        assert!(plan.is_terminated(&counts(&[(TaskStatus::Done, 3)])));
        assert!(!plan.is_terminated(&TaskCounts::default()));

        plan.failure_date = Some(Utc::now());
        assert!(plan.is_terminated(&partly_canceled));
    }

    #[test]
    fn active_tasks() {
        assert!(counts(&[(TaskStatus::Todo, 1)]).has_active_task());
        assert!(!counts(&[(TaskStatus::Waiting, 1), (TaskStatus::Done, 1)]).has_active_task());
    }
}
