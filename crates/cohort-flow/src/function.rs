//! Functions and their build lifecycle.
//!
//! A function declares named input and output contracts. Tasks invoke a function
//! and are validated against those contracts. The function's own status follows
//! its build lifecycle:
//!
//! ```text
//! WAITING ──start build──► BUILDING ──mark ready──► READY
//!    │                        │  │
//!    └────────cancel──────────┘  └──fail──► FAILED
//!             ▼
//!         CANCELED
//! ```

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cohort_core::{FunctionKey, NewPermissions, OrganizationId, Permissions};

use crate::asset::AssetKind;
use crate::state_machine::{Transition, TransitionTable};

/// Build status of a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionStatus {
    /// Registered, build not started.
    #[default]
    Waiting,
    /// Image build in progress.
    Building,
    /// Built and usable.
    Ready,
    /// Build canceled.
    Canceled,
    /// Build failed.
    Failed,
}

impl FunctionStatus {
    /// Returns true if the build lifecycle is over.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Ready | Self::Canceled | Self::Failed)
    }

    /// Returns the wire label of this status.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Building => "BUILDING",
            Self::Ready => "READY",
            Self::Canceled => "CANCELED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for FunctionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Actions accepted by the function build lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionAction {
    /// Abort the build.
    Cancel,
    /// The build started.
    StartBuild,
    /// The build finished successfully.
    MarkReady,
    /// The build failed.
    Fail,
}

impl fmt::Display for FunctionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Cancel => "cancel",
            Self::StartBuild => "start build",
            Self::MarkReady => "mark ready",
            Self::Fail => "fail",
        };
        f.write_str(label)
    }
}

/// Legal function transitions.
pub const FUNCTION_TRANSITIONS: TransitionTable<FunctionStatus, FunctionAction> =
    TransitionTable::new(&[
        Transition {
            action: FunctionAction::Cancel,
            sources: &[FunctionStatus::Waiting, FunctionStatus::Building],
            destination: FunctionStatus::Canceled,
        },
        Transition {
            action: FunctionAction::StartBuild,
            sources: &[FunctionStatus::Waiting],
            destination: FunctionStatus::Building,
        },
        Transition {
            action: FunctionAction::MarkReady,
            sources: &[FunctionStatus::Building],
            destination: FunctionStatus::Ready,
        },
        Transition {
            action: FunctionAction::Fail,
            sources: &[FunctionStatus::Building],
            destination: FunctionStatus::Failed,
        },
    ]);

/// Contract of a function input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionInput {
    /// Kind of asset expected.
    pub kind: AssetKind,
    /// The input may be omitted.
    #[serde(default)]
    pub optional: bool,
    /// The input may be provided several times.
    #[serde(default)]
    pub multiple: bool,
}

/// Contract of a function output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionOutput {
    /// Kind of asset produced.
    pub kind: AssetKind,
    /// Several assets may be produced under this output.
    #[serde(default)]
    pub multiple: bool,
}

/// A registered function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Function {
    /// Key of the function.
    pub key: FunctionKey,
    /// Human-readable name.
    pub name: String,
    /// Registering organization.
    pub owner: OrganizationId,
    /// Who may use or download the function.
    pub permissions: Permissions,
    /// Input contracts by identifier.
    pub inputs: BTreeMap<String, FunctionInput>,
    /// Output contracts by identifier.
    pub outputs: BTreeMap<String, FunctionOutput>,
    /// Build status.
    pub status: FunctionStatus,
    /// Registration date.
    pub creation_date: DateTime<Utc>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Function {
    /// Returns the identifier of the data manager input, if the contract declares one.
    #[must_use]
    pub fn data_manager_input(&self) -> Option<&str> {
        self.inputs
            .iter()
            .find(|(_, input)| input.kind == AssetKind::DataManager)
            .map(|(identifier, _)| identifier.as_str())
    }
}

/// Registration request for a function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFunction {
    /// Key chosen by the submitter.
    pub key: FunctionKey,
    /// Human-readable name.
    pub name: String,
    /// Requested permissions.
    pub new_permissions: NewPermissions,
    /// Input contracts by identifier.
    #[serde(default)]
    pub inputs: BTreeMap<String, FunctionInput>,
    /// Output contracts by identifier.
    #[serde(default)]
    pub outputs: BTreeMap<String, FunctionOutput>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_STATUSES: [FunctionStatus; 5] = [
        FunctionStatus::Waiting,
        FunctionStatus::Building,
        FunctionStatus::Ready,
        FunctionStatus::Canceled,
        FunctionStatus::Failed,
    ];

    #[test]
    fn build_lifecycle_happy_path() {
        let building = FUNCTION_TRANSITIONS
            .next(FunctionStatus::Waiting, FunctionAction::StartBuild)
            .unwrap();
        assert_eq!(building, FunctionStatus::Building);
        assert_eq!(
            FUNCTION_TRANSITIONS.next(building, FunctionAction::MarkReady),
            Some(FunctionStatus::Ready)
        );
    }

    #[test]
    fn cancel_only_before_build_completes() {
        assert!(FUNCTION_TRANSITIONS.can_apply(FunctionStatus::Waiting, FunctionAction::Cancel));
        assert!(FUNCTION_TRANSITIONS.can_apply(FunctionStatus::Building, FunctionAction::Cancel));
        assert!(!FUNCTION_TRANSITIONS.can_apply(FunctionStatus::Ready, FunctionAction::Cancel));
    }

    #[test]
    fn fail_requires_building() {
        assert!(!FUNCTION_TRANSITIONS.can_apply(FunctionStatus::Waiting, FunctionAction::Fail));
        assert_eq!(
            FUNCTION_TRANSITIONS.next(FunctionStatus::Building, FunctionAction::Fail),
            Some(FunctionStatus::Failed)
        );
    }

    #[test]
    fn terminal_statuses_accept_no_action() {
        for status in ALL_STATUSES.into_iter().filter(FunctionStatus::is_terminal) {
            for action in [
                FunctionAction::Cancel,
                FunctionAction::StartBuild,
                FunctionAction::MarkReady,
                FunctionAction::Fail,
            ] {
                assert!(!FUNCTION_TRANSITIONS.can_apply(status, action), "{action} from {status}");
            }
        }
    }

    #[test]
    fn status_wire_names() {
        let json = serde_json::to_string(&FunctionStatus::Building).unwrap();
        assert_eq!(json, "\"BUILDING\"");
    }
}
