//! Ledger events emitted by orchestration operations.
//!
//! Every mutation records an event carrying a typed snapshot of the affected
//! asset. Events are persisted in the same transaction as the mutation and later
//! forwarded to subscribers by collaborators outside this crate.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cohort_core::EventId;

use crate::asset::{ComputeTaskOutputAsset, Model, Performance};
use crate::function::Function;
use crate::plan::ComputePlan;
use crate::task::ComputeTask;

/// Metadata key holding the status reached by an update.
pub const METADATA_STATUS: &str = "status";
/// Metadata key holding the reason of an update.
pub const METADATA_REASON: &str = "reason";

/// What happened to the asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// The asset was registered.
    AssetCreated,
    /// The asset changed.
    AssetUpdated,
    /// The asset was disabled.
    AssetDisabled,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::AssetCreated => "ASSET_CREATED",
            Self::AssetUpdated => "ASSET_UPDATED",
            Self::AssetDisabled => "ASSET_DISABLED",
        };
        f.write_str(label)
    }
}

/// Type of asset an event is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetType {
    /// A compute task.
    ComputeTask,
    /// A compute plan.
    ComputePlan,
    /// A function.
    Function,
    /// A model.
    Model,
    /// A performance.
    Performance,
    /// A task output link.
    ComputeTaskOutputAsset,
}

/// Snapshot of the asset an event is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "asset", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventAsset {
    /// A compute task.
    ComputeTask(ComputeTask),
    /// A compute plan.
    ComputePlan(ComputePlan),
    /// A function.
    Function(Function),
    /// A model.
    Model(Model),
    /// A performance.
    Performance(Performance),
    /// A task output link.
    ComputeTaskOutputAsset(ComputeTaskOutputAsset),
}

impl EventAsset {
    /// Returns the asset type of the snapshot.
    #[must_use]
    pub const fn asset_type(&self) -> AssetType {
        match self {
            Self::ComputeTask(_) => AssetType::ComputeTask,
            Self::ComputePlan(_) => AssetType::ComputePlan,
            Self::Function(_) => AssetType::Function,
            Self::Model(_) => AssetType::Model,
            Self::Performance(_) => AssetType::Performance,
            Self::ComputeTaskOutputAsset(_) => AssetType::ComputeTaskOutputAsset,
        }
    }

    /// Returns the key of the asset.
    #[must_use]
    pub fn asset_key(&self) -> String {
        match self {
            Self::ComputeTask(task) => task.key.to_string(),
            Self::ComputePlan(plan) => plan.key.to_string(),
            Self::Function(function) => function.key.to_string(),
            Self::Model(model) => model.key.to_string(),
            Self::Performance(performance) => performance.key(),
            Self::ComputeTaskOutputAsset(link) => link.asset_key.clone(),
        }
    }
}

/// An event awaiting identity and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    /// What happened.
    pub kind: EventKind,
    /// Snapshot of the asset after the mutation.
    pub asset: EventAsset,
    /// Extra key/value details.
    pub metadata: BTreeMap<String, String>,
}

impl NewEvent {
    /// A creation event.
    #[must_use]
    pub fn created(asset: EventAsset) -> Self {
        Self {
            kind: EventKind::AssetCreated,
            asset,
            metadata: BTreeMap::new(),
        }
    }

    /// An update event without details.
    #[must_use]
    pub fn updated(asset: EventAsset) -> Self {
        Self {
            kind: EventKind::AssetUpdated,
            asset,
            metadata: BTreeMap::new(),
        }
    }

    /// An update event recording a status change and its reason.
    #[must_use]
    pub fn status_updated(asset: EventAsset, status: impl ToString, reason: &str) -> Self {
        Self::updated(asset)
            .with_metadata(METADATA_STATUS, status.to_string())
            .with_metadata(METADATA_REASON, reason)
    }

    /// A disable event.
    #[must_use]
    pub fn disabled(asset: EventAsset) -> Self {
        Self {
            kind: EventKind::AssetDisabled,
            asset,
            metadata: BTreeMap::new(),
        }
    }

    /// Adds a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A recorded ledger event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Identifier derived from the transaction time and position.
    pub id: EventId,
    /// Key of the asset.
    pub asset_key: String,
    /// Type of the asset.
    pub asset_kind: AssetType,
    /// What happened.
    pub event_kind: EventKind,
    /// Transaction time.
    pub timestamp: DateTime<Utc>,
    /// Snapshot of the asset.
    #[serde(flatten)]
    pub asset: EventAsset,
    /// Extra key/value details.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Event {
    /// Returns a metadata value.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}
