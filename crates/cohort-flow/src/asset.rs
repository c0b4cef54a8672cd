//! Data assets read and produced by compute tasks.
//!
//! Data managers and data samples are registered by collaborators outside the
//! orchestrator; tasks only reference them. Models and performances are produced
//! by tasks and linked back to the producing output through
//! [`ComputeTaskOutputAsset`].

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cohort_core::{AssetKey, ComputeTaskKey, OrganizationId, Permission, Permissions};

/// Kind of asset a function input or output carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AssetKind {
    /// A trained model.
    Model,
    /// A data manager (opener of a dataset).
    DataManager,
    /// A data sample belonging to one or more data managers.
    DataSample,
    /// A performance score.
    Performance,
}

impl AssetKind {
    /// Returns the wire label of this kind.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Model => "MODEL",
            Self::DataManager => "DATA_MANAGER",
            Self::DataSample => "DATA_SAMPLE",
            Self::Performance => "PERFORMANCE",
        }
    }
}

impl fmt::Display for AssetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// A registered data manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataManager {
    /// Key of the data manager.
    pub key: AssetKey,
    /// Human-readable name.
    pub name: String,
    /// Organization owning the data; tasks using it run on this organization.
    pub owner: OrganizationId,
    /// Who may process or download the data.
    pub permissions: Permissions,
    /// Who may read the logs of tasks using this data.
    pub logs_permission: Permission,
    /// Registration date.
    pub creation_date: DateTime<Utc>,
}

/// A registered data sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataSample {
    /// Key of the sample.
    pub key: AssetKey,
    /// Organization owning the sample.
    pub owner: OrganizationId,
    /// Data managers the sample is linked to.
    pub data_manager_keys: Vec<AssetKey>,
    /// Registration date.
    pub creation_date: DateTime<Utc>,
}

/// A model produced by a compute task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Model {
    /// Key of the model.
    pub key: AssetKey,
    /// Task that produced the model.
    pub compute_task_key: ComputeTaskKey,
    /// Output identifier the model was registered under.
    pub identifier: String,
    /// Owner of the producing task.
    pub owner: OrganizationId,
    /// Permissions inherited from the task output.
    pub permissions: Permissions,
    /// Storage address; `None` once the model has been disabled.
    pub address: Option<String>,
    /// Registration date.
    pub creation_date: DateTime<Utc>,
}

impl Model {
    /// Returns true if the model artifact has been deleted.
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.address.is_none()
    }
}

/// A performance score produced by a compute task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Performance {
    /// Task that produced the score.
    pub compute_task_key: ComputeTaskKey,
    /// Output identifier the score was registered under.
    pub identifier: String,
    /// The score.
    pub value: f32,
    /// Registration date.
    pub creation_date: DateTime<Utc>,
}

impl Performance {
    /// Returns the composite key identifying this performance.
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}|{}", self.compute_task_key, self.identifier)
    }
}

/// Link between a task output and an asset it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeTaskOutputAsset {
    /// Producing task.
    pub compute_task_key: ComputeTaskKey,
    /// Output identifier.
    pub identifier: String,
    /// Kind of the produced asset.
    pub asset_kind: AssetKind,
    /// Key of the produced asset.
    pub asset_key: String,
}

/// An asset submitted by a worker for one of a task's outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTaskOutputAsset {
    /// Output identifier the asset is registered under.
    pub identifier: String,
    /// The produced asset.
    pub asset: NewOutputAsset,
}

/// Payload of a produced asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NewOutputAsset {
    /// A model stored at `address`.
    Model {
        /// Key of the new model.
        key: AssetKey,
        /// Storage address of the artifact.
        address: String,
    },
    /// A performance score.
    Performance {
        /// The score.
        value: f32,
    },
}

impl NewOutputAsset {
    /// Returns the kind of the produced asset.
    #[must_use]
    pub const fn kind(&self) -> AssetKind {
        match self {
            Self::Model { .. } => AssetKind::Model,
            Self::Performance { .. } => AssetKind::Performance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn asset_kind_wire_names() {
        let json = serde_json::to_string(&AssetKind::DataManager).unwrap();
        assert_eq!(json, "\"DATA_MANAGER\"");
        assert_eq!(AssetKind::Performance.to_string(), "PERFORMANCE");
    }

    #[test]
    fn performance_key_combines_task_and_identifier() {
        let task = ComputeTaskKey::generate();
        let perf = Performance {
            compute_task_key: task,
            identifier: "score".into(),
            value: 0.9,
            creation_date: Utc::now(),
        };
        assert_eq!(perf.key(), format!("{task}|score"));
    }

    #[test]
    fn new_output_asset_kind() {
        let model = NewOutputAsset::Model {
            key: AssetKey::generate(),
            address: "s3://bucket/model".into(),
        };
        assert_eq!(model.kind(), AssetKind::Model);
        assert_eq!(NewOutputAsset::Performance { value: 1.0 }.kind(), AssetKind::Performance);
    }
}
