//! Error types for the orchestration domain.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The result type used throughout cohort-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable, machine-readable classification of an orchestration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// An asset with the same key already exists.
    Conflict,
    /// A referenced asset does not exist.
    NotFound,
    /// The requester is not allowed to perform the operation.
    PermissionDenied,
    /// The request violates a structural or business rule.
    InvalidAsset,
    /// The request is malformed or ambiguous.
    BadRequest,
    /// The request is valid but uses an unsupported combination.
    Unimplemented,
    /// An invariant was violated; signals a bug rather than a user error.
    Internal,
    /// The action targets an asset that already reached a terminal state.
    TerminatedAction,
}

impl ErrorKind {
    /// Returns the wire code of this kind.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Conflict => "CONFLICT",
            Self::NotFound => "NOT_FOUND",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::InvalidAsset => "INVALID_ASSET",
            Self::BadRequest => "BAD_REQUEST",
            Self::Unimplemented => "UNIMPLEMENTED",
            Self::Internal => "INTERNAL",
            Self::TerminatedAction => "TERMINATED_ACTION",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur in orchestration operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An asset with the same key already exists.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflicting asset.
        message: String,
    },

    /// A referenced asset was not found.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Kind of asset that was looked up.
        entity: &'static str,
        /// The key that was not found.
        key: String,
    },

    /// The requester is not allowed to perform the operation.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Why the requester was rejected.
        message: String,
    },

    /// The request violates a structural or business rule.
    #[error("invalid asset: {message}")]
    InvalidAsset {
        /// Description of the violated rule.
        message: String,
    },

    /// A task batch could not be ordered.
    ///
    /// Raised when the batch contains a cycle or references a parent that is
    /// neither persisted nor part of the batch.
    #[error("invalid asset: {count} task(s) have unresolved parents (cycle or unknown parent)")]
    UnresolvedTasks {
        /// Number of tasks that could not be placed in the order.
        count: usize,
    },

    /// The request is malformed.
    #[error("bad request: {message}")]
    BadRequest {
        /// Description of the malformed part.
        message: String,
    },

    /// The request uses an unsupported combination.
    #[error("unimplemented: {message}")]
    Unimplemented {
        /// Description of the unsupported combination.
        message: String,
    },

    /// An action was requested on an asset whose lifecycle is over.
    #[error("terminated action: {message}")]
    TerminatedAction {
        /// Description of the rejected action.
        message: String,
    },

    /// An invalid state transition was attempted.
    #[error("invalid state transition: cannot {action} {entity} {key} in status {from}")]
    InvalidStateTransition {
        /// Kind of asset (compute task, function, compute plan).
        entity: &'static str,
        /// Key of the asset.
        key: String,
        /// The current status.
        from: String,
        /// The attempted action.
        action: String,
        /// Whether the current status is terminal.
        terminal: bool,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration values are invalid.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the invalid configuration.
        message: String,
    },

    /// An invariant was violated.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the violated invariant.
        message: String,
    },

    /// An error from cohort-core.
    #[error("core error: {0}")]
    Core(#[from] cohort_core::Error),
}

impl Error {
    /// Creates a conflict error.
    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Creates a permission-denied error.
    #[must_use]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Creates an invalid-asset error.
    #[must_use]
    pub fn invalid_asset(message: impl Into<String>) -> Self {
        Self::InvalidAsset {
            message: message.into(),
        }
    }

    /// Creates a bad-request error.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest {
            message: message.into(),
        }
    }

    /// Creates an unimplemented error.
    #[must_use]
    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::Unimplemented {
            message: message.into(),
        }
    }

    /// Creates a terminated-action error.
    #[must_use]
    pub fn terminated_action(message: impl Into<String>) -> Self {
        Self::TerminatedAction {
            message: message.into(),
        }
    }

    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns the stable classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::InvalidAsset { .. } | Self::UnresolvedTasks { .. } => ErrorKind::InvalidAsset,
            Self::BadRequest { .. } => ErrorKind::BadRequest,
            Self::Unimplemented { .. } => ErrorKind::Unimplemented,
            Self::TerminatedAction { .. } => ErrorKind::TerminatedAction,
            Self::InvalidStateTransition { terminal, .. } => {
                if *terminal {
                    ErrorKind::TerminatedAction
                } else {
                    ErrorKind::BadRequest
                }
            }
            Self::Storage { .. } | Self::Configuration { .. } | Self::Internal { .. } => {
                ErrorKind::Internal
            }
            Self::Core(core) => match core {
                cohort_core::Error::InvalidId { .. }
                | cohort_core::Error::InvalidOrganization { .. }
                | cohort_core::Error::UnknownOrganization { .. } => ErrorKind::BadRequest,
                cohort_core::Error::Internal { .. } => ErrorKind::Internal,
            },
        }
    }

    /// Returns true if this error reports an illegal state-machine transition.
    ///
    /// Cascades swallow exactly these errors; everything else aborts the request.
    #[must_use]
    pub const fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidStateTransition { .. })
    }
}
