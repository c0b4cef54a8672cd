//! Error types and result aliases for Cohort primitives.
//!
//! These errors cover the shared building blocks (identifiers, organizations,
//! permissions). Orchestration errors live in `cohort-flow` and wrap these.

/// The result type used throughout `cohort-core`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when building shared primitives.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// An organization identifier is malformed.
    #[error("invalid organization id: {message}")]
    InvalidOrganization {
        /// Description of the violation.
        message: String,
    },

    /// A permission names an organization missing from the directory.
    #[error("unknown organization in authorized ids: {id}")]
    UnknownOrganization {
        /// The organization that could not be found.
        id: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
