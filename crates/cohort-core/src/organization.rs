//! Organization identifiers.
//!
//! Organizations are the participants of the shared ledger. Their IDs are the
//! principals that own assets, execute tasks, and appear in permission lists.
//!
//! # Example
//!
//! ```rust
//! use cohort_core::organization::OrganizationId;
//!
//! let org = OrganizationId::new("MyOrg1MSP").unwrap();
//! assert_eq!(org.as_str(), "MyOrg1MSP");
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Maximum length of an organization identifier.
const MAX_ORGANIZATION_ID_LEN: usize = 100;

/// Identifier of an organization participating in the ledger.
///
/// Organization IDs must be:
/// - Non-empty and at most 100 characters
/// - ASCII letters, digits, `-`, `_` or `.`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(String);

impl OrganizationId {
    /// Creates a new organization ID after validating the format.
    ///
    /// # Errors
    ///
    /// Returns an error if the identifier is empty, too long, or contains
    /// unsupported characters.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Creates an organization ID without validation.
    ///
    /// Intended for IDs that were already validated (e.g. read back from storage).
    #[must_use]
    pub fn new_unchecked(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the organization ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(Error::InvalidOrganization {
                message: "organization ID cannot be empty".to_string(),
            });
        }

        if id.len() > MAX_ORGANIZATION_ID_LEN {
            return Err(Error::InvalidOrganization {
                message: format!(
                    "organization ID '{id}' is too long (maximum {MAX_ORGANIZATION_ID_LEN} characters)"
                ),
            });
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(Error::InvalidOrganization {
                message: format!(
                    "organization ID '{id}' contains invalid characters (only letters, digits, '-', '_' and '.' allowed)"
                ),
            });
        }

        Ok(())
    }
}

impl fmt::Display for OrganizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for OrganizationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for OrganizationId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_organization_ids() {
        assert!(OrganizationId::new("MyOrg1MSP").is_ok());
        assert!(OrganizationId::new("org-2").is_ok());
        assert!(OrganizationId::new("hospital_a.eu").is_ok());
    }

    #[test]
    fn invalid_organization_ids() {
        assert!(OrganizationId::new("").is_err());
        assert!(OrganizationId::new("has spaces").is_err());
        assert!(OrganizationId::new("slash/org").is_err());
        assert!(OrganizationId::new("x".repeat(101)).is_err());
    }

    #[test]
    fn parses_from_str() {
        let org: OrganizationId = "org-1".parse().unwrap();
        assert_eq!(org.as_str(), "org-1");
    }
}
