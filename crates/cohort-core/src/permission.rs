//! Access-control algebra.
//!
//! A [`Permission`] is either public or an explicit allow-list of organizations.
//! Validation and propagation combine permissions with two operators:
//!
//! - [`Permission::union`]: public if either side is, otherwise the merged allow-list
//! - [`Permission::intersection`]: public only if both sides are; a public side is
//!   neutral, so the private side's allow-list is kept as-is
//!
//! Both operators are commutative. Allow-lists are ordered sets, so results are
//! deterministic regardless of argument order.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::organization::OrganizationId;

/// A single access-control rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    /// Everyone may access the asset.
    pub public: bool,
    /// Organizations allowed to access the asset when not public.
    #[serde(default)]
    pub authorized_ids: BTreeSet<OrganizationId>,
}

impl Permission {
    /// A public permission.
    #[must_use]
    pub fn public() -> Self {
        Self {
            public: true,
            authorized_ids: BTreeSet::new(),
        }
    }

    /// A private permission only granted to `owner`.
    #[must_use]
    pub fn owner_only(owner: &OrganizationId) -> Self {
        Self {
            public: false,
            authorized_ids: BTreeSet::from([owner.clone()]),
        }
    }

    /// Builds the permission requested by `owner`.
    ///
    /// Private requests may only name organizations present in `directory`, and the
    /// owner is always added to the allow-list.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownOrganization`] if a requested ID is not in `directory`.
    pub fn for_owner(
        owner: &OrganizationId,
        request: &NewPermissions,
        directory: &[OrganizationId],
    ) -> Result<Self> {
        if request.public {
            return Ok(Self::public());
        }

        let mut authorized_ids = BTreeSet::new();
        for id in &request.authorized_ids {
            if !directory.contains(id) {
                return Err(Error::UnknownOrganization { id: id.to_string() });
            }
            authorized_ids.insert(id.clone());
        }
        authorized_ids.insert(owner.clone());

        Ok(Self {
            public: false,
            authorized_ids,
        })
    }

    /// Returns true if `requester` may process the asset.
    #[must_use]
    pub fn can_process(&self, requester: &OrganizationId) -> bool {
        self.public || self.authorized_ids.contains(requester)
    }

    /// Returns the union of two permissions.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let public = self.public || other.public;
        let authorized_ids = if public {
            BTreeSet::new()
        } else {
            self.authorized_ids
                .union(&other.authorized_ids)
                .cloned()
                .collect()
        };
        Self {
            public,
            authorized_ids,
        }
    }

    /// Returns the intersection of two permissions.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        let authorized_ids = match (self.public, other.public) {
            (true, true) => BTreeSet::new(),
            (true, false) => other.authorized_ids.clone(),
            (false, true) => self.authorized_ids.clone(),
            (false, false) => self
                .authorized_ids
                .intersection(&other.authorized_ids)
                .cloned()
                .collect(),
        };
        Self {
            public: self.public && other.public,
            authorized_ids,
        }
    }
}

/// Process and download permissions of an asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permissions {
    /// Who may use the asset as a computation input.
    pub process: Permission,
    /// Who may download the asset.
    pub download: Permission,
}

impl Permissions {
    /// Public process and download permissions.
    #[must_use]
    pub fn public() -> Self {
        Self {
            process: Permission::public(),
            download: Permission::public(),
        }
    }

    /// Process and download permissions restricted to `owner`.
    #[must_use]
    pub fn owner_only(owner: &OrganizationId) -> Self {
        Self {
            process: Permission::owner_only(owner),
            download: Permission::owner_only(owner),
        }
    }

    /// Builds process and download permissions from a single request.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownOrganization`] if a requested ID is not in `directory`.
    pub fn for_owner(
        owner: &OrganizationId,
        request: &NewPermissions,
        directory: &[OrganizationId],
    ) -> Result<Self> {
        let process = Permission::for_owner(owner, request, directory)?;
        Ok(Self {
            download: process.clone(),
            process,
        })
    }

    /// Returns true if `requester` may process the asset.
    #[must_use]
    pub fn can_process(&self, requester: &OrganizationId) -> bool {
        self.process.can_process(requester)
    }

    /// Returns true if `requester` may download the asset.
    #[must_use]
    pub fn can_download(&self, requester: &OrganizationId) -> bool {
        self.download.can_process(requester)
    }
}

/// Permission request submitted alongside a new asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPermissions {
    /// Requests a public permission.
    pub public: bool,
    /// Organizations to authorize when the permission is private.
    #[serde(default)]
    pub authorized_ids: Vec<OrganizationId>,
}

impl NewPermissions {
    /// A public permission request.
    #[must_use]
    pub fn public() -> Self {
        Self {
            public: true,
            authorized_ids: Vec::new(),
        }
    }

    /// A private permission request authorizing `ids` (the owner is implied).
    #[must_use]
    pub fn private(ids: impl IntoIterator<Item = OrganizationId>) -> Self {
        Self {
            public: false,
            authorized_ids: ids.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn org(id: &str) -> OrganizationId {
        OrganizationId::new_unchecked(id)
    }

    fn private(ids: &[&str]) -> Permission {
        Permission {
            public: false,
            authorized_ids: ids.iter().map(|id| org(id)).collect(),
        }
    }

    #[test]
    fn private_request_always_includes_owner() {
        let directory = vec![org("org-1"), org("org-2")];
        let perm =
            Permission::for_owner(&org("org-1"), &NewPermissions::private([org("org-2")]), &directory)
                .unwrap();
        assert!(!perm.public);
        assert_eq!(perm, private(&["org-1", "org-2"]));
    }

    #[test]
    fn private_request_rejects_unknown_organization() {
        let directory = vec![org("org-1")];
        let result = Permission::for_owner(
            &org("org-1"),
            &NewPermissions::private([org("org-9")]),
            &directory,
        );
        assert!(matches!(result, Err(Error::UnknownOrganization { id }) if id == "org-9"));
    }

    #[test]
    fn public_request_skips_directory_check() {
        let perm = Permission::for_owner(&org("org-1"), &NewPermissions::public(), &[]).unwrap();
        assert!(perm.public);
        assert!(perm.can_process(&org("anyone")));
    }

    #[test]
    fn can_process_checks_allow_list() {
        let perm = private(&["org-1"]);
        assert!(perm.can_process(&org("org-1")));
        assert!(!perm.can_process(&org("org-2")));
    }

    #[test]
    fn union_of_disjoint_private_permissions_merges_ids() {
        let union = private(&["org-1", "org-2"]).union(&private(&["org-2", "org-3"]));
        assert_eq!(union, private(&["org-1", "org-2", "org-3"]));
    }

    #[test]
    fn union_with_public_is_public() {
        let union = private(&["org-1"]).union(&Permission::public());
        assert!(union.public);
        assert!(union.authorized_ids.is_empty());
    }

    #[test]
    fn intersection_with_public_keeps_private_ids() {
        let restricted = private(&["org-1", "org-3"]);
        let intersection = Permission::public().intersection(&restricted);
        assert!(!intersection.public);
        assert_eq!(intersection.authorized_ids, restricted.authorized_ids);
    }

    #[test]
    fn intersection_of_private_permissions() {
        let intersection = private(&["org-1", "org-2"]).intersection(&private(&["org-2", "org-3"]));
        assert_eq!(intersection, private(&["org-2"]));
    }

    #[test]
    fn permissions_for_owner_mirrors_process_and_download() {
        let perms = Permissions::for_owner(&org("org-1"), &NewPermissions::default(), &[]).unwrap();
        assert_eq!(perms.process, perms.download);
        assert!(perms.can_process(&org("org-1")));
        assert!(!perms.can_download(&org("org-2")));
    }
}
