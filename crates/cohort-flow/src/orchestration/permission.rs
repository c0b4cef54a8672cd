//! Permission creation backed by the organization directory.

use cohort_core::{NewPermissions, OrganizationId, Permission, Permissions};

use super::ServiceDeps;
use crate::context::RequestContext;
use crate::error::Result;

/// Builds permissions for new assets.
#[derive(Debug, Clone, Copy)]
pub struct PermissionService<'a> {
    deps: ServiceDeps<'a>,
}

impl<'a> PermissionService<'a> {
    /// Creates the service.
    #[must_use]
    pub const fn new(deps: ServiceDeps<'a>) -> Self {
        Self { deps }
    }

    /// Builds a permission owned by `owner` from a request.
    ///
    /// The organization directory is only read when the request names
    /// organizations, and at most once per request.
    ///
    /// # Errors
    ///
    /// Returns a bad-request error if the request names an unknown organization.
    pub fn create_permission(
        &self,
        ctx: &mut RequestContext,
        owner: &OrganizationId,
        request: &NewPermissions,
    ) -> Result<Permission> {
        let directory = self.directory_for(ctx, request)?;
        Ok(Permission::for_owner(owner, request, &directory)?)
    }

    /// Builds process and download permissions owned by `owner` from a request.
    ///
    /// # Errors
    ///
    /// Returns a bad-request error if the request names an unknown organization.
    pub fn create_permissions(
        &self,
        ctx: &mut RequestContext,
        owner: &OrganizationId,
        request: &NewPermissions,
    ) -> Result<Permissions> {
        let directory = self.directory_for(ctx, request)?;
        Ok(Permissions::for_owner(owner, request, &directory)?)
    }

    fn directory_for(
        &self,
        ctx: &mut RequestContext,
        request: &NewPermissions,
    ) -> Result<Vec<OrganizationId>> {
        if request.public || request.authorized_ids.is_empty() {
            return Ok(Vec::new());
        }
        ctx.organizations(self.deps.stores.organizations)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::config::OrchestratorConfig;
    use crate::error::{Error, ErrorKind};
    use crate::orchestration::Stores;
    use crate::store::memory::InMemoryStore;

    fn org(id: &str) -> OrganizationId {
        OrganizationId::new_unchecked(id)
    }

    #[test]
    fn private_permission_is_checked_against_directory() {
        let store = InMemoryStore::new();
        store.add_organization(org("org-1")).unwrap();
        store.add_organization(org("org-2")).unwrap();
        let service =
            ServiceDeps::new(Stores::from_ledger(&store), OrchestratorConfig::default()).permissions();
        let mut ctx = RequestContext::new(Utc::now());

        let perms = service
            .create_permissions(&mut ctx, &org("org-1"), &NewPermissions::private([org("org-2")]))
            .unwrap();
        assert!(perms.can_process(&org("org-2")));
        assert!(perms.can_download(&org("org-1")));

        let err = service
            .create_permission(&mut ctx, &org("org-1"), &NewPermissions::private([org("org-9")]))
            .unwrap_err();
        assert!(matches!(err, Error::Core(_)));
        assert_eq!(err.kind(), ErrorKind::BadRequest);
    }

    #[test]
    fn owner_only_request_needs_no_directory() {
        let store = InMemoryStore::new();
        let service =
            ServiceDeps::new(Stores::from_ledger(&store), OrchestratorConfig::default()).permissions();
        let mut ctx = RequestContext::new(Utc::now());
        let perm = service
            .create_permission(&mut ctx, &org("org-1"), &NewPermissions::default())
            .unwrap();
        assert_eq!(perm, Permission::owner_only(&org("org-1")));
    }
}
