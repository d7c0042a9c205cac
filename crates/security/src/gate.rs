//! Permission gate
//!
//! The engine never stores grants itself; it asks a [`PermissionGate`].
//! [`GrantTable`] is the in-memory implementation: explicit grants plus a
//! set of superusers, with grants on a parent resource applying to every
//! child.

use crate::permission::Permission;
use crate::resource::FunctionResource;
use ferrule_core::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// One granted permission
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PermissionGrant {
    /// Role holding the permission
    pub grantee: String,
    /// Granted permission
    pub permission: Permission,
    /// Resource it applies to
    pub resource: FunctionResource,
}

impl PermissionGrant {
    /// Create a grant
    pub fn new(grantee: impl Into<String>, permission: Permission, resource: FunctionResource) -> Self {
        Self {
            grantee: grantee.into(),
            permission,
            resource,
        }
    }
}

impl fmt::Display for PermissionGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} has {} on {}", self.grantee, self.permission, self.resource)
    }
}

/// Authorization decisions and grant bookkeeping
pub trait PermissionGate: Send + Sync {
    /// True if `grantee` holds `permission` on `resource` or any ancestor
    fn authorized(&self, grantee: &str, permission: Permission, resource: &FunctionResource) -> bool;

    /// Record a grant; granting twice is a no-op
    fn grant(&self, grantee: &str, permission: Permission, resource: &FunctionResource) -> Result<()>;

    /// Remove a grant, returning whether it existed
    fn revoke(&self, grantee: &str, permission: Permission, resource: &FunctionResource) -> Result<bool>;

    /// Remove every grant on exactly `resource`
    fn revoke_all_on(&self, resource: &FunctionResource) -> Result<usize>;

    /// Grants matching the optional filters, sorted by grantee then resource
    fn list(&self, grantee: Option<&str>, permission: Option<Permission>) -> Vec<PermissionGrant>;

    /// [`PermissionGate::authorized`] as a `Result`
    ///
    /// # Errors
    ///
    /// `Unauthorized` naming the grantee, permission and resource.
    fn require(&self, grantee: &str, permission: Permission, resource: &FunctionResource) -> Result<()> {
        if self.authorized(grantee, permission, resource) {
            Ok(())
        } else {
            Err(Error::Unauthorized {
                grantee: grantee.to_string(),
                permission: permission.to_string(),
                resource: resource.to_string(),
            })
        }
    }
}

impl<G: PermissionGate + ?Sized> PermissionGate for Arc<G> {
    fn authorized(&self, grantee: &str, permission: Permission, resource: &FunctionResource) -> bool {
        (**self).authorized(grantee, permission, resource)
    }

    fn grant(&self, grantee: &str, permission: Permission, resource: &FunctionResource) -> Result<()> {
        (**self).grant(grantee, permission, resource)
    }

    fn revoke(&self, grantee: &str, permission: Permission, resource: &FunctionResource) -> Result<bool> {
        (**self).revoke(grantee, permission, resource)
    }

    fn revoke_all_on(&self, resource: &FunctionResource) -> Result<usize> {
        (**self).revoke_all_on(resource)
    }

    fn list(&self, grantee: Option<&str>, permission: Option<Permission>) -> Vec<PermissionGrant> {
        (**self).list(grantee, permission)
    }
}

/// In-memory grant table
#[derive(Debug, Default)]
pub struct GrantTable {
    grants: RwLock<HashSet<PermissionGrant>>,
    superusers: RwLock<HashSet<String>>,
}

impl GrantTable {
    /// Empty table with no superusers
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`GrantTable::add_superuser`]
    pub fn with_superuser(self, role: impl Into<String>) -> Self {
        self.add_superuser(role);
        self
    }

    /// Make `role` pass every check
    pub fn add_superuser(&self, role: impl Into<String>) {
        self.superusers.write().insert(role.into());
    }

    /// True for superusers
    pub fn is_superuser(&self, role: &str) -> bool {
        self.superusers.read().contains(role)
    }
}

fn check_applicable(permission: Permission, resource: &FunctionResource) -> Result<()> {
    if resource.applicable_permissions().contains(&permission) {
        Ok(())
    } else {
        Err(Error::InvalidResource {
            resource: resource.to_string(),
            reason: format!("{} is not applicable", permission),
        })
    }
}

impl PermissionGate for GrantTable {
    fn authorized(&self, grantee: &str, permission: Permission, resource: &FunctionResource) -> bool {
        if self.is_superuser(grantee) {
            return true;
        }
        let grants = self.grants.read();
        resource.chain().any(|r| {
            grants.contains(&PermissionGrant::new(grantee, permission, r))
        })
    }

    fn grant(&self, grantee: &str, permission: Permission, resource: &FunctionResource) -> Result<()> {
        check_applicable(permission, resource)?;
        let inserted = self
            .grants
            .write()
            .insert(PermissionGrant::new(grantee, permission, resource.clone()));
        if inserted {
            info!(
                target: "ferrule::security",
                grantee,
                permission = %permission,
                resource = %resource,
                "Granted permission"
            );
        }
        Ok(())
    }

    fn revoke(&self, grantee: &str, permission: Permission, resource: &FunctionResource) -> Result<bool> {
        check_applicable(permission, resource)?;
        let removed = self
            .grants
            .write()
            .remove(&PermissionGrant::new(grantee, permission, resource.clone()));
        if removed {
            info!(
                target: "ferrule::security",
                grantee,
                permission = %permission,
                resource = %resource,
                "Revoked permission"
            );
        }
        Ok(removed)
    }

    fn revoke_all_on(&self, resource: &FunctionResource) -> Result<usize> {
        let mut grants = self.grants.write();
        let before = grants.len();
        grants.retain(|g| &g.resource != resource);
        Ok(before - grants.len())
    }

    fn list(&self, grantee: Option<&str>, permission: Option<Permission>) -> Vec<PermissionGrant> {
        let mut out: Vec<PermissionGrant> = self
            .grants
            .read()
            .iter()
            .filter(|g| grantee.map_or(true, |r| g.grantee == r))
            .filter(|g| permission.map_or(true, |p| g.permission == p))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            (&a.grantee, a.resource.name(), a.permission)
                .cmp(&(&b.grantee, b.resource.name(), b.permission))
        });
        out
    }
}
