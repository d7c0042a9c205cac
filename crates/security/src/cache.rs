//! Permission cache
//!
//! Wraps a gate and remembers each decision for a validity window. Grants
//! and revocations made through the cache evict every decision they could
//! change, so they are observed on the next check. Changes made to a
//! shared inner gate behind the cache's back are only guaranteed to be
//! observed once the window has passed. A zero window disables caching.

use crate::gate::{PermissionGate, PermissionGrant};
use crate::permission::Permission;
use crate::resource::FunctionResource;
use ferrule_core::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::trace;

type CacheKey = (String, Permission, FunctionResource);

#[derive(Debug, Clone, Copy)]
struct CachedDecision {
    allowed: bool,
    cached_at: Instant,
}

impl CachedDecision {
    fn is_expired(&self, validity: Duration) -> bool {
        self.cached_at.elapsed() >= validity
    }
}

/// Eventually-consistent view of a [`PermissionGate`]
#[derive(Debug)]
pub struct PermissionCache<G> {
    inner: G,
    validity: Duration,
    decisions: RwLock<HashMap<CacheKey, CachedDecision>>,
}

impl<G: PermissionGate> PermissionCache<G> {
    /// Cache decisions of `inner` for `validity`
    pub fn new(inner: G, validity: Duration) -> Self {
        Self {
            inner,
            validity,
            decisions: RwLock::new(HashMap::new()),
        }
    }

    /// The wrapped gate
    pub fn inner(&self) -> &G {
        &self.inner
    }

    /// Validity window
    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Forget every cached decision
    pub fn invalidate_all(&self) {
        self.decisions.write().clear();
    }

    /// Forget decisions about `resource` or anything below it, for one
    /// grantee or for all of them
    fn evict(&self, grantee: Option<&str>, resource: &FunctionResource) {
        self.decisions.write().retain(|(who, _, cached), _| {
            let same_grantee = grantee.map_or(true, |g| g == who);
            !(same_grantee && cached.chain().any(|r| &r == resource))
        });
    }

    /// Number of cached decisions, expired ones included
    pub fn len(&self) -> usize {
        self.decisions.read().len()
    }

    /// True when nothing is cached
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<G: PermissionGate> PermissionGate for PermissionCache<G> {
    fn authorized(&self, grantee: &str, permission: Permission, resource: &FunctionResource) -> bool {
        if self.validity.is_zero() {
            return self.inner.authorized(grantee, permission, resource);
        }
        let key = (grantee.to_string(), permission, resource.clone());
        if let Some(decision) = self.decisions.read().get(&key) {
            if !decision.is_expired(self.validity) {
                return decision.allowed;
            }
        }

        let allowed = self.inner.authorized(grantee, permission, resource);
        trace!(
            target: "ferrule::security",
            grantee,
            permission = %permission,
            resource = %resource,
            allowed,
            "Refreshed cached permission"
        );
        let mut decisions = self.decisions.write();
        decisions.retain(|_, d| !d.is_expired(self.validity));
        decisions.insert(
            key,
            CachedDecision {
                allowed,
                cached_at: Instant::now(),
            },
        );
        allowed
    }

    fn grant(&self, grantee: &str, permission: Permission, resource: &FunctionResource) -> Result<()> {
        let result = self.inner.grant(grantee, permission, resource);
        self.evict(Some(grantee), resource);
        result
    }

    fn revoke(&self, grantee: &str, permission: Permission, resource: &FunctionResource) -> Result<bool> {
        let result = self.inner.revoke(grantee, permission, resource);
        self.evict(Some(grantee), resource);
        result
    }

    fn revoke_all_on(&self, resource: &FunctionResource) -> Result<usize> {
        let result = self.inner.revoke_all_on(resource);
        self.evict(None, resource);
        result
    }

    fn list(&self, grantee: Option<&str>, permission: Option<Permission>) -> Vec<PermissionGrant> {
        self.inner.list(grantee, permission)
    }
}
