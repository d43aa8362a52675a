//! Effective tenant resolution with a short-lived cache.
//!
//! The resolver answers "which tenant is this session acting as". A
//! successful answer is cached for the configured TTL; failures are never
//! cached, so the next call retries. Resolution tries the store's
//! effective-tenant function first and falls back to the actor's membership
//! record.
//!
//! Concurrent cache misses are not coalesced: each caller issues its own
//! lookup. Both lookups are idempotent reads.

use chrono::Utc;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tenantry_core::{TenantId, Timestamp, UserId};
use tokio::time::Instant;

use crate::store::TenantDirectory;

/// A successful tenant resolution and when it was made.
#[derive(Debug, Clone, PartialEq)]
pub struct TenantContext {
    pub tenant_id: TenantId,
    pub resolved_at: Timestamp,
    pub ttl: Duration,
    resolved_instant: Instant,
}

impl TenantContext {
    fn new(tenant_id: TenantId, ttl: Duration) -> Self {
        Self {
            tenant_id,
            resolved_at: Utc::now(),
            ttl,
            resolved_instant: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.resolved_instant.elapsed()
    }

    pub fn is_fresh(&self) -> bool {
        self.age() < self.ttl
    }
}

/// Where a resolved tenant id came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    Cache,
    Primary,
    Membership,
}

#[derive(Debug, Default)]
struct CacheSlot {
    context: Option<TenantContext>,
    /// Bumped on every invalidation so in-flight lookups that started
    /// before a tenant switch cannot repopulate the cache.
    epoch: u64,
}

/// Resolves and caches the effective tenant for one session.
pub struct TenantContextResolver<D: TenantDirectory> {
    directory: Arc<D>,
    actor: Option<UserId>,
    ttl: Duration,
    slot: RwLock<CacheSlot>,
}

impl<D: TenantDirectory> TenantContextResolver<D> {
    pub fn new(directory: Arc<D>, ttl: Duration) -> Self {
        Self {
            directory,
            actor: None,
            ttl,
            slot: RwLock::new(CacheSlot::default()),
        }
    }

    /// Attach the authenticated actor used for the membership fallback.
    pub fn with_actor(mut self, user_id: UserId) -> Self {
        self.actor = Some(user_id);
        self
    }

    pub fn actor(&self) -> Option<UserId> {
        self.actor
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Effective tenant id, or `None` when neither lookup produced one.
    pub async fn get_effective_tenant_id(&self) -> Option<TenantId> {
        self.resolve().await.map(|(tenant_id, _)| tenant_id)
    }

    /// Resolve the tenant and report which path answered.
    pub async fn resolve(&self) -> Option<(TenantId, ResolutionSource)> {
        let epoch = {
            let slot = self.slot.read().unwrap_or_else(|e| e.into_inner());
            if let Some(context) = slot.context.as_ref().filter(|c| c.is_fresh()) {
                return Some((context.tenant_id, ResolutionSource::Cache));
            }
            slot.epoch
        };

        let resolved = match self.directory.resolve_effective_tenant().await {
            Ok(Some(tenant_id)) => Some((tenant_id, ResolutionSource::Primary)),
            Ok(None) => {
                tracing::debug!("Effective tenant lookup returned nothing, trying membership");
                self.resolve_membership().await
            }
            Err(e) => {
                tracing::warn!(error = %e, "Effective tenant lookup failed, trying membership");
                self.resolve_membership().await
            }
        };

        match resolved {
            Some((tenant_id, source)) => {
                self.store(tenant_id, epoch);
                tracing::debug!(%tenant_id, ?source, "Resolved effective tenant");
                Some((tenant_id, source))
            }
            None => {
                tracing::warn!(actor = ?self.actor, "No tenant context could be resolved");
                None
            }
        }
    }

    async fn resolve_membership(&self) -> Option<(TenantId, ResolutionSource)> {
        let user_id = self.actor?;
        match self.directory.membership_tenant(user_id).await {
            Ok(Some(tenant_id)) => Some((tenant_id, ResolutionSource::Membership)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(error = %e, %user_id, "Membership tenant lookup failed");
                None
            }
        }
    }

    fn store(&self, tenant_id: TenantId, epoch: u64) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        if slot.epoch == epoch {
            slot.context = Some(TenantContext::new(tenant_id, self.ttl));
        }
    }

    /// Cached context, fresh or not.
    pub fn cached(&self) -> Option<TenantContext> {
        self.slot
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .context
            .clone()
    }

    /// Drop the cached tenant; the next call resolves again.
    pub fn invalidate(&self) {
        let mut slot = self.slot.write().unwrap_or_else(|e| e.into_inner());
        slot.context = None;
        slot.epoch = slot.epoch.wrapping_add(1);
        tracing::debug!("Tenant context invalidated");
    }
}

impl<D: TenantDirectory> std::fmt::Debug for TenantContextResolver<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantContextResolver")
            .field("actor", &self.actor)
            .field("ttl", &self.ttl)
            .field("cached", &self.cached())
            .finish()
    }
}
