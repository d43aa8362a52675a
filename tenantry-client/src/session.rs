//! Per-session context object.
//!
//! A [`TenantSession`] owns everything that is scoped to one authenticated
//! session: the tenant resolver and its cache, the operation log, the
//! guarded store facade, and the change router. Nothing here is global;
//! two sessions never share a tenant cache.

use std::sync::Arc;
use tenantry_core::{ConfigError, GuardConfig, ReconnectConfig, RouterError, TenantId, UserId};
use tenantry_events::{
    ChangeFeed, ChangeNotificationRouter, NoopSignalSink, QueryCache, RouterOptions, SignalSink,
    TeardownHandle,
};
use tenantry_storage::{
    GuardedAccessWrapper, OperationLog, OperationObserver, RemoteStore, TenantContextResolver,
    TenantDirectory, TracingObserver,
};

use crate::config::ClientConfig;

/// Builder for [`TenantSession`].
pub struct TenantSessionBuilder<S: RemoteStore, D: TenantDirectory, F: ChangeFeed> {
    store: Arc<S>,
    directory: Arc<D>,
    feed: Arc<F>,
    guard_config: GuardConfig,
    reconnect: ReconnectConfig,
    actor: Option<UserId>,
    observer: Arc<dyn OperationObserver>,
    signals: Arc<dyn SignalSink>,
}

impl<S: RemoteStore, D: TenantDirectory, F: ChangeFeed> TenantSessionBuilder<S, D, F> {
    pub fn guard_config(mut self, config: GuardConfig) -> Self {
        self.guard_config = config;
        self
    }

    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Apply the guard and reconnect sections of a loaded config.
    pub fn client_config(self, config: &ClientConfig) -> Self {
        self.guard_config(config.guard.clone())
            .reconnect(config.reconnect.clone())
    }

    /// The authenticated user, used for the membership fallback.
    pub fn actor(mut self, user_id: UserId) -> Self {
        self.actor = Some(user_id);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn OperationObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn signal_sink(mut self, signals: Arc<dyn SignalSink>) -> Self {
        self.signals = signals;
        self
    }

    pub fn build(self) -> Result<TenantSession<S, D, F>, ConfigError> {
        self.guard_config.validate()?;
        self.reconnect.validate()?;

        let config = Arc::new(self.guard_config);
        let mut resolver = TenantContextResolver::new(self.directory, config.tenant_ttl);
        if let Some(actor) = self.actor {
            resolver = resolver.with_actor(actor);
        }
        let resolver = Arc::new(resolver);
        let log = Arc::new(OperationLog::with_observer(config.log_capacity, self.observer));
        let guard = GuardedAccessWrapper::new(
            self.store,
            Arc::clone(&resolver),
            Arc::clone(&log),
            Arc::clone(&config),
        );
        let router = ChangeNotificationRouter::with_signal_sink(
            self.feed,
            RouterOptions {
                schema: config.schema.clone(),
                tenant_column: config.tenant_column.clone(),
                reconnect: self.reconnect,
            },
            self.signals,
        );

        tracing::debug!(
            actor = ?self.actor,
            tenant_column = %config.tenant_column,
            schema = %config.schema,
            "Tenant session created"
        );

        Ok(TenantSession {
            config,
            resolver,
            log,
            guard,
            router,
        })
    }
}

/// One authenticated session's guard, log, and change router.
pub struct TenantSession<S: RemoteStore, D: TenantDirectory, F: ChangeFeed> {
    config: Arc<GuardConfig>,
    resolver: Arc<TenantContextResolver<D>>,
    log: Arc<OperationLog>,
    guard: GuardedAccessWrapper<S, D>,
    router: ChangeNotificationRouter<F>,
}

impl<S: RemoteStore, D: TenantDirectory, F: ChangeFeed> TenantSession<S, D, F> {
    pub fn builder(store: Arc<S>, directory: Arc<D>, feed: Arc<F>) -> TenantSessionBuilder<S, D, F> {
        TenantSessionBuilder {
            store,
            directory,
            feed,
            guard_config: GuardConfig::default(),
            reconnect: ReconnectConfig::default(),
            actor: None,
            observer: Arc::new(TracingObserver),
            signals: Arc::new(NoopSignalSink),
        }
    }

    pub fn guard(&self) -> &GuardedAccessWrapper<S, D> {
        &self.guard
    }

    pub fn router(&self) -> &ChangeNotificationRouter<F> {
        &self.router
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub fn resolver(&self) -> &TenantContextResolver<D> {
        &self.resolver
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Tenant the session currently acts as.
    pub async fn current_tenant(&self) -> Option<TenantId> {
        self.resolver.get_effective_tenant_id().await
    }

    /// Forget the cached tenant after an impersonation or tenant switch.
    ///
    /// The next guarded call resolves the tenant again.
    pub fn switch_tenant(&self) {
        let previous = self.resolver.cached().map(|context| context.tenant_id);
        self.resolver.invalidate();
        tracing::info!(previous = ?previous, "Tenant switch requested, context invalidated");
    }

    /// Start routing change notifications into `cache`.
    pub async fn start_listening(
        &self,
        cache: Arc<dyn QueryCache>,
    ) -> Result<TeardownHandle<F>, RouterError> {
        self.router.initialize(cache).await
    }

    /// Stop the change router. The guard stays usable.
    pub async fn shutdown(&self) {
        self.router.cleanup().await;
    }
}

impl<S: RemoteStore, D: TenantDirectory, F: ChangeFeed> std::fmt::Debug for TenantSession<S, D, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantSession")
            .field("resolver", &self.resolver)
            .field("log", &self.log)
            .field("router", &self.router)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantry_core::IdType;
    use tenantry_events::InMemoryChangeFeed;
    use tenantry_storage::{InMemoryStore, MockTenantDirectory};

    type TestSession = TenantSession<InMemoryStore, MockTenantDirectory, InMemoryChangeFeed>;

    fn session(directory: MockTenantDirectory) -> (Arc<MockTenantDirectory>, TestSession) {
        let directory = Arc::new(directory);
        let session = TenantSession::builder(
            Arc::new(InMemoryStore::new()),
            Arc::clone(&directory),
            Arc::new(InMemoryChangeFeed::new()),
        )
        .build()
        .unwrap();
        (directory, session)
    }

    #[tokio::test]
    async fn test_switch_tenant_forces_resolution() {
        let first = TenantId::now_v7();
        let (directory, session) = session(MockTenantDirectory::with_effective(first));
        assert_eq!(session.current_tenant().await, Some(first));

        let second = TenantId::now_v7();
        directory.set_primary(Ok(Some(second)));
        assert_eq!(session.current_tenant().await, Some(first));

        session.switch_tenant();
        assert_eq!(session.current_tenant().await, Some(second));
        assert_eq!(directory.primary_calls(), 2);
    }

    #[tokio::test]
    async fn test_actor_enables_membership_fallback() {
        let user = UserId::now_v7();
        let tenant = TenantId::now_v7();
        let directory = MockTenantDirectory::new();
        directory.set_membership(user, tenant);
        let directory = Arc::new(directory);

        let session = TenantSession::builder(
            Arc::new(InMemoryStore::new()),
            Arc::clone(&directory),
            Arc::new(InMemoryChangeFeed::new()),
        )
        .actor(user)
        .build()
        .unwrap();

        assert_eq!(session.current_tenant().await, Some(tenant));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        for capacity in [0, 80] {
            let result = TenantSession::builder(
                Arc::new(InMemoryStore::new()),
                Arc::new(MockTenantDirectory::new()),
                Arc::new(InMemoryChangeFeed::new()),
            )
            .guard_config(GuardConfig::default().with_log_capacity(capacity))
            .build();
            assert!(result.is_err(), "capacity {capacity} accepted");
        }
    }

    #[tokio::test]
    async fn test_sessions_do_not_share_tenant_cache() {
        let tenant = TenantId::now_v7();
        let (_, a) = session(MockTenantDirectory::with_effective(tenant));
        let (_, b) = session(MockTenantDirectory::with_effective(tenant));

        assert_eq!(a.current_tenant().await, Some(tenant));
        assert!(a.resolver().cached().is_some());
        assert!(b.resolver().cached().is_none());
    }
}
