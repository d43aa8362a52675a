//! Change notification router.
//!
//! Listens to one change stream per watched table and turns each inbound
//! event into cache invalidations (and, for a few entities, cross-cutting
//! signals). Lifecycle:
//!
//! ```text
//! Uninitialized --initialize--> Initializing --all subscribed--> Active
//!       ^                             |                            |
//!       |                       subscribe failed                cleanup
//!       |                             v                            v
//!       +------------------------- (reset) <------------------- TornDown
//! ```
//!
//! Subscription tasks are owned by the router. They are aborted and awaited
//! on `cleanup`, on a failed `initialize`, and when the last router handle
//! is dropped.

use futures_util::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tenantry_core::{ChangeEvent, ChangeEventError, ReconnectConfig, RouterError, WatchedTable};
use tokio::task::JoinHandle;

use crate::cache::QueryCache;
use crate::feed::{ChangeFeed, ChangeItem, ChangeStream};
use crate::handlers::{plan_for, HandlerContext, InvalidationPlan};
use crate::mapping;
use crate::signal::{NoopSignalSink, SignalSink};

/// Router lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Uninitialized,
    Initializing,
    Active,
    TornDown,
}

/// Point-in-time router counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub events_received: u64,
    pub events_rejected: u64,
    pub invalidations: u64,
    pub signals_emitted: u64,
    pub reconnects: u64,
    /// Notifications a lagging stream reported as lost.
    pub events_lost: u64,
}

#[derive(Debug, Default)]
struct Counters {
    events_received: AtomicU64,
    events_rejected: AtomicU64,
    invalidations: AtomicU64,
    signals_emitted: AtomicU64,
    reconnects: AtomicU64,
    events_lost: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> RouterStats {
        RouterStats {
            events_received: self.events_received.load(Ordering::Relaxed),
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            signals_emitted: self.signals_emitted.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            events_lost: self.events_lost.load(Ordering::Relaxed),
        }
    }
}

/// Router settings.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub schema: String,
    pub tenant_column: String,
    pub reconnect: ReconnectConfig,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            schema: "public".to_string(),
            tenant_column: "company_id".to_string(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Aborts the task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl AbortOnDrop {
    async fn shutdown(mut self) {
        self.0.abort();
        let _ = (&mut self.0).await;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// State shared with subscription tasks. Holds nothing that owns a task.
struct Shared<F: ChangeFeed> {
    feed: Arc<F>,
    options: RouterOptions,
    signals: Arc<dyn SignalSink>,
    state: Mutex<RouterState>,
    cache: Mutex<Option<Arc<dyn QueryCache>>>,
    counters: Counters,
}

impl<F: ChangeFeed> Shared<F> {
    fn state(&self) -> RouterState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Subscription tasks keep running, and reconnecting, in these states.
    fn is_live(&self) -> bool {
        matches!(self.state(), RouterState::Initializing | RouterState::Active)
    }

    fn set_state(&self, state: RouterState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn cache(&self) -> Option<Arc<dyn QueryCache>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn apply(&self, cache: &dyn QueryCache, event: &ChangeEvent) -> InvalidationPlan {
        let ctx = HandlerContext {
            tenant_column: &self.options.tenant_column,
        };
        let plan = plan_for(event, &ctx);
        for key in &plan.keys {
            cache.invalidate(key);
        }
        for signal in &plan.signals {
            self.signals.emit(signal.clone());
        }
        self.counters
            .invalidations
            .fetch_add(plan.keys.len() as u64, Ordering::Relaxed);
        self.counters
            .signals_emitted
            .fetch_add(plan.signals.len() as u64, Ordering::Relaxed);
        tracing::debug!(
            table = %event.table,
            kind = %event.kind,
            keys = plan.keys.len(),
            signals = plan.signals.len(),
            "Routed change event"
        );
        plan
    }

    /// Lost notifications could have touched any view of `table`.
    fn resync(&self, cache: &dyn QueryCache, table: WatchedTable, skipped: u64) {
        self.counters.events_lost.fetch_add(skipped, Ordering::Relaxed);
        let keys = mapping::query_keys(table);
        for key in &keys {
            cache.invalidate(key);
        }
        self.counters
            .invalidations
            .fetch_add(keys.len() as u64, Ordering::Relaxed);
        tracing::warn!(%table, skipped, keys = keys.len(), "Change stream lagged, invalidated full mapping");
    }

    fn dispatch(&self, cache: &dyn QueryCache, table: WatchedTable, item: ChangeItem) {
        if let Err(ChangeEventError::Lagged { skipped }) = item {
            self.resync(cache, table, skipped);
            return;
        }
        self.counters.events_received.fetch_add(1, Ordering::Relaxed);
        let event = item.and_then(|payload| payload.into_event(&self.options.schema));
        match event {
            Ok(event) => {
                self.apply(cache, &event);
            }
            Err(e) => {
                self.counters.events_rejected.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%table, error = %e, "Dropped change notification");
            }
        }
    }
}

struct RouterInner<F: ChangeFeed> {
    shared: Arc<Shared<F>>,
    /// Serializes initialize/cleanup; owns the subscription tasks.
    tasks: tokio::sync::Mutex<Vec<AbortOnDrop>>,
}

/// Routes backend change notifications to cache invalidations.
///
/// Cheap to clone; all clones drive the same subscriptions.
pub struct ChangeNotificationRouter<F: ChangeFeed> {
    inner: Arc<RouterInner<F>>,
}

impl<F: ChangeFeed> Clone for ChangeNotificationRouter<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ChangeFeed> ChangeNotificationRouter<F> {
    pub fn new(feed: Arc<F>, options: RouterOptions) -> Self {
        Self::with_signal_sink(feed, options, Arc::new(NoopSignalSink))
    }

    pub fn with_signal_sink(feed: Arc<F>, options: RouterOptions, signals: Arc<dyn SignalSink>) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                shared: Arc::new(Shared {
                    feed,
                    options,
                    signals,
                    state: Mutex::new(RouterState::Uninitialized),
                    cache: Mutex::new(None),
                    counters: Counters::default(),
                }),
                tasks: tokio::sync::Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn state(&self) -> RouterState {
        self.inner.shared.state()
    }

    pub fn stats(&self) -> RouterStats {
        self.inner.shared.counters.snapshot()
    }

    /// Subscribe to every watched table and start routing into `cache`.
    ///
    /// A no-op when already active. If any subscription fails, those already
    /// opened are closed and the router returns to `Uninitialized`.
    pub async fn initialize(&self, cache: Arc<dyn QueryCache>) -> Result<TeardownHandle<F>, RouterError> {
        let mut tasks = self.inner.tasks.lock().await;
        let shared = &self.inner.shared;

        if shared.state() == RouterState::Active {
            tracing::debug!("Change router already active, ignoring initialize");
            return Ok(self.teardown_handle());
        }

        shared.set_state(RouterState::Initializing);
        *shared.cache.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&cache));

        let mut opened = Vec::with_capacity(WatchedTable::ALL.len());
        for table in WatchedTable::ALL {
            match shared.feed.subscribe(table, &shared.options.schema).await {
                Ok(stream) => {
                    let handle = tokio::spawn(run_subscription(
                        Arc::clone(shared),
                        Arc::clone(&cache),
                        table,
                        stream,
                    ));
                    opened.push(AbortOnDrop(handle));
                }
                Err(e) => {
                    tracing::error!(%table, error = %e, opened = opened.len(), "Change router initialization failed");
                    for task in opened {
                        task.shutdown().await;
                    }
                    *shared.cache.lock().unwrap_or_else(|e| e.into_inner()) = None;
                    shared.set_state(RouterState::Uninitialized);
                    return Err(e);
                }
            }
        }

        *tasks = opened;
        shared.set_state(RouterState::Active);
        tracing::info!(tables = tasks.len(), schema = %shared.options.schema, "Change router active");
        Ok(self.teardown_handle())
    }

    /// Close every subscription and return to `Uninitialized`.
    ///
    /// Safe to call at any time and any number of times.
    pub async fn cleanup(&self) {
        let mut tasks = self.inner.tasks.lock().await;
        let shared = &self.inner.shared;
        let state = shared.state();
        if state == RouterState::Uninitialized && tasks.is_empty() {
            tracing::debug!("Change router not initialized, nothing to clean up");
            return;
        }

        shared.set_state(RouterState::TornDown);
        let count = tasks.len();
        for task in tasks.drain(..) {
            task.shutdown().await;
        }
        *shared.cache.lock().unwrap_or_else(|e| e.into_inner()) = None;
        shared.set_state(RouterState::Uninitialized);
        tracing::info!(subscriptions = count, "Change router cleaned up");
    }

    /// Invalidate the full static mapping of the table named `name`.
    pub fn invalidate_table(&self, name: &str) -> Result<usize, RouterError> {
        let cache = self.active_cache()?;
        Ok(mapping::invalidate_table(cache.as_ref(), name)?)
    }

    /// Route an already-decoded event through the handler registry.
    pub fn route(&self, event: &ChangeEvent) -> Result<InvalidationPlan, RouterError> {
        let cache = self.active_cache()?;
        self.inner
            .shared
            .counters
            .events_received
            .fetch_add(1, Ordering::Relaxed);
        Ok(self.inner.shared.apply(cache.as_ref(), event))
    }

    fn active_cache(&self) -> Result<Arc<dyn QueryCache>, RouterError> {
        let shared = &self.inner.shared;
        match shared.state() {
            RouterState::TornDown => Err(RouterError::TearingDown),
            RouterState::Uninitialized => Err(RouterError::NotInitialized),
            RouterState::Initializing | RouterState::Active => {
                shared.cache().ok_or(RouterError::NotInitialized)
            }
        }
    }

    fn teardown_handle(&self) -> TeardownHandle<F> {
        TeardownHandle {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl<F: ChangeFeed> std::fmt::Debug for ChangeNotificationRouter<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotificationRouter")
            .field("state", &self.state())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Returned by [`ChangeNotificationRouter::initialize`]; tears the router
/// down without needing a router reference.
pub struct TeardownHandle<F: ChangeFeed> {
    inner: Weak<RouterInner<F>>,
}

impl<F: ChangeFeed> TeardownHandle<F> {
    /// Run `cleanup` on the router, if it still exists.
    pub async fn teardown(self) {
        if let Some(inner) = self.inner.upgrade() {
            ChangeNotificationRouter { inner }.cleanup().await;
        }
    }
}

impl<F: ChangeFeed> std::fmt::Debug for TeardownHandle<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TeardownHandle")
            .field("live", &(self.inner.strong_count() > 0))
            .finish()
    }
}

async fn run_subscription<F: ChangeFeed>(
    shared: Arc<Shared<F>>,
    cache: Arc<dyn QueryCache>,
    table: WatchedTable,
    mut stream: ChangeStream,
) {
    let reconnect = shared.options.reconnect.clone();
    let mut backoff = reconnect.initial_ms;

    loop {
        while let Some(item) = stream.next().await {
            shared.dispatch(cache.as_ref(), table, item);
        }

        if !reconnect.enabled || !shared.is_live() {
            tracing::info!(%table, "Change stream ended");
            return;
        }

        tracing::warn!(%table, "Change stream ended, resubscribing");
        stream = loop {
            tokio::time::sleep(reconnect.jittered(backoff)).await;
            backoff = reconnect.next_backoff(backoff);

            if !shared.is_live() {
                return;
            }
            match shared.feed.subscribe(table, &shared.options.schema).await {
                Ok(stream) => {
                    shared.counters.reconnects.fetch_add(1, Ordering::Relaxed);
                    tracing::info!(%table, "Change stream resubscribed");
                    backoff = reconnect.initial_ms;
                    break stream;
                }
                Err(e) => {
                    tracing::warn!(%table, error = %e, next_ms = backoff, "Resubscribe failed");
                }
            }
        };
    }
}
