//! Tenantry Events - Change Notification Routing
//!
//! Turns backend change notifications into precise client-side cache
//! invalidations. Each watched table either has a bespoke
//! [`EntityHandler`] or falls back to its full static key mapping.

pub mod cache;
pub mod feed;
pub mod handlers;
pub mod mapping;
pub mod router;
pub mod signal;

pub use cache::{CachedQuery, InMemoryQueryCache, QueryCache};
pub use feed::{ChangeFeed, ChangeItem, ChangeStream, InMemoryChangeFeed};
pub use handlers::{
    plan_for, strategy_for, EntityHandler, HandlerContext, InvalidationPlan, InvalidationStrategy,
    LANGUAGE_COLUMN,
};
pub use mapping::{invalidate_table, mapped_roots, query_keys};
pub use router::{ChangeNotificationRouter, RouterOptions, RouterState, RouterStats, TeardownHandle};
pub use signal::{BroadcastSignalSink, CrossCuttingSignal, NoopSignalSink, SignalSink};
