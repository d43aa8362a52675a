//! Tenantry Client - Session Wiring
//!
//! Entry point for applications. Build one [`TenantSession`] per
//! authenticated session; it carries the tenant guard for reads and writes
//! and the change router that keeps the client-side cache in sync.
//!
//! ```ignore
//! let config = ClientConfig::from_env()?;
//! init_tracing(&config.telemetry)?;
//!
//! let session = TenantSession::builder(store, directory, feed)
//!     .client_config(&config)
//!     .actor(user_id)
//!     .build()?;
//! let _teardown = session.start_listening(cache).await?;
//!
//! let rows = session.guard().select("employees", "id, name", SelectOptions::new()).await;
//! ```

pub mod config;
pub mod session;
pub mod telemetry;

pub use config::{ClientConfig, TelemetryConfig};
pub use session::{TenantSession, TenantSessionBuilder};
pub use telemetry::init_tracing;

// Re-export the types callers need alongside a session
pub use tenantry_core::{
    ChangeEvent, ChangeKind, GuardConfig, GuardError, Operation, OperationStatus, QueryKey,
    ReconnectConfig, Row, TenantId, TenantryError, TenantryResult, UserId, WatchedTable,
};
pub use tenantry_events::{
    CrossCuttingSignal, InMemoryQueryCache, QueryCache, RouterState, RouterStats, SignalSink,
};
pub use tenantry_storage::{
    Envelope, Filter, InsertOptions, InsertPayload, OperationLogEntry, QueryRefinement,
    SelectOptions,
};
