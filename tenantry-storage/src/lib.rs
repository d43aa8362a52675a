//! Tenantry Storage - Tenant Resolution and Guarded Access
//!
//! Everything a session needs to talk to the remote store safely:
//! - [`TenantContextResolver`]: which tenant the session acts as, cached briefly
//! - [`GuardedAccessWrapper`]: CRUD calls scoped to that tenant
//! - [`OperationLog`]: bounded diagnostics of recent guarded calls
//!
//! The remote store itself sits behind [`RemoteStore`] and
//! [`TenantDirectory`]; [`mock`] provides in-memory versions.

pub mod guard;
pub mod mock;
pub mod oplog;
pub mod resolver;
pub mod store;

pub use guard::{
    is_policy_denial, Envelope, GuardedAccessWrapper, InsertOptions, InsertPayload, SelectOptions,
};
pub use mock::{InMemoryStore, MockTenantDirectory};
pub use oplog::{NoopObserver, OperationLog, OperationLogEntry, OperationObserver, TracingObserver};
pub use resolver::{ResolutionSource, TenantContext, TenantContextResolver};
pub use store::{Filter, QueryRefinement, RemoteStore, SelectQuery, TenantDirectory};
