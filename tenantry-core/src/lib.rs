//! Tenantry Core - Shared Types
//!
//! Pure data structures shared by the tenant guard and the change router:
//! identities, watched tables, cache keys, change events, operation
//! outcomes, errors, and configuration. No I/O lives here.

mod change;
mod config;
mod error;
mod identity;
mod operation;
mod query_key;
mod table;

pub use change::{ChangeEvent, ChangeKind, RawChangePayload, Row};
pub use config::{GuardConfig, ReconnectConfig, MAX_LOG_CAPACITY};
pub use error::{
    ChangeEventError, ConfigError, GuardError, RouterError, StoreError, TenantryError,
    TenantryResult,
};
pub use identity::{DurationMs, IdType, TenantId, Timestamp, UserId};
pub use operation::{Operation, OperationStatus, Severity};
pub use query_key::QueryKey;
pub use table::WatchedTable;
