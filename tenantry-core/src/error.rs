//! Error types for Tenantry operations

use crate::{Operation, WatchedTable};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A failure reported by the remote store, kept verbatim.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[error("{message} (code: {})", .code.as_deref().unwrap_or("none"))]
pub struct StoreError {
    /// Store-specific error code, e.g. a SQLSTATE.
    pub code: Option<String>,
    pub message: String,
    pub details: Option<String>,
    pub hint: Option<String>,
}

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            details: None,
            hint: None,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Errors returned by guarded operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GuardError {
    #[error("No tenant context for {operation} on {table}")]
    NoTenantContext { table: String, operation: Operation },

    #[error("Blocked by row-level policy: {0}")]
    RlsBlocked(StoreError),

    #[error("Store error: {0}")]
    Generic(StoreError),
}

impl GuardError {
    pub const NO_TENANT_CONTEXT: &'static str = "NO_TENANT_CONTEXT";
    pub const RLS_BLOCKED: &'static str = "RLS_BLOCKED";
    pub const GENERIC_ERROR: &'static str = "GENERIC_ERROR";

    /// Stable code callers can branch on.
    pub fn code(&self) -> &'static str {
        match self {
            GuardError::NoTenantContext { .. } => Self::NO_TENANT_CONTEXT,
            GuardError::RlsBlocked(_) => Self::RLS_BLOCKED,
            GuardError::Generic(_) => Self::GENERIC_ERROR,
        }
    }

    /// The underlying store failure, absent for pre-flight rejections.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            GuardError::NoTenantContext { .. } => None,
            GuardError::RlsBlocked(e) | GuardError::Generic(e) => Some(e),
        }
    }
}

/// Errors decoding or validating inbound change notifications.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChangeEventError {
    #[error("Table is not watched: {table}")]
    UnknownTable { table: String },

    #[error("Change from schema {got}, expected {expected}")]
    ForeignSchema { expected: String, got: String },

    #[error("Malformed change payload: {reason}")]
    Malformed { reason: String },

    #[error("Change stream lagged, {skipped} notifications lost")]
    Lagged { skipped: u64 },
}

/// Change router lifecycle and subscription errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RouterError {
    #[error("Subscription to {table} failed: {reason}")]
    SubscribeFailed { table: WatchedTable, reason: String },

    #[error("Router is not initialized")]
    NotInitialized,

    #[error("Router is tearing down")]
    TearingDown,

    #[error("Change event error: {0}")]
    Event(#[from] ChangeEventError),
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Tenantry errors.
#[derive(Debug, Clone, Error)]
pub enum TenantryError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Guard error: {0}")]
    Guard(#[from] GuardError),

    #[error("Router error: {0}")]
    Router(#[from] RouterError),

    #[error("Change event error: {0}")]
    ChangeEvent(#[from] ChangeEventError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Telemetry error: {reason}")]
    Telemetry { reason: String },
}

/// Result type alias for Tenantry operations.
pub type TenantryResult<T> = Result<T, TenantryError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display_includes_code() {
        let err = StoreError::new("new row violates row-level security policy").with_code("42501");
        let msg = err.to_string();
        assert!(msg.contains("row-level security"));
        assert!(msg.contains("42501"));

        let bare = StoreError::new("boom");
        assert!(bare.to_string().contains("code: none"));
    }

    #[test]
    fn test_guard_error_codes() {
        let no_tenant = GuardError::NoTenantContext {
            table: "employees".to_string(),
            operation: Operation::Insert,
        };
        assert_eq!(no_tenant.code(), "NO_TENANT_CONTEXT");
        assert!(no_tenant.store_error().is_none());
        assert!(no_tenant.to_string().contains("INSERT on employees"));

        let blocked = GuardError::RlsBlocked(StoreError::new("denied"));
        assert_eq!(blocked.code(), "RLS_BLOCKED");
        assert_eq!(blocked.store_error().unwrap().message, "denied");

        let generic = GuardError::Generic(StoreError::new("syntax error"));
        assert_eq!(generic.code(), "GENERIC_ERROR");
    }

    #[test]
    fn test_router_error_display() {
        let err = RouterError::SubscribeFailed {
            table: WatchedTable::Shifts,
            reason: "channel closed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("shifts"));
        assert!(msg.contains("channel closed"));
    }

    #[test]
    fn test_tenantry_error_from_variants() {
        let store = TenantryError::from(StoreError::new("x"));
        assert!(matches!(store, TenantryError::Store(_)));

        let guard = TenantryError::from(GuardError::Generic(StoreError::new("x")));
        assert!(matches!(guard, TenantryError::Guard(_)));

        let router = TenantryError::from(RouterError::NotInitialized);
        assert!(matches!(router, TenantryError::Router(_)));

        let event = TenantryError::from(ChangeEventError::Malformed {
            reason: "eof".to_string(),
        });
        assert!(matches!(event, TenantryError::ChangeEvent(_)));

        let config = TenantryError::from(ConfigError::MissingRequired {
            field: "tenant_column".to_string(),
        });
        assert!(matches!(config, TenantryError::Config(_)));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "log_capacity".to_string(),
            value: "0".to_string(),
            reason: "must be positive".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("log_capacity"));
        assert!(msg.contains("must be positive"));
    }
}
