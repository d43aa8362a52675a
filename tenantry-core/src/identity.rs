//! Identity types for tenants and actors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Duration in milliseconds for log entries and backoff values.
pub type DurationMs = u64;

/// Shared behavior for strongly-typed identifiers.
pub trait IdType: Copy + Eq + fmt::Display {
    /// Wrap an existing UUID.
    fn from_uuid(uuid: Uuid) -> Self;

    /// Access the underlying UUID.
    fn as_uuid(&self) -> Uuid;

    /// Generate a new timestamp-sortable identifier.
    fn now_v7() -> Self {
        Self::from_uuid(Uuid::now_v7())
    }
}

/// Define a UUID-backed identifier newtype.
///
/// # Example
/// ```ignore
/// define_id!(TenantId, "Identifier of a tenant (company).");
/// ```
macro_rules! define_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl IdType for $name {
            fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim()).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_id!(TenantId, "Identifier of a tenant (company) whose data must stay isolated.");
define_id!(UserId, "Identifier of the authenticated actor issuing guarded calls.");

impl TenantId {
    /// Render the id as a JSON value, the form stored in tenant columns.
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::Value::String(self.0.to_string())
    }

    /// Read a tenant id back out of a row value.
    ///
    /// Returns `None` for nulls, non-strings, and malformed UUIDs.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        value.as_str().and_then(|s| s.parse().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tenant_id_value_roundtrip_through_row_column() {
        let tenant = TenantId::now_v7();
        let value = tenant.to_value();
        assert_eq!(TenantId::from_value(&value), Some(tenant));
    }

    #[test]
    fn test_tenant_id_from_value_rejects_garbage() {
        assert_eq!(TenantId::from_value(&json!(null)), None);
        assert_eq!(TenantId::from_value(&json!(42)), None);
        assert_eq!(TenantId::from_value(&json!("not-a-uuid")), None);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let user = UserId::from_uuid(Uuid::nil());
        let json = serde_json::to_string(&user).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
    }

    #[test]
    fn test_parse_trims_whitespace() {
        let tenant: TenantId = " 00000000-0000-0000-0000-000000000000 ".parse().unwrap();
        assert_eq!(tenant.as_uuid(), Uuid::nil());
    }
}
