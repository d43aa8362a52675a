//! Guard and router configuration.
//!
//! Configuration is loaded from environment variables with defaults that
//! match the hosted store's conventions.

use crate::ConfigError;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hasher};
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on retained operation log entries.
pub const MAX_LOG_CAPACITY: usize = 50;

// ============================================================================
// GUARD CONFIGURATION
// ============================================================================

/// Settings for tenant resolution, guarded access, and the operation log.
#[derive(Debug, Clone, PartialEq)]
pub struct GuardConfig {
    /// Column holding the owning tenant on every tenant-scoped table.
    pub tenant_column: String,

    /// How long a resolved tenant id is served from cache.
    pub tenant_ttl: Duration,

    /// Number of retained operation log entries, at most [`MAX_LOG_CAPACITY`].
    pub log_capacity: usize,

    /// Database schema whose change events are accepted.
    pub schema: String,

    /// Store error codes that signal a row-level policy denial.
    pub rls_error_codes: Vec<String>,

    /// Message fragments (any case) that signal a row-level policy denial.
    pub rls_message_markers: Vec<String>,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            tenant_column: "company_id".to_string(),
            tenant_ttl: Duration::from_secs(30),
            log_capacity: MAX_LOG_CAPACITY,
            schema: "public".to_string(),
            rls_error_codes: vec!["42501".to_string(), "PGRST301".to_string()],
            rls_message_markers: vec![
                "row-level security".to_string(),
                "permission denied".to_string(),
            ],
        }
    }
}

impl GuardConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenant_column(mut self, column: impl Into<String>) -> Self {
        self.tenant_column = column.into();
        self
    }

    pub fn with_tenant_ttl(mut self, ttl: Duration) -> Self {
        self.tenant_ttl = ttl;
        self
    }

    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity;
        self
    }

    pub fn with_schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = schema.into();
        self
    }

    /// Create GuardConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TENANTRY_TENANT_COLUMN`: tenant column name (default: company_id)
    /// - `TENANTRY_TENANT_TTL_MS`: tenant cache TTL in ms (default: 30000)
    /// - `TENANTRY_LOG_CAPACITY`: operation log size (default: 50)
    /// - `TENANTRY_SCHEMA`: watched schema (default: public)
    /// - `TENANTRY_RLS_ERROR_CODES`: comma-separated denial codes
    /// - `TENANTRY_RLS_MESSAGE_MARKERS`: comma-separated denial message fragments
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` passes the process env.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            tenant_column: lookup("TENANTRY_TENANT_COLUMN")
                .map(|s| s.trim().to_string())
                .unwrap_or(defaults.tenant_column),
            tenant_ttl: parse_var::<u64, _>(&lookup, "TENANTRY_TENANT_TTL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.tenant_ttl),
            log_capacity: parse_var(&lookup, "TENANTRY_LOG_CAPACITY")?
                .unwrap_or(defaults.log_capacity),
            schema: lookup("TENANTRY_SCHEMA")
                .map(|s| s.trim().to_string())
                .unwrap_or(defaults.schema),
            rls_error_codes: lookup("TENANTRY_RLS_ERROR_CODES")
                .map(|s| split_list(&s))
                .unwrap_or(defaults.rls_error_codes),
            rls_message_markers: lookup("TENANTRY_RLS_MESSAGE_MARKERS")
                .map(|s| split_list(&s).into_iter().map(|m| m.to_lowercase()).collect())
                .unwrap_or(defaults.rls_message_markers),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tenant_column.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "tenant_column".to_string(),
            });
        }
        if self.schema.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "schema".to_string(),
            });
        }
        if self.log_capacity == 0 || self.log_capacity > MAX_LOG_CAPACITY {
            return Err(ConfigError::InvalidValue {
                field: "log_capacity".to_string(),
                value: self.log_capacity.to_string(),
                reason: format!("must be between 1 and {}", MAX_LOG_CAPACITY),
            });
        }
        if self.tenant_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "tenant_ttl".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// RECONNECT CONFIGURATION
// ============================================================================

/// Backoff policy for change streams that end while the router is active.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    pub jitter_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_ms: 500,
            max_ms: 30_000,
            multiplier: 2.0,
            jitter_ms: 250,
        }
    }
}

impl ReconnectConfig {
    /// Never resubscribe; an ended stream stays ended until `cleanup`.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Create ReconnectConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TENANTRY_RECONNECT_ENABLED`: "true" or "false" (default: true)
    /// - `TENANTRY_RECONNECT_INITIAL_MS` (default: 500)
    /// - `TENANTRY_RECONNECT_MAX_MS` (default: 30000)
    /// - `TENANTRY_RECONNECT_MULTIPLIER` (default: 2.0)
    /// - `TENANTRY_RECONNECT_JITTER_MS` (default: 250)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            enabled: lookup("TENANTRY_RECONNECT_ENABLED")
                .map(|s| s.trim().to_lowercase() != "false")
                .unwrap_or(defaults.enabled),
            initial_ms: parse_var(&lookup, "TENANTRY_RECONNECT_INITIAL_MS")?
                .unwrap_or(defaults.initial_ms),
            max_ms: parse_var(&lookup, "TENANTRY_RECONNECT_MAX_MS")?.unwrap_or(defaults.max_ms),
            multiplier: parse_var(&lookup, "TENANTRY_RECONNECT_MULTIPLIER")?
                .unwrap_or(defaults.multiplier),
            jitter_ms: parse_var(&lookup, "TENANTRY_RECONNECT_JITTER_MS")?
                .unwrap_or(defaults.jitter_ms),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.initial_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "initial_ms".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.multiplier.is_nan() || self.multiplier < 1.0 {
            return Err(ConfigError::InvalidValue {
                field: "multiplier".to_string(),
                value: self.multiplier.to_string(),
                reason: "must be at least 1.0".to_string(),
            });
        }
        if self.initial_ms > self.max_ms {
            return Err(ConfigError::InvalidValue {
                field: "initial_ms".to_string(),
                value: self.initial_ms.to_string(),
                reason: format!("exceeds max_ms ({})", self.max_ms),
            });
        }
        Ok(())
    }

    /// Next delay after `current_ms`, capped at `max_ms`.
    pub fn next_backoff(&self, current_ms: u64) -> u64 {
        let next = (current_ms as f64 * self.multiplier) as u64;
        next.min(self.max_ms)
    }

    /// Sleep before the next resubscribe: `base_ms` plus up to `jitter_ms`.
    pub fn jittered(&self, base_ms: u64) -> Duration {
        let spread = match self.jitter_ms {
            0 => 0,
            jitter => RandomState::new().build_hasher().finish() % jitter,
        };
        Duration::from_millis(base_ms.saturating_add(spread))
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: key.to_string(),
                value: raw.clone(),
                reason: "could not be parsed".to_string(),
            }),
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = GuardConfig::default();
        assert_eq!(config.tenant_column, "company_id");
        assert_eq!(config.tenant_ttl, Duration::from_secs(30));
        assert_eq!(config.log_capacity, 50);
        assert_eq!(config.schema, "public");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = GuardConfig::from_lookup(lookup_from(&[
            ("TENANTRY_TENANT_COLUMN", "organization_id"),
            ("TENANTRY_TENANT_TTL_MS", "5000"),
            ("TENANTRY_LOG_CAPACITY", "10"),
            ("TENANTRY_RLS_MESSAGE_MARKERS", "Policy Violation, ,denied"),
        ]))
        .unwrap();

        assert_eq!(config.tenant_column, "organization_id");
        assert_eq!(config.tenant_ttl, Duration::from_millis(5000));
        assert_eq!(config.log_capacity, 10);
        assert_eq!(config.rls_message_markers, vec!["policy violation", "denied"]);
        assert_eq!(config.rls_error_codes, GuardConfig::default().rls_error_codes);
    }

    #[test]
    fn test_from_lookup_rejects_unparseable_and_invalid() {
        let err = GuardConfig::from_lookup(lookup_from(&[("TENANTRY_LOG_CAPACITY", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "TENANTRY_LOG_CAPACITY"));

        let err = GuardConfig::from_lookup(lookup_from(&[("TENANTRY_LOG_CAPACITY", "0")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "log_capacity"));

        let err = GuardConfig::from_lookup(lookup_from(&[("TENANTRY_LOG_CAPACITY", "80")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref value, .. } if value == "80"));
        assert!(GuardConfig::default().with_log_capacity(MAX_LOG_CAPACITY).validate().is_ok());

        let err = GuardConfig::from_lookup(lookup_from(&[("TENANTRY_TENANT_COLUMN", " ")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { .. }));
    }

    #[test]
    fn test_reconnect_backoff_is_capped() {
        let config = ReconnectConfig {
            initial_ms: 100,
            max_ms: 1000,
            multiplier: 3.0,
            ..ReconnectConfig::default()
        };
        assert_eq!(config.next_backoff(100), 300);
        assert_eq!(config.next_backoff(300), 900);
        assert_eq!(config.next_backoff(900), 1000);
    }

    #[test]
    fn test_reconnect_from_lookup() {
        let config = ReconnectConfig::from_lookup(lookup_from(&[
            ("TENANTRY_RECONNECT_ENABLED", "FALSE"),
            ("TENANTRY_RECONNECT_INITIAL_MS", "10"),
        ]))
        .unwrap();
        assert!(!config.enabled);
        assert_eq!(config.initial_ms, 10);

        let err = ReconnectConfig::from_lookup(lookup_from(&[("TENANTRY_RECONNECT_MULTIPLIER", "0.5")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_reconnect_rejects_zero_delay_policies() {
        let zero_initial = ReconnectConfig {
            initial_ms: 0,
            ..ReconnectConfig::default()
        };
        assert!(matches!(
            zero_initial.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "initial_ms"
        ));

        let nan_multiplier = ReconnectConfig {
            multiplier: f64::NAN,
            ..ReconnectConfig::default()
        };
        assert!(matches!(
            nan_multiplier.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "multiplier"
        ));

        let err = ReconnectConfig::from_lookup(lookup_from(&[("TENANTRY_RECONNECT_MULTIPLIER", "NaN")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_jitter_is_bounded() {
        let config = ReconnectConfig {
            jitter_ms: 250,
            ..ReconnectConfig::default()
        };
        for _ in 0..32 {
            let delay = config.jittered(500);
            assert!(delay >= Duration::from_millis(500) && delay < Duration::from_millis(750));
        }
        let exact = ReconnectConfig {
            jitter_ms: 0,
            ..ReconnectConfig::default()
        };
        assert_eq!(exact.jittered(500), Duration::from_millis(500));
    }
}
