//! Session configuration loaded from the environment.

use tenantry_core::{ConfigError, GuardConfig, ReconnectConfig};

/// Log output settings.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: "tenantry=debug,info".to_string(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Environment variables:
    /// - `TENANTRY_LOG_FILTER` (default: "tenantry=debug,info")
    /// - `TENANTRY_LOG_FORMAT`: "json" or "pretty" (default: pretty)
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let json = match lookup("TENANTRY_LOG_FORMAT").map(|s| s.trim().to_lowercase()) {
            None => defaults.json,
            Some(format) if format == "json" => true,
            Some(format) if format == "pretty" || format == "text" => false,
            Some(format) => {
                return Err(ConfigError::InvalidValue {
                    field: "TENANTRY_LOG_FORMAT".to_string(),
                    value: format,
                    reason: "expected \"json\" or \"pretty\"".to_string(),
                })
            }
        };

        Ok(Self {
            filter: lookup("TENANTRY_LOG_FILTER")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.filter),
            json,
        })
    }
}

/// Everything a [`TenantSession`](crate::TenantSession) needs to be built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientConfig {
    pub guard: GuardConfig,
    pub reconnect: ReconnectConfig,
    pub telemetry: TelemetryConfig,
}

impl ClientConfig {
    /// Load all sections from `TENANTRY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            guard: GuardConfig::from_lookup(&lookup)?,
            reconnect: ReconnectConfig::from_lookup(&lookup)?,
            telemetry: TelemetryConfig::from_lookup(&lookup)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = ClientConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.guard.tenant_column, "company_id");
        assert!(!config.telemetry.json);
    }

    #[test]
    fn test_sections_read_their_variables() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("TENANTRY_TENANT_COLUMN", "org_id"),
            ("TENANTRY_RECONNECT_ENABLED", "false"),
            ("TENANTRY_LOG_FORMAT", "JSON"),
            ("TENANTRY_LOG_FILTER", "tenantry_events=trace"),
        ]))
        .unwrap();

        assert_eq!(config.guard.tenant_column, "org_id");
        assert!(!config.reconnect.enabled);
        assert!(config.telemetry.json);
        assert_eq!(config.telemetry.filter, "tenantry_events=trace");
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        let err = ClientConfig::from_lookup(lookup(&[("TENANTRY_LOG_FORMAT", "xml")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "TENANTRY_LOG_FORMAT"));
    }

    #[test]
    fn test_log_capacity_above_bound_is_rejected() {
        let err = ClientConfig::from_lookup(lookup(&[("TENANTRY_LOG_CAPACITY", "80")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "log_capacity"));
    }
}
