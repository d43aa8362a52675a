//! Tracing subscriber setup.

use tenantry_core::{TenantryError, TenantryResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::TelemetryConfig;

/// Install a global tracing subscriber.
///
/// `RUST_LOG` wins over the configured filter when set. Fails instead of
/// panicking when a global subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> TenantryResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| TenantryError::Telemetry {
            reason: format!("Invalid log filter {:?}: {}", config.filter, e),
        })?;

    let json_layer = config.json.then(|| tracing_subscriber::fmt::layer().json());
    let text_layer = (!config.json).then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e| TenantryError::Telemetry {
            reason: format!("Failed to init subscriber: {}", e),
        })?;

    tracing::info!(filter = %config.filter, json = config.json, "Tracing initialized");
    Ok(())
}
