//! Cross-cutting signals raised by change handlers.
//!
//! Some changes matter beyond cache invalidation, e.g. a tenant switching its
//! display language. Handlers emit these as [`CrossCuttingSignal`]s to a
//! [`SignalSink`] instead of reaching into unrelated subsystems.

use serde::Serialize;
use serde_json::Value;
use tenantry_core::TenantId;
use tokio::sync::broadcast;

/// A change with effects outside the query cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CrossCuttingSignal {
    /// The tenant's display language changed.
    LanguageChanged {
        tenant_id: Option<TenantId>,
        old: Value,
        new: Value,
    },
}

impl CrossCuttingSignal {
    pub fn kind(&self) -> &'static str {
        match self {
            CrossCuttingSignal::LanguageChanged { .. } => "language_changed",
        }
    }
}

/// Receiver for cross-cutting signals.
pub trait SignalSink: Send + Sync {
    fn emit(&self, signal: CrossCuttingSignal);
}

/// Fans signals out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastSignalSink {
    tx: broadcast::Sender<CrossCuttingSignal>,
}

impl BroadcastSignalSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CrossCuttingSignal> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSignalSink {
    fn default() -> Self {
        Self::new(64)
    }
}

impl SignalSink for BroadcastSignalSink {
    fn emit(&self, signal: CrossCuttingSignal) {
        let kind = signal.kind();
        match self.tx.send(signal) {
            Ok(receivers) => tracing::debug!(kind, receivers, "Emitted signal"),
            Err(_) => tracing::debug!(kind, "No receivers for signal"),
        }
    }
}

/// Drops every signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSignalSink;

impl SignalSink for NoopSignalSink {
    fn emit(&self, _signal: CrossCuttingSignal) {}
}
