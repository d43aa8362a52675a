//! Bounded log of guarded operation outcomes.
//!
//! The log is diagnostics only: nothing in the guard reads it back to make
//! decisions. Every recorded entry is also handed to an
//! [`OperationObserver`], which by default turns it into a `tracing` event.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tenantry_core::{
    DurationMs, Operation, OperationStatus, Severity, TenantId, Timestamp, MAX_LOG_CAPACITY,
};

/// One guarded call and how it ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationLogEntry {
    pub timestamp: Timestamp,
    pub table: String,
    pub operation: Operation,
    pub tenant_id: Option<TenantId>,
    pub status: OperationStatus,
    pub row_count: usize,
    pub error: Option<String>,
    pub duration_ms: DurationMs,
}

impl OperationLogEntry {
    pub fn severity(&self) -> Severity {
        self.status.severity()
    }
}

/// Receiver for operation diagnostics.
pub trait OperationObserver: Send + Sync {
    fn observe(&self, entry: &OperationLogEntry);
}

/// Emits each entry as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl OperationObserver for TracingObserver {
    fn observe(&self, entry: &OperationLogEntry) {
        let tenant_id = entry.tenant_id.map(|t| t.to_string());
        match entry.severity() {
            Severity::Success | Severity::Empty => tracing::debug!(
                table = %entry.table,
                operation = %entry.operation,
                tenant_id = ?tenant_id,
                status = %entry.status,
                row_count = entry.row_count,
                duration_ms = entry.duration_ms,
                "Guarded operation completed"
            ),
            Severity::PolicyDenied => tracing::warn!(
                table = %entry.table,
                operation = %entry.operation,
                tenant_id = ?tenant_id,
                error = ?entry.error,
                duration_ms = entry.duration_ms,
                "Guarded operation blocked by row-level policy"
            ),
            Severity::Error => tracing::error!(
                table = %entry.table,
                operation = %entry.operation,
                tenant_id = ?tenant_id,
                error = ?entry.error,
                duration_ms = entry.duration_ms,
                "Guarded operation failed"
            ),
        }
    }
}

/// Discards diagnostics.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl OperationObserver for NoopObserver {
    fn observe(&self, _entry: &OperationLogEntry) {}
}

/// Fixed-capacity, newest-first ring of operation outcomes.
pub struct OperationLog {
    entries: Mutex<VecDeque<OperationLogEntry>>,
    capacity: usize,
    observer: Arc<dyn OperationObserver>,
}

impl OperationLog {
    pub const DEFAULT_CAPACITY: usize = MAX_LOG_CAPACITY;

    pub fn new(capacity: usize) -> Self {
        Self::with_observer(capacity, Arc::new(TracingObserver))
    }

    /// `capacity` is clamped to `1..=MAX_LOG_CAPACITY`.
    pub fn with_observer(capacity: usize, observer: Arc<dyn OperationObserver>) -> Self {
        let capacity = capacity.clamp(1, MAX_LOG_CAPACITY);
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            observer,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Prepend an entry, evicting the oldest beyond capacity.
    pub fn record(&self, entry: OperationLogEntry) {
        {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.push_front(entry.clone());
            entries.truncate(self.capacity);
        }
        self.observer.observe(&entry);
    }

    /// Snapshot of all entries, newest first.
    pub fn get_all(&self) -> Vec<OperationLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn latest(&self) -> Option<OperationLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .front()
            .cloned()
    }

    pub fn with_status(&self, status: OperationStatus) -> Vec<OperationLogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|entry| entry.status == status)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Default for OperationLog {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for OperationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationLog")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(table: &str, status: OperationStatus) -> OperationLogEntry {
        OperationLogEntry {
            timestamp: Utc::now(),
            table: table.to_string(),
            operation: Operation::Select,
            tenant_id: None,
            status,
            row_count: 0,
            error: None,
            duration_ms: 1,
        }
    }

    #[derive(Default)]
    struct CountingObserver {
        seen: Mutex<Vec<Severity>>,
    }

    impl OperationObserver for CountingObserver {
        fn observe(&self, entry: &OperationLogEntry) {
            self.seen.lock().unwrap().push(entry.severity());
        }
    }

    #[test]
    fn test_log_is_bounded_newest_first() {
        let log = OperationLog::with_observer(50, Arc::new(NoopObserver));
        for i in 1..=51 {
            log.record(entry(&format!("t{i}"), OperationStatus::Success));
        }

        let all = log.get_all();
        assert_eq!(all.len(), 50);
        assert_eq!(all[0].table, "t51");
        assert_eq!(all[49].table, "t2");
        assert!(all.iter().all(|e| e.table != "t1"));
    }

    #[test]
    fn test_observer_sees_every_severity() {
        let observer = Arc::new(CountingObserver::default());
        let log = OperationLog::with_observer(10, observer.clone());

        log.record(entry("a", OperationStatus::Success));
        log.record(entry("b", OperationStatus::Empty));
        log.record(entry("c", OperationStatus::RlsBlocked));
        log.record(entry("d", OperationStatus::Error));

        assert_eq!(
            *observer.seen.lock().unwrap(),
            vec![Severity::Success, Severity::Empty, Severity::PolicyDenied, Severity::Error]
        );
    }

    #[test]
    fn test_clear_and_status_filter() {
        let log = OperationLog::with_observer(5, Arc::new(NoopObserver));
        log.record(entry("a", OperationStatus::Error));
        log.record(entry("b", OperationStatus::Success));

        assert_eq!(log.with_status(OperationStatus::Error).len(), 1);
        assert_eq!(log.latest().unwrap().table, "b");

        log.clear();
        assert!(log.is_empty());
        assert!(log.latest().is_none());
    }

    #[test]
    fn test_oversized_capacity_is_clamped() {
        let log = OperationLog::with_observer(80, Arc::new(NoopObserver));
        for i in 0..60 {
            log.record(entry(&format!("t{i}"), OperationStatus::Success));
        }
        assert_eq!(log.capacity(), MAX_LOG_CAPACITY);
        assert_eq!(log.len(), MAX_LOG_CAPACITY);
        assert_eq!(log.latest().unwrap().table, "t59");
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let log = OperationLog::with_observer(0, Arc::new(NoopObserver));
        log.record(entry("a", OperationStatus::Success));
        assert_eq!(log.capacity(), 1);
        assert_eq!(log.len(), 1);
    }
}
