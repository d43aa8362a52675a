//! Tenantry Test Utilities
//!
//! Centralized test infrastructure for the Tenantry workspace:
//! - Recording doubles for the cache, signal sink, and operation observer
//! - Proptest generators for identities, rows, and change events
//! - Fixtures for common rows and a ready-wired guard
//! - Assertions over guard envelopes

// Re-export in-memory backends from their source crates
pub use tenantry_events::InMemoryChangeFeed;
pub use tenantry_storage::{InMemoryStore, MockTenantDirectory};

// Re-export core types for convenience
pub use tenantry_core::{
    ChangeEvent, ChangeKind, GuardConfig, GuardError, IdType, Operation, OperationStatus,
    QueryKey, RawChangePayload, Row, Severity, TenantId, Timestamp, UserId, WatchedTable,
};

use std::collections::HashSet;
use std::sync::Mutex;
use tenantry_events::{CrossCuttingSignal, QueryCache, SignalSink};
use tenantry_storage::{OperationLogEntry, OperationObserver};

// ============================================================================
// RECORDING DOUBLES
// ============================================================================

/// Query cache that records every invalidated key in order.
#[derive(Debug, Default)]
pub struct RecordingCache {
    keys: Mutex<Vec<QueryKey>>,
}

impl RecordingCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<QueryKey> {
        self.keys.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn key_set(&self) -> HashSet<QueryKey> {
        self.keys().into_iter().collect()
    }

    pub fn clear(&self) {
        self.keys.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl QueryCache for RecordingCache {
    fn invalidate(&self, key: &QueryKey) {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(key.clone());
    }
}

/// Signal sink that keeps every emitted signal.
#[derive(Debug, Default)]
pub struct RecordingSignalSink {
    signals: Mutex<Vec<CrossCuttingSignal>>,
}

impl RecordingSignalSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signals(&self) -> Vec<CrossCuttingSignal> {
        self.signals.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl SignalSink for RecordingSignalSink {
    fn emit(&self, signal: CrossCuttingSignal) {
        self.signals
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(signal);
    }
}

/// Operation observer that keeps every entry it is shown.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    entries: Mutex<Vec<OperationLogEntry>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<OperationLogEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn severities(&self) -> Vec<Severity> {
        self.entries().iter().map(|entry| entry.severity()).collect()
    }
}

impl OperationObserver for RecordingObserver {
    fn observe(&self, entry: &OperationLogEntry) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry.clone());
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for Tenantry types.

    use super::*;
    use chrono::Utc;
    use proptest::prelude::*;
    use serde_json::Value;
    use uuid::Uuid;

    // === Identity Generators ===

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_tenant_id() -> impl Strategy<Value = TenantId> {
        arb_uuid().prop_map(TenantId::from_uuid)
    }

    pub fn arb_user_id() -> impl Strategy<Value = UserId> {
        arb_uuid().prop_map(UserId::from_uuid)
    }

    /// Two tenants guaranteed to differ.
    pub fn arb_tenant_pair() -> impl Strategy<Value = (TenantId, TenantId)> {
        (arb_tenant_id(), arb_tenant_id()).prop_filter("tenants must differ", |(a, b)| a != b)
    }

    // === Enum Generators ===

    pub fn arb_watched_table() -> impl Strategy<Value = WatchedTable> {
        prop::sample::select(WatchedTable::ALL.to_vec())
    }

    pub fn arb_change_kind() -> impl Strategy<Value = ChangeKind> {
        prop_oneof![
            Just(ChangeKind::Insert),
            Just(ChangeKind::Update),
            Just(ChangeKind::Delete),
        ]
    }

    pub fn arb_operation() -> impl Strategy<Value = Operation> {
        prop_oneof![
            Just(Operation::Select),
            Just(Operation::Insert),
            Just(Operation::Update),
            Just(Operation::Delete),
        ]
    }

    pub fn arb_operation_status() -> impl Strategy<Value = OperationStatus> {
        prop_oneof![
            Just(OperationStatus::Success),
            Just(OperationStatus::Error),
            Just(OperationStatus::Empty),
            Just(OperationStatus::RlsBlocked),
        ]
    }

    // === Row Generators ===

    /// A JSON scalar as stored in a column.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,16}".prop_map(Value::String),
        ]
    }

    /// A row of up to six scalar columns. Column names never collide with
    /// `company_id` or `id`.
    pub fn arb_row() -> impl Strategy<Value = Row> {
        prop::collection::btree_map("[a-z]{2,8}_[0-9]{1,3}", arb_scalar(), 0..6)
            .prop_map(|columns| columns.into_iter().collect())
    }

    /// A row carrying `id` and an arbitrary (possibly foreign) tenant column.
    pub fn arb_row_with_tenant(column: &'static str) -> impl Strategy<Value = Row> {
        (arb_row(), arb_uuid(), arb_tenant_id()).prop_map(move |(mut row, id, tenant)| {
            row.insert("id".to_string(), Value::String(id.to_string()));
            row.insert(column.to_string(), tenant.to_value());
            row
        })
    }

    pub fn arb_change_event() -> impl Strategy<Value = ChangeEvent> {
        (arb_watched_table(), arb_change_kind(), arb_row(), arb_row()).prop_map(
            |(table, kind, old, new)| match kind {
                ChangeKind::Insert => ChangeEvent::insert(table, new),
                ChangeKind::Update => ChangeEvent::update(table, old, new),
                ChangeKind::Delete => ChangeEvent::delete(table, old),
            },
        )
    }

    pub fn arb_log_entry() -> impl Strategy<Value = OperationLogEntry> {
        (
            "[a-z_]{3,16}",
            arb_operation(),
            proptest::option::of(arb_tenant_id()),
            arb_operation_status(),
            0usize..500,
            0u64..5_000,
        )
            .prop_map(|(table, operation, tenant_id, status, row_count, duration_ms)| {
                OperationLogEntry {
                    timestamp: Utc::now(),
                    table,
                    operation,
                    tenant_id,
                    status,
                    row_count,
                    error: status.is_failure().then(|| "failed".to_string()),
                    duration_ms,
                }
            })
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built rows and wiring for common scenarios.

    use super::*;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tenantry_storage::{
        GuardedAccessWrapper, NoopObserver, OperationLog, OperationObserver, TenantContextResolver,
    };

    /// Guard over in-memory backends.
    pub type TestGuard = GuardedAccessWrapper<InMemoryStore, MockTenantDirectory>;

    /// Convert a JSON object literal into a row.
    #[track_caller]
    pub fn row(value: Value) -> Row {
        match value {
            Value::Object(map) => map,
            other => panic!("Expected a JSON object, got: {other}"),
        }
    }

    pub fn employee_row(tenant_id: TenantId, id: &str, name: &str) -> Row {
        row(json!({
            "id": id,
            "company_id": tenant_id.to_string(),
            "name": name,
            "active": true,
        }))
    }

    pub fn settings_row(tenant_id: TenantId, language: &str) -> Row {
        row(json!({
            "id": tenant_id.to_string(),
            "company_id": tenant_id.to_string(),
            "language": language,
        }))
    }

    pub fn absence_row(tenant_id: TenantId, id: i64, employee_id: &str) -> Row {
        row(json!({
            "id": id,
            "company_id": tenant_id.to_string(),
            "employee_id": employee_id,
            "status": "pending",
        }))
    }

    /// Wire payload for `table` in the `public` schema.
    pub fn raw_payload(
        table: WatchedTable,
        kind: ChangeKind,
        old: Option<Row>,
        new: Option<Row>,
    ) -> RawChangePayload {
        RawChangePayload {
            schema: "public".to_string(),
            table: table.as_str().to_string(),
            event_type: kind,
            old,
            new,
        }
    }

    /// Guard whose directory resolves to `tenant_id` (or nothing).
    pub fn guard_for(
        tenant_id: Option<TenantId>,
    ) -> (Arc<InMemoryStore>, Arc<MockTenantDirectory>, TestGuard) {
        guard_with_observer(tenant_id, Arc::new(NoopObserver))
    }

    pub fn guard_with_observer(
        tenant_id: Option<TenantId>,
        observer: Arc<dyn OperationObserver>,
    ) -> (Arc<InMemoryStore>, Arc<MockTenantDirectory>, TestGuard) {
        let config = GuardConfig::default();
        let store = Arc::new(InMemoryStore::new());
        let directory = Arc::new(match tenant_id {
            Some(tenant_id) => MockTenantDirectory::with_effective(tenant_id),
            None => MockTenantDirectory::new(),
        });
        let resolver = Arc::new(TenantContextResolver::new(
            Arc::clone(&directory),
            config.tenant_ttl,
        ));
        let log = Arc::new(OperationLog::with_observer(config.log_capacity, observer));
        let guard = GuardedAccessWrapper::new(Arc::clone(&store), resolver, log, Arc::new(config));
        (store, directory, guard)
    }
}

// ============================================================================
// ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over guard results.

    use super::*;
    use tenantry_storage::Envelope;

    /// Assert that a call failed closed for lack of a tenant.
    #[track_caller]
    pub fn assert_no_tenant_context<T: std::fmt::Debug>(envelope: &Envelope<T>) {
        match envelope.error() {
            Some(GuardError::NoTenantContext { .. }) => {}
            other => panic!("Expected NoTenantContext, got: {:?}", other),
        }
        assert_eq!(envelope.status(), OperationStatus::Error);
    }

    #[track_caller]
    pub fn assert_status<T: std::fmt::Debug>(envelope: &Envelope<T>, expected: OperationStatus) {
        assert_eq!(
            envelope.status(),
            expected,
            "Unexpected status, envelope: {:?}",
            envelope
        );
    }

    /// Assert that every row carries `tenant_id` in `column`.
    #[track_caller]
    pub fn assert_all_stamped(rows: &[Row], column: &str, tenant_id: TenantId) {
        for row in rows {
            assert_eq!(
                row.get(column).and_then(TenantId::from_value),
                Some(tenant_id),
                "Row not stamped with {tenant_id}: {row:?}"
            );
        }
    }
}
