//! In-memory store and tenant directory for tests and local runs.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tenantry_core::{Row, StoreError, TenantId, UserId};

use crate::store::{Filter, RemoteStore, SelectQuery, TenantDirectory};

// ============================================================================
// MOCK STORE
// ============================================================================

/// Table-per-`Vec<Row>` store with scripted failures.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<String, Vec<Row>>>,
    denied: RwLock<HashSet<String>>,
    failures: RwLock<HashMap<String, StoreError>>,
    calls: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append rows directly, bypassing any guard.
    pub fn seed(&self, table: &str, rows: Vec<Row>) {
        self.tables
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    /// Current contents of a table.
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    /// Reject every call on `table` with a row-level policy error.
    pub fn deny_table(&self, table: &str) {
        self.denied
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(table.to_string());
    }

    /// Fail every call on `table` with the given error.
    pub fn fail_table(&self, table: &str, error: StoreError) {
        self.failures
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(table.to_string(), error);
    }

    /// Number of calls that reached the store.
    pub fn calls(&self) -> usize {
        self.calls.load(AtomicOrdering::SeqCst)
    }

    fn enter(&self, table: &str) -> Result<(), StoreError> {
        self.calls.fetch_add(1, AtomicOrdering::SeqCst);
        if self
            .denied
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(table)
        {
            return Err(StoreError::new(format!(
                "new row violates row-level security policy for table \"{table}\""
            ))
            .with_code("42501"));
        }
        if let Some(error) = self
            .failures
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(table)
        {
            return Err(error.clone());
        }
        Ok(())
    }
}

fn matches_all(filters: &[Filter], row: &Row) -> bool {
    filters.iter().all(|f| f.matches(row))
}

fn order_rows(rows: &mut [Row], column: &str, ascending: bool) {
    rows.sort_by(|a, b| {
        let ordering = match (a.get(column), b.get(column)) {
            (Some(x), Some(y)) => match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => x.to_string().cmp(&y.to_string()),
            },
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ascending {
            ordering
        } else {
            ordering.reverse()
        }
    });
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Row>, StoreError> {
        self.enter(&query.table)?;
        let mut rows: Vec<Row> = self
            .rows(&query.table)
            .into_iter()
            .filter(|row| query.matches(row))
            .collect();
        if let Some((column, ascending)) = &query.order_by {
            order_rows(&mut rows, column, *ascending);
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows.iter().map(|row| query.project(row)).collect())
    }

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, StoreError> {
        self.enter(table)?;
        self.seed(table, rows.clone());
        Ok(rows)
    }

    async fn update(
        &self,
        table: &str,
        values: &Row,
        filters: &[Filter],
    ) -> Result<Vec<Row>, StoreError> {
        self.enter(table)?;
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let Some(rows) = tables.get_mut(table) else {
            return Ok(Vec::new());
        };
        let mut updated = Vec::new();
        for row in rows.iter_mut().filter(|row| matches_all(filters, row)) {
            for (column, value) in values {
                row.insert(column.clone(), value.clone());
            }
            updated.push(row.clone());
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, StoreError> {
        self.enter(table)?;
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let Some(rows) = tables.get_mut(table) else {
            return Ok(Vec::new());
        };
        let (removed, kept): (Vec<Row>, Vec<Row>) =
            rows.drain(..).partition(|row| matches_all(filters, row));
        *rows = kept;
        Ok(removed)
    }
}

// ============================================================================
// MOCK DIRECTORY
// ============================================================================

/// Scripted tenant lookups with call counters.
#[derive(Debug)]
pub struct MockTenantDirectory {
    primary: Mutex<Result<Option<TenantId>, StoreError>>,
    memberships: Mutex<HashMap<UserId, TenantId>>,
    membership_error: Mutex<Option<StoreError>>,
    latency: Option<Duration>,
    primary_calls: AtomicUsize,
    membership_calls: AtomicUsize,
}

impl Default for MockTenantDirectory {
    fn default() -> Self {
        Self {
            primary: Mutex::new(Ok(None)),
            memberships: Mutex::new(HashMap::new()),
            membership_error: Mutex::new(None),
            latency: None,
            primary_calls: AtomicUsize::new(0),
            membership_calls: AtomicUsize::new(0),
        }
    }
}

impl MockTenantDirectory {
    /// Directory whose primary lookup yields nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory whose primary lookup yields `tenant_id`.
    pub fn with_effective(tenant_id: TenantId) -> Self {
        let directory = Self::default();
        directory.set_primary(Ok(Some(tenant_id)));
        directory
    }

    /// Delay every lookup by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn set_primary(&self, result: Result<Option<TenantId>, StoreError>) {
        *self.primary.lock().unwrap_or_else(|e| e.into_inner()) = result;
    }

    pub fn set_membership(&self, user_id: UserId, tenant_id: TenantId) {
        self.memberships
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(user_id, tenant_id);
    }

    pub fn set_membership_error(&self, error: StoreError) {
        *self
            .membership_error
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(error);
    }

    pub fn primary_calls(&self) -> usize {
        self.primary_calls.load(AtomicOrdering::SeqCst)
    }

    pub fn membership_calls(&self) -> usize {
        self.membership_calls.load(AtomicOrdering::SeqCst)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl TenantDirectory for MockTenantDirectory {
    async fn resolve_effective_tenant(&self) -> Result<Option<TenantId>, StoreError> {
        self.primary_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.delay().await;
        self.primary
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    async fn membership_tenant(&self, user_id: UserId) -> Result<Option<TenantId>, StoreError> {
        self.membership_calls.fetch_add(1, AtomicOrdering::SeqCst);
        self.delay().await;
        if let Some(error) = self
            .membership_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Err(error);
        }
        Ok(self
            .memberships
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&user_id)
            .copied())
    }
}
