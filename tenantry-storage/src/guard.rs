//! Tenant-guarded CRUD access to the remote store.
//!
//! Every call resolves the session's tenant before touching the store and
//! fails closed when there is none. Reads are filtered on the tenant column,
//! inserts are stamped with it, and updates/deletes match on both the
//! caller's key and the tenant column, so a key belonging to another tenant
//! affects zero rows.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tenantry_core::{
    GuardConfig, GuardError, Operation, OperationStatus, Row, StoreError, TenantId,
};
use tokio::time::Instant;

use crate::oplog::{OperationLog, OperationLogEntry};
use crate::resolver::TenantContextResolver;
use crate::store::{Filter, QueryRefinement, RemoteStore, SelectQuery, TenantDirectory};

// ============================================================================
// OPTIONS AND PAYLOADS
// ============================================================================

type Compose = Box<dyn FnOnce(QueryRefinement) -> QueryRefinement + Send>;

/// Options for [`GuardedAccessWrapper::select`].
#[derive(Default)]
pub struct SelectOptions {
    skip_tenant_filter: bool,
    refinement: QueryRefinement,
    compose: Option<Compose>,
}

impl SelectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read across tenants. Only for system-wide reference tables.
    pub fn skip_tenant_filter(mut self) -> Self {
        self.skip_tenant_filter = true;
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.refinement = self.refinement.filter(filter);
        self
    }

    pub fn order(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.refinement = self.refinement.order(column, ascending);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.refinement = self.refinement.limit(limit);
        self
    }

    /// Narrow the query with a builder callback.
    pub fn compose<F>(mut self, f: F) -> Self
    where
        F: FnOnce(QueryRefinement) -> QueryRefinement + Send + 'static,
    {
        self.compose = Some(Box::new(f));
        self
    }

    fn into_refinement(self) -> QueryRefinement {
        match self.compose {
            Some(compose) => compose(self.refinement),
            None => self.refinement,
        }
    }
}

impl std::fmt::Debug for SelectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectOptions")
            .field("skip_tenant_filter", &self.skip_tenant_filter)
            .field("refinement", &self.refinement)
            .field("compose", &self.compose.is_some())
            .finish()
    }
}

/// Options for [`GuardedAccessWrapper::insert`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InsertOptions {
    /// Insert rows as given, without a tenant stamp.
    pub skip_tenant_injection: bool,
}

/// A single row or a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum InsertPayload {
    One(Row),
    Many(Vec<Row>),
}

impl InsertPayload {
    pub fn into_rows(self) -> Vec<Row> {
        match self {
            InsertPayload::One(row) => vec![row],
            InsertPayload::Many(rows) => rows,
        }
    }
}

impl From<Row> for InsertPayload {
    fn from(row: Row) -> Self {
        InsertPayload::One(row)
    }
}

impl From<Vec<Row>> for InsertPayload {
    fn from(rows: Vec<Row>) -> Self {
        InsertPayload::Many(rows)
    }
}

// ============================================================================
// RESULT ENVELOPE
// ============================================================================

/// Outcome of a guarded call: data or error, plus its classification.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    status: OperationStatus,
    result: Result<T, GuardError>,
}

impl<T> Envelope<T> {
    fn ok(status: OperationStatus, data: T) -> Self {
        Self {
            status,
            result: Ok(data),
        }
    }

    fn failed(status: OperationStatus, error: GuardError) -> Self {
        Self {
            status,
            result: Err(error),
        }
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    pub fn data(&self) -> Option<&T> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&GuardError> {
        self.result.as_ref().err()
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    pub fn into_result(self) -> Result<T, GuardError> {
        self.result
    }

    /// Split into the `{data, error}` pair.
    pub fn into_parts(self) -> (Option<T>, Option<GuardError>) {
        match self.result {
            Ok(data) => (Some(data), None),
            Err(error) => (None, Some(error)),
        }
    }
}

/// True when a store failure carries a row-level policy denial signature.
pub fn is_policy_denial(error: &StoreError, config: &GuardConfig) -> bool {
    if let Some(code) = &error.code {
        if config.rls_error_codes.iter().any(|c| c == code) {
            return true;
        }
    }
    let message = error.message.to_lowercase();
    let details = error.details.as_deref().unwrap_or_default().to_lowercase();
    config.rls_message_markers.iter().any(|marker| {
        let marker = marker.to_lowercase();
        message.contains(&marker) || details.contains(&marker)
    })
}

// ============================================================================
// GUARD
// ============================================================================

/// CRUD facade that scopes every call to the resolved tenant.
pub struct GuardedAccessWrapper<S: RemoteStore, D: TenantDirectory> {
    store: Arc<S>,
    resolver: Arc<TenantContextResolver<D>>,
    log: Arc<OperationLog>,
    config: Arc<GuardConfig>,
}

impl<S: RemoteStore, D: TenantDirectory> Clone for GuardedAccessWrapper<S, D> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            resolver: Arc::clone(&self.resolver),
            log: Arc::clone(&self.log),
            config: Arc::clone(&self.config),
        }
    }
}

impl<S: RemoteStore, D: TenantDirectory> GuardedAccessWrapper<S, D> {
    pub fn new(
        store: Arc<S>,
        resolver: Arc<TenantContextResolver<D>>,
        log: Arc<OperationLog>,
        config: Arc<GuardConfig>,
    ) -> Self {
        Self {
            store,
            resolver,
            log,
            config,
        }
    }

    pub fn resolver(&self) -> &TenantContextResolver<D> {
        &self.resolver
    }

    pub fn log(&self) -> &OperationLog {
        &self.log
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Tenant-filtered read.
    pub async fn select(
        &self,
        table: &str,
        columns: &str,
        options: SelectOptions,
    ) -> Envelope<Vec<Row>> {
        let started = Instant::now();
        let tenant_id = self.resolver.get_effective_tenant_id().await;
        let skip = options.skip_tenant_filter;

        let mut query = SelectQuery::new(table, columns);
        match tenant_id {
            Some(tenant_id) if !skip => {
                query = query.filter(Filter::eq(self.tenant_column(), tenant_id.to_value()));
            }
            None if !skip => return self.reject(table, Operation::Select, started),
            _ => tracing::debug!(table, "Select without tenant filter"),
        }
        let query = query.refine(options.into_refinement());

        let outcome = self.store.select(&query).await;
        self.finish(table, Operation::Select, tenant_id, started, outcome)
    }

    /// Insert one row or a batch, stamping each with the resolved tenant.
    pub async fn insert(
        &self,
        table: &str,
        payload: impl Into<InsertPayload>,
        options: InsertOptions,
    ) -> Envelope<Vec<Row>> {
        let started = Instant::now();
        let tenant_id = self.resolver.get_effective_tenant_id().await;
        let mut rows = payload.into().into_rows();

        if !options.skip_tenant_injection {
            let Some(tenant_id) = tenant_id else {
                return self.reject(table, Operation::Insert, started);
            };
            let column = self.tenant_column();
            for row in &mut rows {
                let previous = row.insert(column.to_string(), tenant_id.to_value());
                if let Some(previous) = previous.filter(|p| *p != tenant_id.to_value()) {
                    tracing::warn!(
                        table,
                        supplied = %previous,
                        %tenant_id,
                        "Overrode caller-supplied tenant id on insert"
                    );
                }
            }
        }

        let outcome = self.store.insert(table, rows).await;
        self.finish(table, Operation::Insert, tenant_id, started, outcome)
    }

    /// Update rows matching `match_column = match_value` within the tenant.
    pub async fn update(
        &self,
        table: &str,
        values: Row,
        match_column: &str,
        match_value: impl Into<Value>,
    ) -> Envelope<Vec<Row>> {
        let started = Instant::now();
        let Some(tenant_id) = self.resolver.get_effective_tenant_id().await else {
            return self.reject(table, Operation::Update, started);
        };

        let mut values = values;
        if values.remove(self.tenant_column()).is_some() {
            tracing::warn!(table, %tenant_id, "Dropped tenant column from update values");
        }

        let filters = self.scoped_match(tenant_id, match_column, match_value.into());
        let outcome = self.store.update(table, &values, &filters).await;
        self.finish(table, Operation::Update, Some(tenant_id), started, outcome)
    }

    /// Delete rows matching `match_column = match_value` within the tenant.
    pub async fn delete(
        &self,
        table: &str,
        match_column: &str,
        match_value: impl Into<Value>,
    ) -> Envelope<Vec<Row>> {
        let started = Instant::now();
        let Some(tenant_id) = self.resolver.get_effective_tenant_id().await else {
            return self.reject(table, Operation::Delete, started);
        };

        let filters = self.scoped_match(tenant_id, match_column, match_value.into());
        let outcome = self.store.delete(table, &filters).await;
        self.finish(table, Operation::Delete, Some(tenant_id), started, outcome)
    }

    fn tenant_column(&self) -> &str {
        &self.config.tenant_column
    }

    fn scoped_match(&self, tenant_id: TenantId, column: &str, value: Value) -> Vec<Filter> {
        vec![
            Filter::eq(column, value),
            Filter::eq(self.tenant_column(), tenant_id.to_value()),
        ]
    }

    fn reject(&self, table: &str, operation: Operation, started: Instant) -> Envelope<Vec<Row>> {
        let error = GuardError::NoTenantContext {
            table: table.to_string(),
            operation,
        };
        self.log.record(OperationLogEntry {
            timestamp: Utc::now(),
            table: table.to_string(),
            operation,
            tenant_id: None,
            status: OperationStatus::Error,
            row_count: 0,
            error: Some(format!("{}: {}", error.code(), error)),
            duration_ms: elapsed_ms(started),
        });
        Envelope::failed(OperationStatus::Error, error)
    }

    fn finish(
        &self,
        table: &str,
        operation: Operation,
        tenant_id: Option<TenantId>,
        started: Instant,
        outcome: Result<Vec<Row>, StoreError>,
    ) -> Envelope<Vec<Row>> {
        let (envelope, row_count, error) = match outcome {
            Ok(rows) => {
                let status = if rows.is_empty() {
                    OperationStatus::Empty
                } else {
                    OperationStatus::Success
                };
                let count = rows.len();
                (Envelope::ok(status, rows), count, None)
            }
            Err(e) => {
                let detail = e.to_string();
                let envelope = if is_policy_denial(&e, &self.config) {
                    Envelope::failed(OperationStatus::RlsBlocked, GuardError::RlsBlocked(e))
                } else {
                    Envelope::failed(OperationStatus::Error, GuardError::Generic(e))
                };
                (envelope, 0, Some(detail))
            }
        };

        self.log.record(OperationLogEntry {
            timestamp: Utc::now(),
            table: table.to_string(),
            operation,
            tenant_id,
            status: envelope.status(),
            row_count,
            error,
            duration_ms: elapsed_ms(started),
        });
        envelope
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
