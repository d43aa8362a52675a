//! Remote store boundary: query model and the traits the guard calls through.

use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use tenantry_core::{Row, StoreError, TenantId, UserId};

// ============================================================================
// FILTERS
// ============================================================================

/// A single row predicate understood by the remote store.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { column: String, value: Value },
    Neq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
    Gt { column: String, value: Value },
    Gte { column: String, value: Value },
    Lt { column: String, value: Value },
    Lte { column: String, value: Value },
    /// SQL `LIKE` with `%` and `_` wildcards.
    Like { column: String, pattern: String },
    IsNull { column: String },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Eq { column, .. }
            | Filter::Neq { column, .. }
            | Filter::In { column, .. }
            | Filter::Gt { column, .. }
            | Filter::Gte { column, .. }
            | Filter::Lt { column, .. }
            | Filter::Lte { column, .. }
            | Filter::Like { column, .. }
            | Filter::IsNull { column } => column,
        }
    }

    /// Evaluate the predicate against a row. A missing column reads as null.
    pub fn matches(&self, row: &Row) -> bool {
        let cell = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Filter::Eq { value, .. } => !cell.is_null() && cell == value,
            Filter::Neq { value, .. } => !cell.is_null() && cell != value,
            Filter::In { values, .. } => !cell.is_null() && values.contains(cell),
            Filter::Gt { value, .. } => compare(cell, value) == Some(Ordering::Greater),
            Filter::Gte { value, .. } => matches!(
                compare(cell, value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Filter::Lt { value, .. } => compare(cell, value) == Some(Ordering::Less),
            Filter::Lte { value, .. } => {
                matches!(compare(cell, value), Some(Ordering::Less | Ordering::Equal))
            }
            Filter::Like { pattern, .. } => cell
                .as_str()
                .map(|text| like_match(pattern.as_bytes(), text.as_bytes()))
                .unwrap_or(false),
            Filter::IsNull { .. } => cell.is_null(),
        }
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn like_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((&b'%', rest)) => (0..=text.len()).any(|skip| like_match(rest, &text[skip..])),
        Some((&b'_', rest)) => !text.is_empty() && like_match(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && like_match(rest, &text[1..]),
    }
}

// ============================================================================
// QUERIES
// ============================================================================

/// Caller-controlled part of a select: extra predicates, ordering, limit.
///
/// The guard owns the tenant predicate; callers can only narrow a query
/// through this builder, never widen it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRefinement {
    pub(crate) filters: Vec<Filter>,
    pub(crate) order_by: Option<(String, bool)>,
    pub(crate) limit: Option<usize>,
}

impl QueryRefinement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(column, value))
    }

    pub fn neq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Neq {
            column: column.into(),
            value: value.into(),
        })
    }

    pub fn is_in(self, column: impl Into<String>, values: Vec<Value>) -> Self {
        self.filter(Filter::In {
            column: column.into(),
            values,
        })
    }

    pub fn gt(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Gt {
            column: column.into(),
            value: value.into(),
        })
    }

    pub fn gte(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Gte {
            column: column.into(),
            value: value.into(),
        })
    }

    pub fn lt(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Lt {
            column: column.into(),
            value: value.into(),
        })
    }

    pub fn lte(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::Lte {
            column: column.into(),
            value: value.into(),
        })
    }

    pub fn like(self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.filter(Filter::Like {
            column: column.into(),
            pattern: pattern.into(),
        })
    }

    pub fn is_null(self, column: impl Into<String>) -> Self {
        self.filter(Filter::IsNull {
            column: column.into(),
        })
    }

    pub fn order(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order_by = Some((column.into(), ascending));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// A fully built select as sent to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: String,
    /// Projected columns; empty means all columns.
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, bool)>,
    pub limit: Option<usize>,
}

impl SelectQuery {
    /// Start a query; `columns` is a comma-separated projection or `*`.
    pub fn new(table: impl Into<String>, columns: &str) -> Self {
        let columns = columns
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty() && *c != "*")
            .map(str::to_string)
            .collect();
        Self {
            table: table.into(),
            columns,
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn refine(mut self, refinement: QueryRefinement) -> Self {
        self.filters.extend(refinement.filters);
        if refinement.order_by.is_some() {
            self.order_by = refinement.order_by;
        }
        if refinement.limit.is_some() {
            self.limit = refinement.limit;
        }
        self
    }

    pub fn has_filter_on(&self, column: &str) -> bool {
        self.filters.iter().any(|f| f.column() == column)
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Apply the projection to a row.
    pub fn project(&self, row: &Row) -> Row {
        if self.columns.is_empty() {
            return row.clone();
        }
        self.columns
            .iter()
            .filter_map(|c| row.get(c).map(|v| (c.clone(), v.clone())))
            .collect()
    }
}

// ============================================================================
// STORE TRAITS
// ============================================================================

/// Scoped query/mutate API of the remote relational store.
///
/// Mutations return the affected rows so callers can tell "zero rows
/// affected" from success.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn select(&self, query: &SelectQuery) -> Result<Vec<Row>, StoreError>;

    async fn insert(&self, table: &str, rows: Vec<Row>) -> Result<Vec<Row>, StoreError>;

    async fn update(
        &self,
        table: &str,
        values: &Row,
        filters: &[Filter],
    ) -> Result<Vec<Row>, StoreError>;

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, StoreError>;
}

/// Server-side tenant lookups used by the resolver.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Ask the store which tenant the caller is currently acting as.
    async fn resolve_effective_tenant(&self) -> Result<Option<TenantId>, StoreError>;

    /// Tenant recorded on the user's membership/role row.
    async fn membership_tenant(&self, user_id: UserId) -> Result<Option<TenantId>, StoreError>;
}
