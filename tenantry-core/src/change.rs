//! Change notifications emitted by the remote store's change stream.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::{ChangeEventError, TenantId, Timestamp, WatchedTable};

/// A single row as exchanged with the remote store.
pub type Row = Map<String, Value>;

/// Kind of mutation a change event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

/// A received change on a watched table. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: WatchedTable,
    pub kind: ChangeKind,
    pub old: Option<Row>,
    pub new: Option<Row>,
    pub received_at: Timestamp,
}

impl ChangeEvent {
    pub fn new(table: WatchedTable, kind: ChangeKind, old: Option<Row>, new: Option<Row>) -> Self {
        Self {
            table,
            kind,
            old,
            new,
            received_at: chrono::Utc::now(),
        }
    }

    pub fn insert(table: WatchedTable, new: Row) -> Self {
        Self::new(table, ChangeKind::Insert, None, Some(new))
    }

    pub fn update(table: WatchedTable, old: Row, new: Row) -> Self {
        Self::new(table, ChangeKind::Update, Some(old), Some(new))
    }

    pub fn delete(table: WatchedTable, old: Row) -> Self {
        Self::new(table, ChangeKind::Delete, Some(old), None)
    }

    /// The row the event is about: the new image, or the old one for deletes.
    pub fn record(&self) -> Option<&Row> {
        self.new.as_ref().or(self.old.as_ref())
    }

    /// Look up a column on the affected row.
    pub fn field(&self, column: &str) -> Option<&Value> {
        self.record().and_then(|row| row.get(column))
    }

    /// Tenant that owns the affected row, if the row carries one.
    pub fn tenant_id(&self, tenant_column: &str) -> Option<TenantId> {
        self.field(tenant_column).and_then(TenantId::from_value)
    }

    /// Old and new value of `column` when both images carry it and they differ.
    ///
    /// An old image without the column (e.g. a store that only ships primary
    /// keys in `old`) is treated as "cannot tell" and yields `None`.
    pub fn field_change(&self, column: &str) -> Option<(&Value, &Value)> {
        let old = self.old.as_ref()?.get(column)?;
        let new = self.new.as_ref()?.get(column)?;
        (old != new).then_some((old, new))
    }
}

/// Wire shape of a change notification as delivered by the store.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChangePayload {
    pub schema: String,
    pub table: String,
    pub event_type: ChangeKind,
    #[serde(default)]
    pub old: Option<Row>,
    #[serde(default)]
    pub new: Option<Row>,
}

impl RawChangePayload {
    /// Decode a payload from its JSON text.
    pub fn from_json(text: &str) -> Result<Self, ChangeEventError> {
        serde_json::from_str(text).map_err(|e| ChangeEventError::Malformed {
            reason: e.to_string(),
        })
    }

    /// Validate the payload against the expected schema and resolve its table.
    ///
    /// Empty row images (`{}`) are normalized to `None`.
    pub fn into_event(self, expected_schema: &str) -> Result<ChangeEvent, ChangeEventError> {
        if self.schema != expected_schema {
            return Err(ChangeEventError::ForeignSchema {
                expected: expected_schema.to_string(),
                got: self.schema,
            });
        }
        let table = self.table.parse::<WatchedTable>()?;
        Ok(ChangeEvent::new(
            table,
            self.event_type,
            self.old.filter(|row| !row.is_empty()),
            self.new.filter(|row| !row.is_empty()),
        ))
    }
}
