//! Per-table change subscriptions.
//!
//! A [`ChangeFeed`] opens one stream per watched table. Items are raw wire
//! payloads, a decode error for a notification that could not be parsed, or
//! [`ChangeEventError::Lagged`] when notifications were lost; the router
//! validates and dispatches them.

use async_trait::async_trait;
use futures_util::stream::{BoxStream, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tenantry_core::{ChangeEventError, RawChangePayload, RouterError, WatchedTable};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

/// Item delivered on a change stream.
pub type ChangeItem = Result<RawChangePayload, ChangeEventError>;

/// A live subscription. The stream ends when the channel closes.
pub type ChangeStream = BoxStream<'static, ChangeItem>;

/// Source of per-table change notifications.
#[async_trait]
pub trait ChangeFeed: Send + Sync + 'static {
    /// Subscribe to changes on `table` within `schema`.
    async fn subscribe(&self, table: WatchedTable, schema: &str) -> Result<ChangeStream, RouterError>;
}

/// Broadcast-backed feed for tests and local runs.
#[derive(Debug)]
pub struct InMemoryChangeFeed {
    channels: Mutex<HashMap<WatchedTable, broadcast::Sender<ChangeItem>>>,
    failing: Mutex<HashSet<WatchedTable>>,
    capacity: usize,
    subscribe_calls: AtomicUsize,
}

impl InMemoryChangeFeed {
    pub fn new() -> Self {
        Self::with_capacity(128)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            capacity: capacity.max(1),
            subscribe_calls: AtomicUsize::new(0),
        }
    }

    fn sender(&self, table: WatchedTable) -> broadcast::Sender<ChangeItem> {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(table)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    fn send(&self, table: WatchedTable, item: ChangeItem) -> usize {
        let sender = self
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&table)
            .cloned();
        sender.and_then(|tx| tx.send(item).ok()).unwrap_or(0)
    }

    /// Deliver a payload to subscribers of its table. Returns the number of
    /// receivers; a payload for an unwatched table reaches nobody.
    pub fn publish(&self, payload: RawChangePayload) -> usize {
        match payload.table.parse::<WatchedTable>() {
            Ok(table) => self.send(table, Ok(payload)),
            Err(_) => 0,
        }
    }

    /// Deliver raw notification text on `table`'s channel.
    pub fn publish_json(&self, table: WatchedTable, text: &str) -> usize {
        self.send(table, RawChangePayload::from_json(text))
    }

    /// Close every open channel, ending all streams.
    pub fn disconnect_all(&self) {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Make future subscriptions to `table` fail.
    pub fn fail_subscriptions_for(&self, table: WatchedTable) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(table);
    }

    /// Undo [`fail_subscriptions_for`](Self::fail_subscriptions_for).
    pub fn restore(&self, table: WatchedTable) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&table);
    }

    /// Live receivers on `table`.
    pub fn subscriber_count(&self, table: WatchedTable) -> usize {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&table)
            .map(|tx| tx.receiver_count())
            .unwrap_or(0)
    }

    pub fn total_subscribers(&self) -> usize {
        WatchedTable::ALL
            .iter()
            .map(|table| self.subscriber_count(*table))
            .sum()
    }

    pub fn subscribe_calls(&self) -> usize {
        self.subscribe_calls.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeFeed for InMemoryChangeFeed {
    async fn subscribe(&self, table: WatchedTable, schema: &str) -> Result<ChangeStream, RouterError> {
        self.subscribe_calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&table)
        {
            return Err(RouterError::SubscribeFailed {
                table,
                reason: "channel rejected subscription".to_string(),
            });
        }

        let schema = schema.to_string();
        let rx = self.sender(table).subscribe();
        let stream = BroadcastStream::new(rx).filter_map(move |item| {
            let item = match item {
                Ok(Ok(payload)) if payload.schema != schema => None,
                Ok(item) => Some(item),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    tracing::warn!(%table, skipped, "Change stream lagged");
                    Some(Err(ChangeEventError::Lagged { skipped }))
                }
            };
            futures_util::future::ready(item)
        });
        Ok(stream.boxed())
    }
}
