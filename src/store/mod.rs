mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::paths::Address;

/// Wall clock in unix milliseconds, the timestamp unit used in documents.
pub fn now_ms() -> i64 {
    (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64
}

/// One stored document as returned by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct DocEntry {
    /// Store-assigned id, stable across snapshots.
    pub id: String,
    /// Commit timestamp in unix milliseconds; `None` while the store has not
    /// resolved it yet.
    pub created_at: Option<i64>,
    pub data: Value,
}

/// The full current result set of a live query. Every delivery replaces the
/// previous one; there are no incremental diffs.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub entries: Vec<DocEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderBy {
    /// The store-assigned commit timestamp.
    CreatedAt,
    /// A field inside the document payload.
    Field(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub address: Address,
    pub order_by: OrderBy,
    pub descending: bool,
    pub limit: Option<usize>,
}

impl Query {
    /// The most recent `limit` documents, newest first.
    pub fn recent(address: Address, limit: usize) -> Query {
        Query {
            address,
            order_by: OrderBy::CreatedAt,
            descending: true,
            limit: Some(limit),
        }
    }

    /// A whole collection in stable order of one payload field.
    pub fn by_field(address: Address, field: &str) -> Query {
        Query {
            address,
            order_by: OrderBy::Field(field.to_owned()),
            descending: false,
            limit: None,
        }
    }
}

/// Live snapshot feed for one query. The first item is the current state;
/// later items follow every matching change. An `Err` item is terminal.
pub struct Snapshots {
    rx: mpsc::Receiver<Result<Snapshot, StoreError>>,
}

impl Snapshots {
    pub fn new(rx: mpsc::Receiver<Result<Snapshot, StoreError>>) -> Snapshots {
        Snapshots { rx }
    }

    pub async fn recv(&mut self) -> Option<Result<Snapshot, StoreError>> {
        self.rx.recv().await
    }
}

impl Stream for Snapshots {
    type Item = Result<Snapshot, StoreError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// The real-time document store this layer runs against.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Append a document with a store-assigned id and commit timestamp.
    async fn write(&self, collection: &Address, doc: Value) -> Result<String, StoreError>;

    /// Field-wise merge into the document `id`, creating it if absent.
    /// Fields not present in `doc` are left untouched.
    async fn merge(&self, collection: &Address, id: &str, doc: Value) -> Result<(), StoreError>;

    /// Append every document or none of them.
    async fn batch_write(&self, writes: Vec<(Address, Value)>) -> Result<(), StoreError>;

    async fn get_once(&self, query: &Query) -> Result<Snapshot, StoreError>;

    async fn subscribe(&self, query: &Query) -> Result<Snapshots, StoreError>;
}
