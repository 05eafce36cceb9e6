use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, broadcast, mpsc};
use uuid::Uuid;

use super::{DocEntry, DocumentStore, OrderBy, Query, Snapshot, Snapshots, now_ms};
use crate::error::StoreError;
use crate::paths::Address;

#[derive(Debug, Clone)]
struct Stored {
    id: String,
    created_at: i64,
    data: Value,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Vec<Stored>>,
    clock: i64,
}

impl Inner {
    // Commit timestamps never repeat or go backwards, even if the wall
    // clock does.
    fn stamp(&mut self) -> i64 {
        self.clock = now_ms().max(self.clock + 1);
        self.clock
    }
}

/// In-process document store. Writes notify every live subscription, which
/// requeries and emits a fresh full snapshot, so feeds behave exactly like
/// the wire-backed stores.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    notify: broadcast::Sender<String>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore {
            inner: Arc::default(),
            notify: broadcast::channel(64).0,
        }
    }

    async fn run_query(&self, query: &Query) -> Snapshot {
        let inner = self.inner.lock().await;
        let mut docs: Vec<Stored> = inner
            .collections
            .get(query.address.as_str())
            .cloned()
            .unwrap_or_default();
        drop(inner);

        match &query.order_by {
            OrderBy::CreatedAt => docs.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id))),
            OrderBy::Field(field) => docs.sort_by_key(|doc| field_key(&doc.data, field)),
        }
        if query.descending {
            docs.reverse();
        }
        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }

        Snapshot {
            entries: docs
                .into_iter()
                .map(|doc| DocEntry {
                    id: doc.id,
                    created_at: Some(doc.created_at),
                    data: doc.data,
                })
                .collect(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn field_key(data: &Value, field: &str) -> String {
    match data.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

// RFC 7386 merge patch: objects merge recursively, null removes a field,
// anything else replaces.
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(updates) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Default::default());
    }
    if let Value::Object(fields) = target {
        for (key, value) in updates {
            if value.is_null() {
                fields.remove(key);
            } else {
                merge_patch(fields.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for MemoryStore {
    async fn write(&self, collection: &Address, doc: Value) -> Result<String, StoreError> {
        let id = Uuid::now_v7().to_string();
        {
            let mut inner = self.inner.lock().await;
            let created_at = inner.stamp();
            inner
                .collections
                .entry(collection.as_str().to_owned())
                .or_default()
                .push(Stored {
                    id: id.clone(),
                    created_at,
                    data: doc,
                });
        }
        let _ = self.notify.send(collection.as_str().to_owned());
        Ok(id)
    }

    async fn merge(&self, collection: &Address, id: &str, doc: Value) -> Result<(), StoreError> {
        {
            let mut inner = self.inner.lock().await;
            let created_at = inner.stamp();
            let docs = inner
                .collections
                .entry(collection.as_str().to_owned())
                .or_default();
            match docs.iter_mut().find(|stored| stored.id == id) {
                Some(stored) => merge_patch(&mut stored.data, &doc),
                None => docs.push(Stored {
                    id: id.to_owned(),
                    created_at,
                    data: doc,
                }),
            }
        }
        let _ = self.notify.send(collection.as_str().to_owned());
        Ok(())
    }

    async fn batch_write(&self, writes: Vec<(Address, Value)>) -> Result<(), StoreError> {
        let mut touched = Vec::new();
        {
            let mut inner = self.inner.lock().await;
            // One commit timestamp for the whole batch.
            let created_at = inner.stamp();
            for (collection, doc) in writes {
                inner
                    .collections
                    .entry(collection.as_str().to_owned())
                    .or_default()
                    .push(Stored {
                        id: Uuid::now_v7().to_string(),
                        created_at,
                        data: doc,
                    });
                touched.push(collection.as_str().to_owned());
            }
        }
        touched.sort();
        touched.dedup();
        for address in touched {
            let _ = self.notify.send(address);
        }
        Ok(())
    }

    async fn get_once(&self, query: &Query) -> Result<Snapshot, StoreError> {
        Ok(self.run_query(query).await)
    }

    async fn subscribe(&self, query: &Query) -> Result<Snapshots, StoreError> {
        // Register for changes before the initial snapshot so nothing can
        // land in the gap.
        let mut changes = self.notify.subscribe();
        let (tx, rx) = mpsc::channel(16);
        let store = self.clone();
        let query = query.clone();
        tokio::spawn(async move {
            let snapshot = store.run_query(&query).await;
            if tx.send(Ok(snapshot)).await.is_err() {
                return;
            }
            loop {
                match changes.recv().await {
                    Ok(address) if address == query.address.as_str() => {
                        let snapshot = store.run_query(&query).await;
                        if tx.send(Ok(snapshot)).await.is_err() {
                            return;
                        }
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        let snapshot = store.run_query(&query).await;
                        if tx.send(Ok(snapshot)).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });
        Ok(Snapshots::new(rx))
    }
}
