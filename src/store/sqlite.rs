use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use super::{DocEntry, DocumentStore, OrderBy, Query, Snapshot, Snapshots, now_ms};
use crate::error::StoreError;
use crate::paths::Address;

/// SQLite-backed document store. One table holds every collection; writes
/// commit first and then notify live subscriptions, which requery and emit
/// a fresh full snapshot.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    notify: broadcast::Sender<String>,
    clock: Arc<AtomicI64>,
}

impl SqliteStore {
    pub async fn new(pool: SqlitePool) -> Result<SqliteStore, StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS documents (\
                address TEXT NOT NULL,\
                id TEXT NOT NULL,\
                doc TEXT NOT NULL,\
                created_at INTEGER NOT NULL,\
                PRIMARY KEY (address, id))",
        )
        .execute(&pool)
        .await
        .map_err(StoreError::unavailable)?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS documents_by_time \
             ON documents (address, created_at)",
        )
        .execute(&pool)
        .await
        .map_err(StoreError::unavailable)?;

        Ok(SqliteStore {
            pool,
            notify: broadcast::channel(64).0,
            clock: Arc::new(AtomicI64::new(0)),
        })
    }

    // Commit timestamps never repeat or go backwards, even if the wall
    // clock does.
    fn stamp(&self) -> i64 {
        let now = now_ms();
        let mut seen = self.clock.load(Ordering::Relaxed);
        loop {
            let next = now.max(seen + 1);
            match self
                .clock
                .compare_exchange(seen, next, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => seen = actual,
            }
        }
    }

    async fn run_query(&self, query: &Query) -> Result<Snapshot, StoreError> {
        let direction = if query.descending { "DESC" } else { "ASC" };
        let mut sql = match &query.order_by {
            OrderBy::CreatedAt => format!(
                "SELECT id, doc, created_at FROM documents WHERE address=? \
                 ORDER BY created_at {direction}, id {direction}"
            ),
            OrderBy::Field(_) => format!(
                "SELECT id, doc, created_at FROM documents WHERE address=? \
                 ORDER BY json_extract(doc, ?) {direction}, id {direction}"
            ),
        };
        if let Some(limit) = query.limit {
            sql = format!("{sql} LIMIT {limit}");
        }

        let mut rows = sqlx::query_as::<_, (String, String, i64)>(&sql)
            .bind(query.address.as_str());
        if let OrderBy::Field(field) = &query.order_by {
            rows = rows.bind(format!("$.{field}"));
        }
        let rows = rows
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::unavailable)?;

        let mut entries = Vec::with_capacity(rows.len());
        for (id, doc, created_at) in rows {
            let data: Value = serde_json::from_str(&doc).map_err(StoreError::unavailable)?;
            entries.push(DocEntry {
                id,
                created_at: Some(created_at),
                data,
            });
        }
        Ok(Snapshot { entries })
    }
}

#[async_trait::async_trait]
impl DocumentStore for SqliteStore {
    async fn write(&self, collection: &Address, doc: Value) -> Result<String, StoreError> {
        let id = Uuid::now_v7().to_string();
        sqlx::query("INSERT INTO documents (address, id, doc, created_at) VALUES (?,?,?,?)")
            .bind(collection.as_str())
            .bind(&id)
            .bind(doc.to_string())
            .bind(self.stamp())
            .execute(&self.pool)
            .await
            .map_err(StoreError::unavailable)?;
        let _ = self.notify.send(collection.as_str().to_owned());
        Ok(id)
    }

    async fn merge(&self, collection: &Address, id: &str, doc: Value) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO documents (address, id, doc, created_at) VALUES (?,?,?,?) \
             ON CONFLICT (address, id) \
             DO UPDATE SET doc = json_patch(documents.doc, excluded.doc)",
        )
        .bind(collection.as_str())
        .bind(id)
        .bind(doc.to_string())
        .bind(self.stamp())
        .execute(&self.pool)
        .await
        .map_err(StoreError::unavailable)?;
        let _ = self.notify.send(collection.as_str().to_owned());
        Ok(())
    }

    async fn batch_write(&self, writes: Vec<(Address, Value)>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(StoreError::unavailable)?;
        // One commit timestamp for the whole batch.
        let created_at = self.stamp();
        let mut touched = Vec::with_capacity(writes.len());
        for (collection, doc) in writes {
            sqlx::query("INSERT INTO documents (address, id, doc, created_at) VALUES (?,?,?,?)")
                .bind(collection.as_str())
                .bind(Uuid::now_v7().to_string())
                .bind(doc.to_string())
                .bind(created_at)
                .execute(&mut *tx)
                .await
                .map_err(StoreError::unavailable)?;
            touched.push(collection.as_str().to_owned());
        }
        tx.commit().await.map_err(StoreError::unavailable)?;

        touched.sort();
        touched.dedup();
        for address in touched {
            let _ = self.notify.send(address);
        }
        Ok(())
    }

    async fn get_once(&self, query: &Query) -> Result<Snapshot, StoreError> {
        self.run_query(query).await
    }

    async fn subscribe(&self, query: &Query) -> Result<Snapshots, StoreError> {
        // Register for changes before the initial snapshot so nothing can
        // land in the gap.
        let mut changes = self.notify.subscribe();
        let initial = self.run_query(query).await?;

        let (tx, rx) = mpsc::channel(16);
        let store = self.clone();
        let query = query.clone();
        tokio::spawn(async move {
            if tx.send(Ok(initial)).await.is_err() {
                return;
            }
            loop {
                let requery = match changes.recv().await {
                    Ok(address) => address == query.address.as_str(),
                    Err(broadcast::error::RecvError::Lagged(_)) => true,
                    Err(broadcast::error::RecvError::Closed) => return,
                };
                if !requery {
                    continue;
                }
                match store.run_query(&query).await {
                    Ok(snapshot) => {
                        if tx.send(Ok(snapshot)).await.is_err() {
                            return;
                        }
                    }
                    // Terminal: deliver the error and end the stream.
                    Err(err) => {
                        let _ = tx.send(Err(err)).await;
                        return;
                    }
                }
            }
        });
        Ok(Snapshots::new(rx))
    }
}
