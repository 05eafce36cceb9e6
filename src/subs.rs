use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::store::{DocumentStore, Query, Snapshot};

/// Logical channel identity. The manager keeps at most one live subscription
/// per key, and at most one `Direct` key live at a time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    Public,
    Roster,
    Direct(String),
}

struct Live {
    closed: Arc<AtomicBool>,
    forwarder: JoinHandle<()>,
}

/// Consumer end of one live channel. Once the owning manager closes the key,
/// `recv` yields nothing more, including a snapshot already in flight.
pub struct Subscription {
    key: ChannelKey,
    closed: Arc<AtomicBool>,
    rx: mpsc::Receiver<Result<Snapshot, StoreError>>,
}

impl Subscription {
    pub fn key(&self) -> &ChannelKey {
        &self.key
    }

    /// Next snapshot, or `None` once the channel is closed or the stream has
    /// ended. An `Err` is terminal: nothing follows it.
    pub async fn recv(&mut self) -> Option<Result<Snapshot, StoreError>> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let item = self.rx.recv().await?;
        // A close that raced the delivery wins: the snapshot is dropped.
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        Some(item)
    }
}

/// Owns every live store subscription for one session.
pub struct SubscriptionManager {
    store: Arc<dyn DocumentStore>,
    live: HashMap<ChannelKey, Live>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn DocumentStore>) -> SubscriptionManager {
        SubscriptionManager {
            store,
            live: HashMap::new(),
        }
    }

    /// Open a live feed under `key`. An existing subscription for the same
    /// key is torn down first; opening a `Direct` key also tears down any
    /// other live direct conversation, before the store is even asked, so a
    /// stale conversation can never leak into the new view.
    pub async fn open(&mut self, key: ChannelKey, query: Query) -> Result<Subscription, StoreError> {
        self.close(&key);
        if matches!(key, ChannelKey::Direct(_)) {
            let stale: Vec<ChannelKey> = self
                .live
                .keys()
                .filter(|live| matches!(live, ChannelKey::Direct(_)))
                .cloned()
                .collect();
            for key in stale {
                self.close(&key);
            }
        }

        let mut snapshots = self.store.subscribe(&query).await?;
        let closed = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel(16);
        let guard = closed.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(item) = snapshots.recv().await {
                if guard.load(Ordering::Acquire) {
                    break;
                }
                let terminal = item.is_err();
                if tx.send(item).await.is_err() || terminal {
                    break;
                }
            }
        });

        tracing::debug!(?key, "subscription open");
        self.live.insert(
            key.clone(),
            Live {
                closed: closed.clone(),
                forwarder,
            },
        );
        Ok(Subscription { key, closed, rx })
    }

    /// Idempotent: closing an unknown or already-closed key is a no-op.
    pub fn close(&mut self, key: &ChannelKey) {
        if let Some(live) = self.live.remove(key) {
            live.closed.store(true, Ordering::Release);
            live.forwarder.abort();
            tracing::debug!(?key, "subscription closed");
        }
    }

    pub fn close_all(&mut self) {
        let keys: Vec<ChannelKey> = self.live.keys().cloned().collect();
        for key in keys {
            self.close(&key);
        }
    }

    pub fn is_open(&self, key: &ChannelKey) -> bool {
        self.live.contains_key(key)
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::paths::{self, Address};
    use crate::store::{MemoryStore, Snapshots};

    fn public_query() -> Query {
        Query::recent(paths::public_messages(), 50)
    }

    #[tokio::test]
    async fn closed_subscription_delivers_nothing_more() {
        let store = Arc::new(MemoryStore::new());
        let mut subs = SubscriptionManager::new(store.clone());

        let mut sub = subs.open(ChannelKey::Public, public_query()).await.unwrap();
        assert_eq!(sub.key(), &ChannelKey::Public);
        assert!(sub.recv().await.unwrap().unwrap().entries.is_empty());

        subs.close(&ChannelKey::Public);
        // A write after close must not surface, even if the store already
        // queued a delivery.
        store
            .write(&paths::public_messages(), json!({"n": 1}))
            .await
            .unwrap();
        assert!(sub.recv().await.is_none());
        assert!(!subs.is_open(&ChannelKey::Public));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let mut subs = SubscriptionManager::new(store);
        subs.close(&ChannelKey::Public);

        subs.open(ChannelKey::Public, public_query()).await.unwrap();
        subs.close(&ChannelKey::Public);
        subs.close(&ChannelKey::Public);
    }

    #[tokio::test]
    async fn reopening_a_key_tears_down_the_old_feed() {
        let store = Arc::new(MemoryStore::new());
        let mut subs = SubscriptionManager::new(store.clone());

        let mut first = subs.open(ChannelKey::Public, public_query()).await.unwrap();
        first.recv().await.unwrap().unwrap();

        let mut second = subs.open(ChannelKey::Public, public_query()).await.unwrap();
        assert!(first.recv().await.is_none());
        assert!(second.recv().await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn switching_direct_closes_the_previous_conversation_only() {
        let store = Arc::new(MemoryStore::new());
        let mut subs = SubscriptionManager::new(store.clone());

        subs.open(ChannelKey::Public, public_query()).await.unwrap();
        let mut with_bob = subs
            .open(
                ChannelKey::Direct("alice_bob".to_owned()),
                Query::recent(paths::conversation("alice", "alice_bob"), 50),
            )
            .await
            .unwrap();
        with_bob.recv().await.unwrap().unwrap();

        let mut with_carol = subs
            .open(
                ChannelKey::Direct("alice_carol".to_owned()),
                Query::recent(paths::conversation("alice", "alice_carol"), 50),
            )
            .await
            .unwrap();

        assert!(!subs.is_open(&ChannelKey::Direct("alice_bob".to_owned())));
        assert!(subs.is_open(&ChannelKey::Direct("alice_carol".to_owned())));
        assert!(subs.is_open(&ChannelKey::Public));

        // The old feed is dead even with a delivery pending.
        store
            .write(&paths::conversation("alice", "alice_bob"), json!({"n": 1}))
            .await
            .unwrap();
        assert!(with_bob.recv().await.is_none());
        assert!(with_carol.recv().await.unwrap().unwrap().entries.is_empty());
    }

    // Store double whose subscription delivers one snapshot, then fails.
    struct FailingFeed;

    #[async_trait::async_trait]
    impl DocumentStore for FailingFeed {
        async fn write(&self, _: &Address, _: Value) -> Result<String, StoreError> {
            unreachable!()
        }

        async fn merge(&self, _: &Address, _: &str, _: Value) -> Result<(), StoreError> {
            unreachable!()
        }

        async fn batch_write(&self, _: Vec<(Address, Value)>) -> Result<(), StoreError> {
            unreachable!()
        }

        async fn get_once(&self, _: &Query) -> Result<Snapshot, StoreError> {
            unreachable!()
        }

        async fn subscribe(&self, _: &Query) -> Result<Snapshots, StoreError> {
            let (tx, rx) = mpsc::channel(4);
            tx.try_send(Ok(Snapshot::default())).unwrap();
            tx.try_send(Err(StoreError::PermissionDenied {
                address: "private/bob/messages/alice_bob".to_owned(),
            }))
            .unwrap();
            Ok(Snapshots::new(rx))
        }
    }

    #[tokio::test]
    async fn stream_error_is_terminal() {
        let mut subs = SubscriptionManager::new(Arc::new(FailingFeed));
        let mut sub = subs.open(ChannelKey::Public, public_query()).await.unwrap();

        assert!(sub.recv().await.unwrap().is_ok());
        assert!(matches!(
            sub.recv().await,
            Some(Err(StoreError::PermissionDenied { .. }))
        ));
        // Nothing after the error.
        assert!(sub.recv().await.is_none());
    }
}
