use std::collections::HashMap;
use std::sync::Arc;

use time::Duration;
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::model::{Principal, UserProfile};
use crate::paths;
use crate::store::{DocumentStore, Snapshot, now_ms};

/// How stale a profile's `lastActiveAt` may be before its user counts as
/// offline. The boundary itself is offline.
pub const ONLINE_WINDOW: Duration = Duration::minutes(5);

/// How often a session re-announces its own liveness.
pub const REFRESH_PERIOD: Duration = Duration::seconds(60);

/// Merge the principal's profile into the roster with a fresh `lastActiveAt`.
/// Merging keeps fields another writer may have added to the document.
pub async fn refresh_self(
    store: &dyn DocumentStore,
    principal: &Principal,
) -> Result<(), StoreError> {
    let profile = UserProfile {
        id: principal.id.clone(),
        display_name: principal.display_name.clone(),
        avatar_url: principal.avatar_url.clone(),
        last_active_at: Some(now_ms()),
    };
    store
        .merge(&paths::user_roster(), &principal.id, profile.document())
        .await
}

/// Periodic self-refresh: once immediately, then every [`REFRESH_PERIOD`]
/// until the handle is aborted. A failed write is logged and the loop keeps
/// going; the next tick is the retry.
pub fn spawn_refresh(store: Arc<dyn DocumentStore>, principal: Principal) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(REFRESH_PERIOD.unsigned_abs());
        loop {
            tick.tick().await;
            if let Err(err) = refresh_self(store.as_ref(), &principal).await {
                tracing::warn!(user = %principal.id, %err, "presence refresh failed");
            }
        }
    })
}

/// Online map for a roster snapshot: a user is online iff their last refresh
/// is strictly within [`ONLINE_WINDOW`] of `now`. A profile that never set
/// `lastActiveAt` is offline, not an error.
pub fn derive_status(profiles: &[UserProfile], now: i64) -> HashMap<String, bool> {
    let window = ONLINE_WINDOW.whole_milliseconds() as i64;
    profiles
        .iter()
        .map(|profile| {
            let online = profile
                .last_active_at
                .is_some_and(|last| now - last < window);
            (profile.id.clone(), online)
        })
        .collect()
}

/// Decode a roster snapshot, dropping documents that are not profiles.
pub fn roster(snapshot: &Snapshot) -> Vec<UserProfile> {
    snapshot
        .entries
        .iter()
        .filter_map(|entry| match UserProfile::decode(entry) {
            Ok(profile) => Some(profile),
            Err(err) => {
                tracing::warn!(id = %entry.id, %err, "skipping undecodable profile");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::Value;

    use super::*;
    use crate::paths::Address;
    use crate::store::{MemoryStore, Query, Snapshots};

    fn profile(id: &str, last_active_at: Option<i64>) -> UserProfile {
        UserProfile {
            id: id.to_owned(),
            display_name: id.to_owned(),
            avatar_url: String::new(),
            last_active_at,
        }
    }

    #[test]
    fn status_boundaries() {
        let minute = 60_000;
        let now = 100 * minute;
        let profiles = vec![
            profile("fresh", Some(now - 4 * minute)),
            profile("stale", Some(now - 6 * minute)),
            profile("boundary", Some(now - 5 * minute)),
            profile("silent", None),
        ];

        let status = derive_status(&profiles, now);
        assert_eq!(status["fresh"], true);
        assert_eq!(status["stale"], false);
        // Exactly the window is offline: the comparison is strict.
        assert_eq!(status["boundary"], false);
        assert_eq!(status["silent"], false);
    }

    #[tokio::test]
    async fn refresh_merges_profile_into_roster() {
        let store = MemoryStore::new();
        let principal = Principal::new("alice", "Alice", "https://img/alice.png");
        refresh_self(&store, &principal).await.unwrap();

        let snapshot = store
            .get_once(&Query::by_field(paths::user_roster(), "displayName"))
            .await
            .unwrap();
        let profiles = roster(&snapshot);
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].id, "alice");
        assert_eq!(profiles[0].display_name, "Alice");
        assert!(profiles[0].last_active_at.is_some());
    }

    // Store double that rejects the first `failures` merges.
    struct FlakyRoster {
        attempts: AtomicUsize,
        failures: AtomicUsize,
        stored: Mutex<Vec<Value>>,
    }

    impl FlakyRoster {
        fn new(failures: usize) -> FlakyRoster {
            FlakyRoster {
                attempts: AtomicUsize::new(0),
                failures: AtomicUsize::new(failures),
                stored: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait::async_trait]
    impl DocumentStore for FlakyRoster {
        async fn write(&self, _: &Address, _: Value) -> Result<String, StoreError> {
            unreachable!()
        }

        async fn merge(&self, _: &Address, _: &str, doc: Value) -> Result<(), StoreError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| {
                    left.checked_sub(1)
                })
                .is_ok()
            {
                return Err(StoreError::unavailable(anyhow::anyhow!("injected outage")));
            }
            self.stored.lock().unwrap().push(doc);
            Ok(())
        }

        async fn batch_write(&self, _: Vec<(Address, Value)>) -> Result<(), StoreError> {
            unreachable!()
        }

        async fn get_once(&self, _: &Query) -> Result<Snapshot, StoreError> {
            unreachable!()
        }

        async fn subscribe(&self, _: &Query) -> Result<Snapshots, StoreError> {
            unreachable!()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_loop_outlives_write_failures() {
        let store = Arc::new(FlakyRoster::new(1));
        let task = spawn_refresh(store.clone(), Principal::new("alice", "Alice", ""));

        // First tick fires immediately and hits the injected outage.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(store.attempts.load(Ordering::SeqCst), 1);
        assert!(store.stored.lock().unwrap().is_empty());

        // Next tick succeeds.
        tokio::time::advance(REFRESH_PERIOD.unsigned_abs()).await;
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(store.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(store.stored.lock().unwrap().len(), 1);

        task.abort();
    }
}
