use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::auth::AuthProvider;
use crate::error::{ChatError, ChatResult};
use crate::fanout;
use crate::model::{Principal, UserProfile};
use crate::paths;
use crate::presence;
use crate::store::{DocumentStore, Query, now_ms};
use crate::subs::{ChannelKey, Subscription, SubscriptionManager};

/// How many messages a live feed keeps: the most recent window, not the
/// whole history.
pub const RECENT_LIMIT: usize = 50;

/// One signed-in user's connection to the chat: roster upkeep, the periodic
/// presence refresh, and the live public/roster/direct feeds. Everything
/// stops when the session is dropped or [`ChatSession::end`] is called.
pub struct ChatSession {
    store: Arc<dyn DocumentStore>,
    principal: Principal,
    subs: SubscriptionManager,
    refresh: JoinHandle<()>,
}

impl ChatSession {
    /// Start a session for `principal`: announce them on the roster right
    /// away and keep re-announcing for as long as the session lives.
    pub fn start(store: Arc<dyn DocumentStore>, principal: Principal) -> ChatSession {
        let refresh = presence::spawn_refresh(store.clone(), principal.clone());
        ChatSession {
            subs: SubscriptionManager::new(store.clone()),
            store,
            principal,
            refresh,
        }
    }

    /// Session for whoever the provider reports as signed in.
    pub fn from_auth(
        store: Arc<dyn DocumentStore>,
        auth: &dyn AuthProvider,
    ) -> ChatResult<ChatSession> {
        let principal = auth.current_principal().ok_or(ChatError::SignedOut)?;
        Ok(ChatSession::start(store, principal))
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Live feed of the shared channel. Stays open for the whole session
    /// unless explicitly reopened.
    pub async fn open_public(&mut self) -> ChatResult<Subscription> {
        let query = Query::recent(paths::public_messages(), RECENT_LIMIT);
        Ok(self.subs.open(ChannelKey::Public, query).await?)
    }

    /// Live roster of every known user, in stable display-name order.
    pub async fn open_roster(&mut self) -> ChatResult<Subscription> {
        let query = Query::by_field(paths::user_roster(), "displayName");
        Ok(self.subs.open(ChannelKey::Roster, query).await?)
    }

    /// Switch the active private conversation. The previous conversation's
    /// feed is closed before the new one opens, so its messages can never
    /// show up under the new peer.
    pub async fn open_conversation(&mut self, other_id: &str) -> ChatResult<Subscription> {
        let conversation = paths::conversation_id(&self.principal.id, other_id);
        let address = paths::conversation(&self.principal.id, &conversation);
        let query = Query::recent(address, RECENT_LIMIT);
        Ok(self
            .subs
            .open(ChannelKey::Direct(conversation), query)
            .await?)
    }

    pub fn close_conversation(&mut self, other_id: &str) {
        let conversation = paths::conversation_id(&self.principal.id, other_id);
        self.subs.close(&ChannelKey::Direct(conversation));
    }

    pub async fn send_public(&self, text: &str) -> ChatResult<String> {
        fanout::send_public(self.store.as_ref(), &self.principal, text).await
    }

    pub async fn send_direct(&self, recipient_id: &str, text: &str) -> ChatResult<()> {
        fanout::send_direct(self.store.as_ref(), &self.principal, recipient_id, text).await
    }

    /// Online map for the latest roster state.
    pub fn roster_presence(&self, profiles: &[UserProfile]) -> HashMap<String, bool> {
        presence::derive_status(profiles, now_ms())
    }

    /// Stop the presence refresh and close every live feed.
    pub fn end(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.refresh.abort();
        self.subs.close_all();
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
