pub mod auth;
pub mod error;
pub mod fanout;
pub mod feed;
pub mod model;
pub mod paths;
pub mod presence;
pub mod session;
pub mod store;
pub mod subs;

pub use auth::{AuthProvider, LocalAuth};
pub use error::{ChatError, ChatResult, StoreError};
pub use feed::Feed;
pub use model::{Message, Principal, UserProfile};
pub use session::{ChatSession, RECENT_LIMIT};
pub use store::{DocumentStore, MemoryStore, Query, Snapshot, SqliteStore};
pub use subs::{ChannelKey, Subscription, SubscriptionManager};
