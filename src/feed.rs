use crate::model::Message;
use crate::store::Snapshot;

/// Materialized, render-ready view of one channel. Every snapshot replaces
/// the whole view; stale and fresh deliveries are never merged.
#[derive(Debug, Default)]
pub struct Feed {
    messages: Vec<Message>,
}

impl Feed {
    pub fn new() -> Feed {
        Feed::default()
    }

    /// Replace the view with the contents of `snapshot` and return it.
    pub fn apply(&mut self, snapshot: &Snapshot) -> &[Message] {
        self.messages = project(snapshot);
        &self.messages
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Forget the channel's contents, for when it is closed.
    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Turn one raw snapshot (store order: newest first, capped) into the render
/// order: oldest first, with messages whose commit time the store has not
/// resolved yet sinking to the end until it is. Documents that do not decode
/// as messages are dropped. Identity is the store document id, stable across
/// snapshots, so consumers can diff successive projections cheaply.
pub fn project(snapshot: &Snapshot) -> Vec<Message> {
    let mut messages: Vec<Message> = snapshot
        .entries
        .iter()
        .filter_map(|entry| match Message::decode(entry) {
            Ok(message) => Some(message),
            Err(err) => {
                tracing::warn!(id = %entry.id, %err, "skipping undecodable message");
                None
            }
        })
        .collect();
    messages.reverse();
    // Stable, so entries sharing a timestamp keep their arrival order.
    messages.sort_by_key(|message| message.created_at.unwrap_or(i64::MAX));
    messages
}
