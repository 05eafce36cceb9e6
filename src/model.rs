use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::store::DocEntry;

/// The authenticated user, as reported by the identity provider. Read-only
/// here; a denormalized copy is mirrored into [`UserProfile`].
#[derive(Debug, Clone, PartialEq)]
pub struct Principal {
    pub id: String,
    pub display_name: String,
    pub avatar_url: String,
    pub email: Option<String>,
}

impl Principal {
    pub fn new(id: &str, display_name: &str, avatar_url: &str) -> Principal {
        Principal {
            id: id.to_owned(),
            display_name: display_name.to_owned(),
            avatar_url: avatar_url.to_owned(),
            email: None,
        }
    }
}

/// Roster record, at most one per principal id. Only ever merge-written, so
/// concurrent refreshes cannot wipe each other's fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    pub avatar_url: String,
    /// Unix milliseconds of the last presence refresh; absent for users that
    /// never announced themselves.
    #[serde(default)]
    pub last_active_at: Option<i64>,
}

impl UserProfile {
    pub fn document(&self) -> Value {
        let mut doc = json!({
            "id": self.id,
            "displayName": self.display_name,
            "avatarUrl": self.avatar_url,
        });
        if let Some(ts) = self.last_active_at {
            doc["lastActiveAt"] = ts.into();
        }
        doc
    }

    pub fn decode(entry: &DocEntry) -> Result<UserProfile, serde_json::Error> {
        serde_json::from_value(entry.data.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageDoc {
    text: String,
    author_id: String,
    author_display_name: String,
    author_avatar_url: String,
}

/// One immutable chat message. Public and direct messages share this shape;
/// only their storage location differs.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Store-assigned document id, stable across snapshots.
    pub id: String,
    pub text: String,
    pub author_id: String,
    pub author_display_name: String,
    pub author_avatar_url: String,
    /// Commit time in unix milliseconds; `None` until the store resolves it.
    pub created_at: Option<i64>,
}

impl Message {
    /// Document payload for a new message. The id and commit timestamp are
    /// the store's to assign.
    pub fn document(author: &Principal, text: &str) -> Value {
        json!({
            "text": text,
            "authorId": author.id,
            "authorDisplayName": author.display_name,
            "authorAvatarUrl": author.avatar_url,
        })
    }

    pub fn decode(entry: &DocEntry) -> Result<Message, serde_json::Error> {
        let doc: MessageDoc = serde_json::from_value(entry.data.clone())?;
        Ok(Message {
            id: entry.id.clone(),
            text: doc.text,
            author_id: doc.author_id,
            author_display_name: doc.author_display_name,
            author_avatar_url: doc.author_avatar_url,
            created_at: entry.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_document_round_trips() {
        let author = Principal::new("alice", "Alice", "https://img/alice.png");
        let entry = DocEntry {
            id: "m1".to_owned(),
            created_at: Some(1_000),
            data: Message::document(&author, "hello"),
        };

        let message = Message::decode(&entry).unwrap();
        assert_eq!(message.id, "m1");
        assert_eq!(message.text, "hello");
        assert_eq!(message.author_id, "alice");
        assert_eq!(message.author_display_name, "Alice");
        assert_eq!(message.created_at, Some(1_000));
    }

    #[test]
    fn message_decode_rejects_foreign_documents() {
        let entry = DocEntry {
            id: "m1".to_owned(),
            created_at: Some(1_000),
            data: serde_json::json!({"displayName": "not a message"}),
        };
        assert!(Message::decode(&entry).is_err());
    }

    #[test]
    fn profile_document_omits_unset_last_active() {
        let profile = UserProfile {
            id: "alice".to_owned(),
            display_name: "Alice".to_owned(),
            avatar_url: String::new(),
            last_active_at: None,
        };
        assert!(profile.document().get("lastActiveAt").is_none());

        let entry = DocEntry {
            id: "alice".to_owned(),
            created_at: Some(1),
            data: profile.document(),
        };
        assert_eq!(UserProfile::decode(&entry).unwrap().last_active_at, None);
    }
}
