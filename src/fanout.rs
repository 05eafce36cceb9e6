use serde_json::Value;

use crate::error::{ChatError, ChatResult};
use crate::model::{Message, Principal};
use crate::paths;
use crate::store::DocumentStore;

/// Append one message to the shared public channel. Returns the assigned
/// document id. On failure nothing was written; the caller keeps the text.
pub async fn send_public(
    store: &dyn DocumentStore,
    author: &Principal,
    text: &str,
) -> ChatResult<String> {
    ensure_nonempty(text)?;
    let id = store
        .write(&paths::public_messages(), Message::document(author, text))
        .await?;
    Ok(id)
}

/// Send a private message: the identical payload is written to the sender's
/// and the recipient's own copy of the conversation in one atomic batch.
/// Either both copies land or neither does, so each participant can read the
/// conversation entirely from their own namespace.
pub async fn send_direct(
    store: &dyn DocumentStore,
    author: &Principal,
    recipient_id: &str,
    text: &str,
) -> ChatResult<()> {
    ensure_nonempty(text)?;
    let conversation = paths::conversation_id(&author.id, recipient_id);
    let doc = Message::document(author, text);
    let writes: Vec<(paths::Address, Value)> = vec![
        (paths::conversation(&author.id, &conversation), doc.clone()),
        (paths::conversation(recipient_id, &conversation), doc),
    ];
    store.batch_write(writes).await?;
    Ok(())
}

fn ensure_nonempty(text: &str) -> ChatResult<()> {
    if text.trim().is_empty() {
        return Err(ChatError::EmptyMessage);
    }
    Ok(())
}
