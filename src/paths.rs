use std::fmt;

/// Logical location in the document store, either a collection or a single
/// document inside one. Derived, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn join(&self, segment: &str) -> Address {
        Address(format!("{}/{segment}", self.0))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The shared broadcast channel everyone can read and write.
pub fn public_messages() -> Address {
    Address("public/messages".to_owned())
}

/// Profiles of every user the system has seen.
pub fn user_roster() -> Address {
    Address("public/users".to_owned())
}

/// One participant's own copy of a private conversation. Each side of a
/// conversation reads only from its own namespace.
pub fn conversation(owner_id: &str, conversation_id: &str) -> Address {
    Address(format!("private/{owner_id}/messages/{conversation_id}"))
}

/// Identifier of the conversation between two users, independent of which
/// of them asks: the lexicographically smaller id always comes first.
pub fn conversation_id(a: &str, b: &str) -> String {
    if a < b {
        format!("{a}_{b}")
    } else {
        format!("{b}_{a}")
    }
}
