use thiserror::Error;

/// Failure reported by the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store rejected the read or write for this principal.
    #[error("permission denied at {address}")]
    PermissionDenied { address: String },

    /// Network or availability failure; the operation may succeed if retried
    /// later, but this layer never retries on its own.
    #[error("store unavailable")]
    Unavailable(#[source] anyhow::Error),
}

impl StoreError {
    pub fn unavailable(err: impl Into<anyhow::Error>) -> StoreError {
        StoreError::Unavailable(err.into())
    }
}

#[derive(Debug, Error)]
pub enum ChatError {
    /// Message text was empty after trimming; rejected before any I/O.
    #[error("message text is empty")]
    EmptyMessage,

    /// No principal is signed in.
    #[error("no signed-in user")]
    SignedOut,

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ChatResult<T> = Result<T, ChatError>;
