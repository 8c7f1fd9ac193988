use thiserror::Error;

/// Errors that can arise while interacting with the delivery queue's
/// durable store.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Wrapper around sled's error type.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Wrapper around bincode serialization and deserialization errors.
    #[error("serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// Wrapper around snapshot JSON errors.
    #[error("snapshot error: {0}")]
    Json(#[from] serde_json::Error),

    /// Wrapper around IO errors (directory creation, snapshot files).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Returned when operating on a message that is not present.
    #[error("message not found: {0}")]
    NotFound(String),

    /// Internal error (transaction conflicts, unexpected conditions).
    #[error("internal error: {0}")]
    Internal(String),
}
