/// All errors that can be returned by a KeyValueStore implementation.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A stored value could not be encoded or decoded.
    #[error("serialization error for key {key}: {message}")]
    Serialization { key: String, message: String },

    /// The backing file could not be read or written.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A backend-specific storage error (corrupt file, closed handle, etc.).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub(crate) fn serialization(key: &str, err: impl std::fmt::Display) -> Self {
        StorageError::Serialization {
            key: key.to_string(),
            message: err.to_string(),
        }
    }
}
