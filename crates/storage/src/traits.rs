use async_trait::async_trait;
use serde::Serialize;

use crate::error::StorageError;

/// A single mutation inside a [`KeyValueStore::write_batch`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Set { key: String, value: String },
    Delete { key: String },
}

impl WriteOp {
    pub fn set(key: impl Into<String>, value: impl Into<String>) -> Self {
        WriteOp::Set {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        WriteOp::Delete { key: key.into() }
    }

    /// Build a `Set` op holding the JSON encoding of `value`.
    pub fn set_json<T: Serialize + ?Sized>(
        key: impl Into<String>,
        value: &T,
    ) -> Result<Self, StorageError> {
        let key = key.into();
        let encoded =
            serde_json::to_string(value).map_err(|e| StorageError::serialization(&key, e))?;
        Ok(WriteOp::Set {
            key,
            value: encoded,
        })
    }

    pub fn key(&self) -> &str {
        match self {
            WriteOp::Set { key, .. } | WriteOp::Delete { key } => key,
        }
    }
}

/// Durable key-value substrate for every piece of client-side sync state.
///
/// Keys and values are opaque strings. Callers that need to change more
/// than one key at a time MUST use [`write_batch`](KeyValueStore::write_batch):
/// a batch is all-or-nothing, so a crash between two related writes can
/// never leave half of them applied.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync + 'static` so a single store can be
/// shared by the coalescer's timer tasks and the synchronization driver.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    /// Read a value. Missing keys return `Ok(None)`.
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Insert or overwrite a value.
    async fn set(&self, key: &str, value: String) -> Result<(), StorageError>;

    /// Remove a value. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// All keys starting with `prefix`, in ascending order.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Apply every op in order, atomically.
    ///
    /// Later ops on the same key win. If the batch fails, none of its ops
    /// are visible to subsequent reads.
    async fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StorageError>;
}
