//! Typed JSON access on top of the string-valued [`KeyValueStore`].

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{KeyValueStore, StorageError};

/// Read and decode a JSON value. Missing keys return `Ok(None)`.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    match store.get(key).await? {
        Some(raw) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| StorageError::serialization(key, e)),
        None => Ok(None),
    }
}

/// Encode and write a JSON value.
pub async fn set_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value).map_err(|e| StorageError::serialization(key, e))?;
    store.set(key, raw).await
}
