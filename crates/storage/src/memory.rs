use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{KeyValueStore, StorageError, WriteOp};

/// Process-local [`KeyValueStore`] backed by a sorted map.
///
/// Durable only for the lifetime of the process; used in tests and as the
/// cache layer in front of [`FileStore`](crate::FileStore).
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
    fail_next_write: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next mutating call fail without applying anything.
    ///
    /// Lets callers simulate a crash or a full disk between two writes.
    pub fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Copy of every entry, for assertions.
    pub fn dump(&self) -> BTreeMap<String, String> {
        self.entries.lock().clone()
    }

    fn check_injected_failure(&self) -> Result<(), StorageError> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(StorageError::Backend("injected write failure".to_string()));
        }
        Ok(())
    }
}

pub(crate) fn apply_ops(entries: &mut BTreeMap<String, String>, ops: Vec<WriteOp>) {
    for op in ops {
        match op {
            WriteOp::Set { key, value } => {
                entries.insert(key, value);
            }
            WriteOp::Delete { key } => {
                entries.remove(&key);
            }
        }
    }
}

pub(crate) fn prefixed_keys(entries: &BTreeMap<String, String>, prefix: &str) -> Vec<String> {
    entries
        .range(prefix.to_string()..)
        .take_while(|(k, _)| k.starts_with(prefix))
        .map(|(k, _)| k.clone())
        .collect()
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        self.check_injected_failure()?;
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.check_injected_failure()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(prefixed_keys(&self.entries.lock(), prefix))
    }

    async fn write_batch(&self, ops: Vec<WriteOp>) -> Result<(), StorageError> {
        self.check_injected_failure()?;
        apply_ops(&mut self.entries.lock(), ops);
        Ok(())
    }
}
