//! Durable client-side state shared by the coalescer and the driver.

use std::collections::HashMap;
use std::sync::Arc;

use fieldsync_storage::KeyValueStore;
use parking_lot::Mutex;
use tokio::sync::{Mutex as TokioMutex, OwnedMutexGuard};

use crate::error::EngineError;
use crate::instance_store::LocalInstanceStore;
use crate::keys;
use crate::model::TempIds;
use crate::queue::{CreationQueue, PatchQueue};
use crate::remapper::IdentifierRemapper;

/// Per-entity async locks.
///
/// Whoever reads and rewrites an entity's patch queue (a flush, a drain,
/// a structural op) holds that entity's lock across the write. Entities are
/// independent, so there is no global lock.
#[derive(Default)]
pub struct EntityLocks {
    locks: Mutex<HashMap<String, Arc<TokioMutex<()>>>>,
}

impl EntityLocks {
    pub async fn lock(&self, entity_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(entity_id.to_string())
                .or_insert_with(|| Arc::new(TokioMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Handles onto every durable component, all backed by one store.
#[derive(Clone)]
pub struct Replica {
    pub kv: Arc<dyn KeyValueStore>,
    pub instances: LocalInstanceStore,
    pub remapper: IdentifierRemapper,
    pub creates: CreationQueue,
    pub patches: PatchQueue,
    pub locks: Arc<EntityLocks>,
}

impl Replica {
    pub fn new(kv: Arc<dyn KeyValueStore>, temp_ids: TempIds) -> Self {
        let remapper = IdentifierRemapper::new(kv.clone(), temp_ids);
        Self {
            instances: LocalInstanceStore::new(kv.clone(), remapper.clone()),
            creates: CreationQueue::new(kv.clone()),
            patches: PatchQueue::new(kv.clone()),
            remapper,
            kv,
            locks: Arc::new(EntityLocks::default()),
        }
    }

    /// Mark an entity whose background drain hit a validation failure.
    /// The hold is stored under `hold/{id}` with the failure message, so it
    /// outlives a restart.
    pub async fn hold(&self, entity_id: &str, reason: &str) -> Result<(), EngineError> {
        self.kv.set(&keys::hold(entity_id), reason.to_string()).await?;
        Ok(())
    }

    /// Returns true if the entity was held.
    pub async fn release(&self, entity_id: &str) -> Result<bool, EngineError> {
        let key = keys::hold(entity_id);
        if self.kv.get(&key).await?.is_none() {
            return Ok(false);
        }
        self.kv.delete(&key).await?;
        Ok(true)
    }

    pub async fn is_held(&self, entity_id: &str) -> Result<bool, EngineError> {
        Ok(self.kv.get(&keys::hold(entity_id)).await?.is_some())
    }
}
