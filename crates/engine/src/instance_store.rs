//! Local Instance Store: metadata and document per local identifier.

use std::sync::Arc;

use fieldsync_storage::{get_json, KeyValueStore, WriteOp};

use crate::error::EngineError;
use crate::keys;
use crate::model::{Instance, InstanceDocument, LocalInstanceMeta};
use crate::remapper::IdentifierRemapper;

/// Single source of truth for what the client believes about each entity.
///
/// Metadata and document live under separate keys but are always written
/// together in one batch; a record with only one half present is treated
/// as absent.
#[derive(Clone)]
pub struct LocalInstanceStore {
    kv: Arc<dyn KeyValueStore>,
    remapper: IdentifierRemapper,
}

impl LocalInstanceStore {
    pub fn new(kv: Arc<dyn KeyValueStore>, remapper: IdentifierRemapper) -> Self {
        Self { kv, remapper }
    }

    pub async fn get(&self, local_id: &str) -> Result<Option<Instance>, EngineError> {
        let meta: Option<LocalInstanceMeta> = get_json(self.kv.as_ref(), &keys::meta(local_id)).await?;
        let Some(meta) = meta else {
            return Ok(None);
        };
        let document: Option<InstanceDocument> =
            get_json(self.kv.as_ref(), &keys::doc(local_id)).await?;
        Ok(document.map(|document| Instance { meta, document }))
    }

    /// Like [`get`](Self::get) but absence is an error.
    pub async fn require(&self, local_id: &str) -> Result<Instance, EngineError> {
        self.get(local_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(local_id.to_string()))
    }

    /// Overwrite metadata and document atomically.
    pub async fn upsert(
        &self,
        meta: &LocalInstanceMeta,
        document: &InstanceDocument,
    ) -> Result<(), EngineError> {
        self.kv.write_batch(self.upsert_ops(meta, document)?).await?;
        Ok(())
    }

    pub fn upsert_ops(
        &self,
        meta: &LocalInstanceMeta,
        document: &InstanceDocument,
    ) -> Result<Vec<WriteOp>, EngineError> {
        Ok(vec![
            WriteOp::set_json(keys::meta(&meta.local_id), meta)?,
            WriteOp::set_json(keys::doc(&meta.local_id), document)?,
        ])
    }

    pub fn remove_ops(&self, local_id: &str) -> Vec<WriteOp> {
        vec![
            WriteOp::delete(keys::meta(local_id)),
            WriteOp::delete(keys::doc(local_id)),
        ]
    }

    /// Move `temp_id`'s records to `server_id` and record the mapping.
    pub async fn rekey(&self, temp_id: &str, server_id: &str) -> Result<(), EngineError> {
        let ops = self.rekey_ops(temp_id, server_id, |_| {}).await?;
        self.kv.write_batch(ops).await?;
        Ok(())
    }

    /// Ops for [`rekey`](Self::rekey), with `update` applied to the moved
    /// metadata so callers can fold in the creation result.
    ///
    /// A destination that already holds data is a protocol violation: the
    /// caller skips the item rather than merge two records.
    pub async fn rekey_ops(
        &self,
        temp_id: &str,
        server_id: &str,
        update: impl FnOnce(&mut LocalInstanceMeta),
    ) -> Result<Vec<WriteOp>, EngineError> {
        let occupied = self.kv.get(&keys::meta(server_id)).await?.is_some()
            || self.kv.get(&keys::doc(server_id)).await?.is_some();
        if occupied {
            return Err(EngineError::ProtocolViolation(format!(
                "rekey {temp_id} -> {server_id}: destination already has local data"
            )));
        }

        let Instance { mut meta, document } = self.require(temp_id).await?;
        meta.local_id = server_id.to_string();
        meta.is_local = false;
        update(&mut meta);

        let mut ops = self.upsert_ops(&meta, &document)?;
        ops.extend(self.remove_ops(temp_id));
        ops.extend(self.remapper.record_ops(temp_id, server_id).await?);
        Ok(ops)
    }

    /// Metadata of every fully hydrated instance, ordered by local id.
    pub async fn list(&self) -> Result<Vec<LocalInstanceMeta>, EngineError> {
        let mut out = Vec::new();
        for key in self.kv.keys_with_prefix(keys::META_PREFIX).await? {
            let id = &key[keys::META_PREFIX.len()..];
            if let Some(instance) = self.get(id).await? {
                out.push(instance.meta);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TempIds;
    use fieldsync_storage::MemoryStore;
    use serde_json::json;

    fn store() -> (Arc<MemoryStore>, LocalInstanceStore) {
        let kv = Arc::new(MemoryStore::new());
        let remapper = IdentifierRemapper::new(kv.clone(), TempIds::new("tmp_"));
        (kv.clone(), LocalInstanceStore::new(kv, remapper))
    }

    fn meta(id: &str) -> LocalInstanceMeta {
        LocalInstanceMeta {
            local_id: id.to_string(),
            is_local: true,
            form_type: "Inspection".to_string(),
            form_version_hint: None,
            workflow_state: String::new(),
            version_token: 0,
            concurrency_token: None,
            schema: json!(null),
            workflow_definition: json!(null),
        }
    }

    #[tokio::test]
    async fn meta_without_document_reads_as_absent() {
        let (kv, store) = store();
        kv.set("meta/tmp_1", serde_json::to_string(&meta("tmp_1")).unwrap())
            .await
            .unwrap();
        assert!(store.get("tmp_1").await.unwrap().is_none());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn upsert_failure_writes_nothing() {
        let (kv, store) = store();
        kv.fail_next_write();
        let result = store
            .upsert(&meta("tmp_1"), &InstanceDocument(json!({"a": 1})))
            .await;
        assert!(result.is_err());
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn rekey_moves_everything_and_leaves_mapping() {
        let (kv, store) = store();
        store
            .upsert(&meta("tmp_1"), &InstanceDocument(json!({"a": 1})))
            .await
            .unwrap();

        store.rekey("tmp_1", "srv-1").await.unwrap();

        assert!(store.get("tmp_1").await.unwrap().is_none());
        assert!(kv.get("doc/tmp_1").await.unwrap().is_none());
        let moved = store.get("srv-1").await.unwrap().unwrap();
        assert_eq!(moved.meta.local_id, "srv-1");
        assert!(!moved.meta.is_local);
        assert_eq!(moved.document.0, json!({"a": 1}));
        assert_eq!(store.remapper.resolve("tmp_1").await.unwrap(), "srv-1");
    }

    #[tokio::test]
    async fn rekey_onto_occupied_destination_is_refused() {
        let (_kv, store) = store();
        let doc = InstanceDocument(json!({}));
        store.upsert(&meta("tmp_1"), &doc).await.unwrap();
        let mut existing = meta("srv-1");
        existing.is_local = false;
        store.upsert(&existing, &doc).await.unwrap();

        let err = store.rekey("tmp_1", "srv-1").await.unwrap_err();
        assert!(matches!(err, EngineError::ProtocolViolation(_)));
        // Nothing moved.
        assert!(store.get("tmp_1").await.unwrap().is_some());
        assert_eq!(store.remapper.resolve("tmp_1").await.unwrap(), "tmp_1");
    }
}
