//! Durable temporary-to-server identifier mapping.

use std::sync::Arc;

use fieldsync_storage::{get_json, KeyValueStore, WriteOp};

use crate::error::EngineError;
use crate::keys;
use crate::model::{now_rfc3339, IdentifierMapping, TempIds};

/// Resolves temporary identifiers to the server identifiers they became.
///
/// Mappings are append-only: once `tmp -> srv` is recorded, `tmp` never
/// maps anywhere else. They are kept after the instance itself moves so
/// that stale references (a queued deep link, a UI route) keep resolving.
#[derive(Clone)]
pub struct IdentifierRemapper {
    kv: Arc<dyn KeyValueStore>,
    temp_ids: TempIds,
}

impl IdentifierRemapper {
    pub fn new(kv: Arc<dyn KeyValueStore>, temp_ids: TempIds) -> Self {
        Self { kv, temp_ids }
    }

    pub fn is_temporary(&self, id: &str) -> bool {
        self.temp_ids.is_temporary(id)
    }

    pub fn temp_ids(&self) -> &TempIds {
        &self.temp_ids
    }

    /// Map `id` to its server identifier.
    ///
    /// Non-temporary ids and temporary ids without a mapping come back
    /// unchanged; the latter means the entity has not been created yet.
    pub async fn resolve(&self, id: &str) -> Result<String, EngineError> {
        if !self.is_temporary(id) {
            return Ok(id.to_string());
        }
        Ok(self
            .lookup(id)
            .await?
            .map(|m| m.server_id)
            .unwrap_or_else(|| id.to_string()))
    }

    pub async fn lookup(&self, temp_id: &str) -> Result<Option<IdentifierMapping>, EngineError> {
        Ok(get_json(self.kv.as_ref(), &keys::idmap(temp_id)).await?)
    }

    /// Ops that record `temp_id -> server_id`.
    ///
    /// Recording the same mapping twice yields no ops; recording a different
    /// server id for an already mapped temp id is a protocol violation.
    pub async fn record_ops(
        &self,
        temp_id: &str,
        server_id: &str,
    ) -> Result<Vec<WriteOp>, EngineError> {
        if let Some(existing) = self.lookup(temp_id).await? {
            if existing.server_id == server_id {
                return Ok(Vec::new());
            }
            return Err(EngineError::ProtocolViolation(format!(
                "{temp_id} is already mapped to {}, refusing to remap to {server_id}",
                existing.server_id
            )));
        }
        let mapping = IdentifierMapping {
            temp_id: temp_id.to_string(),
            server_id: server_id.to_string(),
            mapped_at: now_rfc3339(),
        };
        Ok(vec![WriteOp::set_json(keys::idmap(temp_id), &mapping)?])
    }

    pub async fn record(&self, temp_id: &str, server_id: &str) -> Result<(), EngineError> {
        let ops = self.record_ops(temp_id, server_id).await?;
        if !ops.is_empty() {
            self.kv.write_batch(ops).await?;
        }
        Ok(())
    }

    /// Every recorded mapping, ordered by temporary id.
    pub async fn mappings(&self) -> Result<Vec<IdentifierMapping>, EngineError> {
        let mut out = Vec::new();
        for key in self.kv.keys_with_prefix(keys::IDMAP_PREFIX).await? {
            if let Some(mapping) = get_json(self.kv.as_ref(), &key).await? {
                out.push(mapping);
            }
        }
        Ok(out)
    }
}
