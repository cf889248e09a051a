//! Public facade tying the components together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use fieldsync_storage::KeyValueStore;
use serde_json::{Map, Value};
use tokio::sync::OwnedMutexGuard;

use crate::coalescer::{EditableSections, PatchCoalescer};
use crate::config::EngineConfig;
use crate::driver::{DrainOutcome, SyncDriver, SyncReport, SyncState, Trigger};
use crate::error::{EngineError, ErrorKind};
use crate::model::{
    new_idempotency_key, now_rfc3339, CreateJob, Instance, InstanceDocument, LocalInstanceMeta,
    NewInstance, PatchJob, TempIds,
};
use crate::patch::apply_ops;
use crate::path::FieldPath;
use crate::remote::{EntityRevision, RemoteStore};
use crate::replica::Replica;
use crate::schema::{FormSchema, StructuralOp};

/// Result of a user-initiated save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Every queued job for the entity reached the server.
    Synced,
    /// The remote was unreachable; the work stays queued.
    SavedOffline,
}

pub struct SyncEngine {
    config: EngineConfig,
    replica: Replica,
    coalescer: PatchCoalescer,
    driver: SyncDriver,
    online: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        remote: Arc<dyn RemoteStore>,
        config: EngineConfig,
    ) -> Self {
        let replica = Replica::new(kv, TempIds::new(config.temp_id_prefix.clone()));
        Self {
            coalescer: PatchCoalescer::new(replica.clone(), config.debounce()),
            driver: SyncDriver::new(replica.clone(), remote),
            replica,
            config,
            online: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn sync_state(&self) -> SyncState {
        self.driver.state()
    }

    /// Start a new instance offline. Returns its temporary id.
    pub async fn create_instance(&self, new: NewInstance) -> Result<String, EngineError> {
        let temp_id = self.replica.remapper.temp_ids().generate();
        let document = match new.initial_payload {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let meta = LocalInstanceMeta {
            local_id: temp_id.clone(),
            is_local: true,
            form_type: new.form_type.clone(),
            form_version_hint: new.form_version_hint.clone(),
            workflow_state: String::new(),
            version_token: 0,
            concurrency_token: None,
            schema: new.schema,
            workflow_definition: new.workflow_definition,
        };
        let job = CreateJob {
            temp_id: temp_id.clone(),
            form_type: new.form_type,
            form_version_hint: new.form_version_hint,
            initial_payload: document.clone(),
            idempotency_key: new_idempotency_key(),
            queued_at: now_rfc3339(),
        };

        let _queue = self.replica.creates.guard().await;
        let mut ops = self
            .replica
            .instances
            .upsert_ops(&meta, &InstanceDocument(document))?;
        ops.extend(self.replica.creates.enqueue_ops(job).await?);
        self.replica.kv.write_batch(ops).await?;
        tracing::info!(temp_id = %temp_id, form_type = %meta.form_type, "instance created offline");
        Ok(temp_id)
    }

    pub fn set_editable_sections(&self, entity_id: &str, sections: EditableSections) {
        self.coalescer.set_editable_sections(entity_id, sections);
    }

    /// Record a field edit. Returns false for a read-only section.
    pub fn record_edit(
        &self,
        entity_id: &str,
        section_key: &str,
        path: FieldPath,
        value: Value,
    ) -> bool {
        self.coalescer.record_edit(entity_id, section_key, path, value)
    }

    /// Persist pending edits for the entity now.
    pub async fn flush(&self, entity_id: &str) -> Result<usize, EngineError> {
        let target = self.replica.remapper.resolve(entity_id).await?;
        self.replica.release(&target).await?;
        self.coalescer.flush(entity_id).await
    }

    /// Add, remove, clone or rename a repeatable entry.
    ///
    /// Pending field edits are flushed first so they stay ordered before
    /// the structural change.
    pub async fn apply_structural(
        &self,
        entity_id: &str,
        op: StructuralOp,
    ) -> Result<PatchJob, EngineError> {
        self.flush(entity_id).await?;

        let (target, _guards) = self.lock_resolved(entity_id).await?;
        let Instance { mut meta, document } = self.replica.instances.require(&target).await?;
        let schema = FormSchema::parse(&meta.schema)?;
        let (section, ops) = op.build(&schema, &document.0)?;
        let mut document = document.0;
        apply_ops(&mut document, &ops)?;
        meta.local_id = target.clone();

        let job = PatchJob::new(&target, section, ops, meta.concurrency_token.clone());
        let mut batch = self
            .replica
            .patches
            .append_ops(&target, vec![job.clone()])
            .await?;
        batch.extend(
            self.replica
                .instances
                .upsert_ops(&meta, &InstanceDocument(document))?,
        );
        self.replica.kv.write_batch(batch).await?;
        tracing::debug!(entity = %target, section = %job.section_key, "structural change queued");
        Ok(job)
    }

    /// Flush and drain one entity.
    ///
    /// Conflicts (even recovered ones) and validation failures are
    /// returned as errors; an unreachable remote is not an error.
    pub async fn save(&self, entity_id: &str) -> Result<SaveOutcome, EngineError> {
        self.flush(entity_id).await?;
        let outcome = self.driver.drain_entity(entity_id, Trigger::User).await;
        Self::user_outcome(entity_id, outcome)
    }

    /// Flush, drain, then move the entity along its workflow.
    pub async fn transition(
        &self,
        entity_id: &str,
        transition_key: &str,
    ) -> Result<EntityRevision, EngineError> {
        self.flush(entity_id).await?;
        let target = self.replica.remapper.resolve(entity_id).await?;
        let outcome = self.driver.drain_entity(&target, Trigger::User).await;
        if let Some(err) = outcome.halt {
            return Err(err);
        }
        if outcome.conflicts > 0 {
            return Err(EngineError::Conflict { entity_id: target });
        }
        self.driver.transition(&target, transition_key).await
    }

    pub async fn sync(&self) -> SyncReport {
        self.driver.sync().await
    }

    /// User-requested drain of one entity.
    pub async fn drain_entity(&self, entity_id: &str) -> DrainOutcome {
        self.driver.drain_entity(entity_id, Trigger::User).await
    }

    /// Record a connectivity change; going online runs a cycle.
    pub async fn connectivity_changed(&self, online: bool) -> Option<SyncReport> {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        if online && !was_online {
            tracing::info!("connectivity restored");
            Some(self.driver.sync().await)
        } else {
            if !online && was_online {
                tracing::info!("connectivity lost");
            }
            None
        }
    }

    pub async fn resolve(&self, id: &str) -> Result<String, EngineError> {
        self.replica.remapper.resolve(id).await
    }

    /// Look an instance up by temporary or server id.
    pub async fn instance(&self, id: &str) -> Result<Option<Instance>, EngineError> {
        let target = self.replica.remapper.resolve(id).await?;
        self.replica.instances.get(&target).await
    }

    pub async fn instances(&self) -> Result<Vec<LocalInstanceMeta>, EngineError> {
        self.replica.instances.list().await
    }

    pub async fn creation_queue(&self) -> Result<Vec<CreateJob>, EngineError> {
        self.replica.creates.jobs().await
    }

    pub async fn patch_queue(&self, id: &str) -> Result<Vec<PatchJob>, EngineError> {
        let target = self.replica.remapper.resolve(id).await?;
        self.replica.patches.jobs(&target).await
    }

    pub async fn queued_entities(&self) -> Result<Vec<String>, EngineError> {
        self.replica.patches.entities().await
    }

    /// Whether background cycles skip the entity after a validation
    /// failure.
    pub async fn is_held(&self, entity_id: &str) -> Result<bool, EngineError> {
        let target = self.replica.remapper.resolve(entity_id).await?;
        self.replica.is_held(&target).await
    }

    /// Abandon an instance that was never created on the server.
    ///
    /// Removes its create job, queued patches, pending edits and local
    /// records. Returns false when no creation was queued for `temp_id`.
    pub async fn discard_creation(&self, temp_id: &str) -> Result<bool, EngineError> {
        self.coalescer.discard(temp_id);
        let _entity = self.replica.locks.lock(temp_id).await;
        let _queue = self.replica.creates.guard().await;
        let mut ops = self.replica.creates.pop_ops(temp_id).await?;
        if ops.is_empty() {
            return Ok(false);
        }
        ops.extend(self.replica.patches.remove_ops(temp_id));
        ops.extend(self.replica.instances.remove_ops(temp_id));
        self.replica.kv.write_batch(ops).await?;
        tracing::info!(temp_id, "creation discarded");
        Ok(true)
    }

    /// Cancel debounce timers. Returns entities whose unflushed edits were
    /// dropped.
    pub fn shutdown(&self) -> Vec<String> {
        self.coalescer.shutdown()
    }

    async fn lock_resolved(
        &self,
        entity_id: &str,
    ) -> Result<(String, Vec<OwnedMutexGuard<()>>), EngineError> {
        let mut guards = vec![self.replica.locks.lock(entity_id).await];
        let target = self.replica.remapper.resolve(entity_id).await?;
        if target != entity_id {
            guards.push(self.replica.locks.lock(&target).await);
        }
        Ok((target, guards))
    }

    fn user_outcome(entity_id: &str, outcome: DrainOutcome) -> Result<SaveOutcome, EngineError> {
        match outcome.halt {
            Some(err) if err.kind() == ErrorKind::Transient => {
                tracing::info!(entity = entity_id, error = %err, "saved offline");
                Ok(SaveOutcome::SavedOffline)
            }
            Some(err) => Err(err),
            None if outcome.conflicts > 0 => Err(EngineError::Conflict {
                entity_id: entity_id.to_string(),
            }),
            None => Ok(SaveOutcome::Synced),
        }
    }
}
