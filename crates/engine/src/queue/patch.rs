use std::sync::Arc;

use fieldsync_storage::{get_json, KeyValueStore, WriteOp};

use crate::error::EngineError;
use crate::keys;
use crate::model::PatchJob;

/// Per-entity FIFO lists of patch jobs.
///
/// Rewrites of one entity's list must happen under that entity's lock
/// (see [`EntityLocks`](crate::replica::EntityLocks)).
#[derive(Clone)]
pub struct PatchQueue {
    kv: Arc<dyn KeyValueStore>,
}

impl PatchQueue {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    pub async fn jobs(&self, entity_id: &str) -> Result<Vec<PatchJob>, EngineError> {
        Ok(get_json(self.kv.as_ref(), &keys::patch_queue(entity_id))
            .await?
            .unwrap_or_default())
    }

    /// Entities that currently have a non-empty queue, ordered by id.
    pub async fn entities(&self) -> Result<Vec<String>, EngineError> {
        Ok(self
            .kv
            .keys_with_prefix(keys::PATCH_QUEUE_PREFIX)
            .await?
            .into_iter()
            .map(|k| k[keys::PATCH_QUEUE_PREFIX.len()..].to_string())
            .collect())
    }

    /// Ops replacing the whole queue of `entity_id`. An empty list deletes
    /// the record.
    pub fn write_ops(&self, entity_id: &str, jobs: &[PatchJob]) -> Result<Vec<WriteOp>, EngineError> {
        let key = keys::patch_queue(entity_id);
        if jobs.is_empty() {
            return Ok(vec![WriteOp::delete(key)]);
        }
        Ok(vec![WriteOp::set_json(key, jobs)?])
    }

    /// Ops appending `new_jobs` to the tail of `entity_id`'s queue.
    pub async fn append_ops(
        &self,
        entity_id: &str,
        new_jobs: Vec<PatchJob>,
    ) -> Result<Vec<WriteOp>, EngineError> {
        let mut jobs = self.jobs(entity_id).await?;
        jobs.extend(new_jobs);
        self.write_ops(entity_id, &jobs)
    }

    pub async fn enqueue(&self, job: PatchJob) -> Result<(), EngineError> {
        let entity_id = job.entity_id.clone();
        let ops = self.append_ops(&entity_id, vec![job]).await?;
        self.kv.write_batch(ops).await?;
        Ok(())
    }

    /// Ops moving `from`'s queue under `to`, order preserved.
    ///
    /// Jobs are retargeted at `to`. Jobs without a token (queued before the
    /// entity existed) receive `token`. Anything already queued under `to`
    /// stays in front.
    pub async fn move_ops(
        &self,
        from: &str,
        to: &str,
        token: Option<&str>,
    ) -> Result<Vec<WriteOp>, EngineError> {
        let moving = self.jobs(from).await?;
        if moving.is_empty() {
            return Ok(Vec::new());
        }
        let mut jobs = self.jobs(to).await?;
        jobs.extend(moving.into_iter().map(|mut job| {
            job.entity_id = to.to_string();
            if job.concurrency_token.is_none() {
                job.concurrency_token = token.map(str::to_string);
            }
            job
        }));
        let mut ops = self.write_ops(to, &jobs)?;
        ops.push(WriteOp::delete(keys::patch_queue(from)));
        Ok(ops)
    }

    pub fn remove_ops(&self, entity_id: &str) -> Vec<WriteOp> {
        vec![WriteOp::delete(keys::patch_queue(entity_id))]
    }
}
