use std::sync::Arc;

use fieldsync_storage::{get_json, KeyValueStore, WriteOp};
use tokio::sync::{Mutex, MutexGuard};

use crate::error::EngineError;
use crate::keys;
use crate::model::CreateJob;

/// FIFO list of pending creations, stored as one record.
///
/// The whole list is rewritten on every change, so concurrent writers would
/// lose each other's updates. Callers of the `*_ops` methods hold
/// [`guard`](CreationQueue::guard) from the read until their batch lands.
#[derive(Clone)]
pub struct CreationQueue {
    kv: Arc<dyn KeyValueStore>,
    write_lock: Arc<Mutex<()>>,
}

impl CreationQueue {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().await
    }

    pub async fn jobs(&self) -> Result<Vec<CreateJob>, EngineError> {
        Ok(get_json(self.kv.as_ref(), keys::CREATE_QUEUE)
            .await?
            .unwrap_or_default())
    }

    pub async fn contains(&self, temp_id: &str) -> Result<bool, EngineError> {
        Ok(self.jobs().await?.iter().any(|j| j.temp_id == temp_id))
    }

    /// Ops appending `job` at the tail. A second job for the same temp id
    /// is refused.
    pub async fn enqueue_ops(&self, job: CreateJob) -> Result<Vec<WriteOp>, EngineError> {
        let mut jobs = self.jobs().await?;
        if jobs.iter().any(|j| j.temp_id == job.temp_id) {
            return Err(EngineError::ProtocolViolation(format!(
                "creation of {} is already queued",
                job.temp_id
            )));
        }
        jobs.push(job);
        self.write_ops(&jobs)
    }

    /// Ops removing the job for `temp_id`, wherever it sits.
    pub async fn pop_ops(&self, temp_id: &str) -> Result<Vec<WriteOp>, EngineError> {
        let mut jobs = self.jobs().await?;
        let before = jobs.len();
        jobs.retain(|j| j.temp_id != temp_id);
        if jobs.len() == before {
            return Ok(Vec::new());
        }
        self.write_ops(&jobs)
    }

    fn write_ops(&self, jobs: &[CreateJob]) -> Result<Vec<WriteOp>, EngineError> {
        if jobs.is_empty() {
            return Ok(vec![WriteOp::delete(keys::CREATE_QUEUE)]);
        }
        Ok(vec![WriteOp::set_json(keys::CREATE_QUEUE, jobs)?])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::new_idempotency_key;
    use fieldsync_storage::MemoryStore;
    use serde_json::json;

    fn job(temp_id: &str) -> CreateJob {
        CreateJob {
            temp_id: temp_id.to_string(),
            form_type: "Inspection".to_string(),
            form_version_hint: None,
            initial_payload: json!({}),
            idempotency_key: new_idempotency_key(),
            queued_at: "2026-01-01T00:00:00Z".to_string(),
        }
    }

    async fn enqueue(queue: &CreationQueue, kv: &MemoryStore, temp_id: &str) {
        let ops = queue.enqueue_ops(job(temp_id)).await.unwrap();
        kv.write_batch(ops).await.unwrap();
    }

    #[tokio::test]
    async fn fifo_order_and_removal() {
        let kv = Arc::new(MemoryStore::new());
        let queue = CreationQueue::new(kv.clone());
        for id in ["tmp_a", "tmp_b", "tmp_c"] {
            enqueue(&queue, &kv, id).await;
        }
        assert_eq!(queue.jobs().await.unwrap()[0].temp_id, "tmp_a");

        let ops = queue.pop_ops("tmp_b").await.unwrap();
        kv.write_batch(ops).await.unwrap();
        let ids: Vec<_> = queue
            .jobs()
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.temp_id)
            .collect();
        assert_eq!(ids, ["tmp_a", "tmp_c"]);
        assert!(queue.pop_ops("tmp_b").await.unwrap().is_empty());
        assert!(queue.contains("tmp_a").await.unwrap());
        assert!(!queue.contains("tmp_b").await.unwrap());
    }

    #[tokio::test]
    async fn duplicate_temp_id_is_refused() {
        let kv = Arc::new(MemoryStore::new());
        let queue = CreationQueue::new(kv.clone());
        enqueue(&queue, &kv, "tmp_a").await;
        let err = queue.enqueue_ops(job("tmp_a")).await.unwrap_err();
        assert!(matches!(err, EngineError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn emptied_queue_removes_its_key() {
        let kv = Arc::new(MemoryStore::new());
        let queue = CreationQueue::new(kv.clone());
        enqueue(&queue, &kv, "tmp_a").await;
        let ops = queue.pop_ops("tmp_a").await.unwrap();
        kv.write_batch(ops).await.unwrap();
        assert!(kv.is_empty());
        assert!(queue.jobs().await.unwrap().is_empty());
    }
}
