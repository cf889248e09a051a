//! Debounced per-entity accumulation of field edits.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::error::EngineError;
use crate::model::PatchJob;
use crate::patch::{apply_ops, PatchError, PatchOp};
use crate::path::FieldPath;
use crate::replica::Replica;

/// Sections a caller may edit on one entity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EditableSections {
    #[default]
    All,
    Only(HashSet<String>),
}

impl EditableSections {
    pub fn only<I, S>(sections: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        EditableSections::Only(sections.into_iter().map(Into::into).collect())
    }

    pub fn allows(&self, section_key: &str) -> bool {
        match self {
            EditableSections::All => true,
            EditableSections::Only(keys) => keys.contains(section_key),
        }
    }
}

/// section key -> field path -> latest value, in first-edit order.
type SectionEdits = IndexMap<String, IndexMap<FieldPath, Value>>;

/// Edits for one entity plus the debounce task that owns their flush.
struct Pending {
    edits: SectionEdits,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

struct Inner {
    replica: Replica,
    debounce: Duration,
    pending: Mutex<HashMap<String, Pending>>,
    editable: Mutex<HashMap<String, EditableSections>>,
}

/// Merges bursts of field edits into one patch job per section.
///
/// Each entity has its own debounce timer; every edit restarts it. When it
/// fires, or when [`flush`](PatchCoalescer::flush) is called, the entity's
/// edits become queued patch jobs and are applied to the local document in
/// the same batch.
#[derive(Clone)]
pub struct PatchCoalescer {
    inner: Arc<Inner>,
}

impl PatchCoalescer {
    pub fn new(replica: Replica, debounce: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                replica,
                debounce,
                pending: Mutex::new(HashMap::new()),
                editable: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Restrict which sections of `entity_id` accept edits.
    pub fn set_editable_sections(&self, entity_id: &str, sections: EditableSections) {
        self.inner
            .editable
            .lock()
            .insert(entity_id.to_string(), sections);
    }

    /// Record an edit, replacing any pending value for the same field.
    ///
    /// Returns false (and records nothing) when the section is not
    /// editable for this entity. Must be called from within a tokio
    /// runtime; the debounce timer is a spawned task.
    pub fn record_edit(
        &self,
        entity_id: &str,
        section_key: &str,
        path: FieldPath,
        value: Value,
    ) -> bool {
        let allowed = self
            .inner
            .editable
            .lock()
            .get(entity_id)
            .map_or(true, |s| s.allows(section_key));
        if !allowed {
            tracing::debug!(entity = entity_id, section = section_key, "edit to read-only section ignored");
            return false;
        }

        let mut pending = self.inner.pending.lock();
        let entry = pending.entry(entity_id.to_string()).or_insert_with(|| Pending {
            edits: IndexMap::new(),
            generation: 0,
            timer: None,
        });
        entry
            .edits
            .entry(section_key.to_string())
            .or_default()
            .insert(path, value);
        entry.generation += 1;
        if let Some(timer) = entry.timer.take() {
            timer.abort();
        }
        entry.timer = Some(tokio::spawn(debounce_timer(
            Arc::downgrade(&self.inner),
            entity_id.to_string(),
            entry.generation,
            self.inner.debounce,
        )));
        true
    }

    /// Persist pending edits for `entity_id` now. Returns the number of
    /// jobs queued; zero when nothing was pending.
    ///
    /// An edit whose path does not apply to the local document is dropped
    /// and reported as the error, after the other edits have been queued.
    pub async fn flush(&self, entity_id: &str) -> Result<usize, EngineError> {
        let edits = {
            let mut pending = self.inner.pending.lock();
            match pending.remove(entity_id) {
                Some(entry) => {
                    if let Some(timer) = entry.timer {
                        timer.abort();
                    }
                    entry.edits
                }
                None => return Ok(0),
            }
        };
        self.inner.persist(entity_id, edits).await
    }

    pub fn has_pending(&self, entity_id: &str) -> bool {
        self.inner.pending.lock().contains_key(entity_id)
    }

    /// Drop pending edits for one entity without persisting them.
    pub fn discard(&self, entity_id: &str) -> bool {
        match self.inner.pending.lock().remove(entity_id) {
            Some(entry) => {
                if let Some(timer) = entry.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    /// Cancel every timer and drop unflushed edits.
    ///
    /// Returns the entities whose edits were dropped, sorted.
    pub fn shutdown(&self) -> Vec<String> {
        let drained: Vec<(String, Pending)> = self.inner.pending.lock().drain().collect();
        let mut dropped = Vec::with_capacity(drained.len());
        for (entity_id, entry) in drained {
            if let Some(timer) = entry.timer {
                timer.abort();
            }
            tracing::warn!(entity = %entity_id, "dropping unflushed edits at shutdown");
            dropped.push(entity_id);
        }
        dropped.sort();
        dropped
    }
}

async fn debounce_timer(inner: Weak<Inner>, entity_id: String, generation: u64, delay: Duration) {
    tokio::time::sleep(delay).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let edits = {
        let mut pending = inner.pending.lock();
        match pending.get(&entity_id) {
            Some(entry) if entry.generation == generation => {
                pending.remove(&entity_id).map(|e| e.edits)
            }
            _ => None,
        }
    };
    let Some(edits) = edits else {
        return;
    };
    if let Err(err) = inner.persist(&entity_id, edits).await {
        tracing::warn!(entity = %entity_id, error = %err, "debounced flush failed");
    }
}

impl Inner {
    async fn persist(&self, entity_id: &str, edits: SectionEdits) -> Result<usize, EngineError> {
        let replica = &self.replica;
        let _entity_guard = replica.locks.lock(entity_id).await;
        let target = replica.remapper.resolve(entity_id).await?;
        let _target_guard = if target != entity_id {
            Some(replica.locks.lock(&target).await)
        } else {
            None
        };

        let instance = match replica.instances.get(&target).await {
            Ok(Some(instance)) => instance,
            Ok(None) => return Err(EngineError::NotFound(entity_id.to_string())),
            Err(err) => {
                self.restore(entity_id, edits);
                return Err(err);
            }
        };
        let mut meta = instance.meta;
        let mut document = instance.document;

        // A field that does not apply locally is dropped on its own; the
        // rest of the entity's edits are still queued.
        let mut rejected: Option<PatchError> = None;
        let mut jobs: Vec<PatchJob> = Vec::with_capacity(edits.len());
        for (section, fields) in &edits {
            let mut ops = Vec::with_capacity(fields.len());
            for (path, value) in fields {
                let op = PatchOp::replace(path.clone(), value.clone());
                match apply_ops(&mut document.0, std::slice::from_ref(&op)) {
                    Ok(()) => ops.push(op),
                    Err(err) => {
                        tracing::warn!(
                            entity = %target,
                            section = %section,
                            path = %path,
                            error = %err,
                            "edit does not apply to the local document; dropped"
                        );
                        rejected.get_or_insert(err);
                    }
                }
            }
            if !ops.is_empty() {
                jobs.push(PatchJob::new(
                    &target,
                    section,
                    ops,
                    meta.concurrency_token.clone(),
                ));
            }
        }
        if jobs.is_empty() {
            return match rejected {
                Some(err) => Err(err.into()),
                None => Ok(0),
            };
        }
        meta.local_id = target.clone();

        let count = jobs.len();
        let result = async {
            let mut batch = replica.patches.append_ops(&target, jobs).await?;
            batch.extend(replica.instances.upsert_ops(&meta, &document)?);
            replica.kv.write_batch(batch).await?;
            Ok::<_, EngineError>(())
        }
        .await;
        if let Err(err) = result {
            self.restore(entity_id, edits);
            return Err(err);
        }
        tracing::debug!(entity = %target, jobs = count, "queued coalesced edits");
        match rejected {
            Some(err) => Err(err.into()),
            None => Ok(count),
        }
    }

    /// Put edits back after a failed write. Edits recorded since take
    /// precedence.
    fn restore(&self, entity_id: &str, edits: SectionEdits) {
        let mut pending = self.pending.lock();
        let entry = pending.entry(entity_id.to_string()).or_insert_with(|| Pending {
            edits: IndexMap::new(),
            generation: 0,
            timer: None,
        });
        for (section, fields) in edits {
            let slot = entry.edits.entry(section).or_default();
            for (path, value) in fields {
                slot.entry(path).or_insert(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{InstanceDocument, LocalInstanceMeta, TempIds};
    use fieldsync_storage::{KeyValueStore, MemoryStore};
    use serde_json::json;

    const DEBOUNCE: Duration = Duration::from_millis(250);

    async fn setup() -> (Arc<MemoryStore>, Replica, PatchCoalescer) {
        let kv = Arc::new(MemoryStore::new());
        let replica = Replica::new(kv.clone(), TempIds::new("tmp_"));
        let meta = LocalInstanceMeta {
            local_id: "srv-1".into(),
            is_local: false,
            form_type: "Inspection".into(),
            form_version_hint: None,
            workflow_state: "draft".into(),
            version_token: 1,
            concurrency_token: Some("t1".into()),
            schema: Value::Null,
            workflow_definition: Value::Null,
        };
        replica
            .instances
            .upsert(&meta, &InstanceDocument(json!({})))
            .await
            .unwrap();
        let coalescer = PatchCoalescer::new(replica.clone(), DEBOUNCE);
        (kv, replica, coalescer)
    }

    fn pressure() -> FieldPath {
        FieldPath::root().field("general").field("pressure")
    }

    #[tokio::test(start_paused = true)]
    async fn last_write_wins_within_window() {
        let (_kv, replica, coalescer) = setup().await;
        coalescer.record_edit("srv-1", "general", pressure(), json!("10"));
        tokio::time::sleep(Duration::from_millis(200)).await;
        coalescer.record_edit("srv-1", "general", pressure(), json!("12"));

        // Timer was restarted; nothing persisted yet at 250ms after the first edit.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(replica.patches.jobs("srv-1").await.unwrap().is_empty());

        tokio::time::sleep(DEBOUNCE).await;
        let jobs = replica.patches.jobs("srv-1").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].operations.len(), 1);
        assert_eq!(jobs[0].operations[0].value, Some(json!("12")));
        assert_eq!(jobs[0].concurrency_token.as_deref(), Some("t1"));

        let doc = replica.instances.get("srv-1").await.unwrap().unwrap().document;
        assert_eq!(doc.0["general"]["pressure"], "12");
    }

    #[tokio::test(start_paused = true)]
    async fn one_job_per_section() {
        let (_kv, replica, coalescer) = setup().await;
        coalescer.record_edit("srv-1", "general", pressure(), json!(1));
        coalescer.record_edit(
            "srv-1",
            "site",
            FieldPath::root().field("site").field("name"),
            json!("North"),
        );
        assert_eq!(coalescer.flush("srv-1").await.unwrap(), 2);
        let sections: Vec<_> = replica
            .patches
            .jobs("srv-1")
            .await
            .unwrap()
            .into_iter()
            .map(|j| j.section_key)
            .collect();
        assert_eq!(sections, ["general", "site"]);
    }

    #[tokio::test(start_paused = true)]
    async fn flush_is_idempotent_and_cancels_timer() {
        let (_kv, replica, coalescer) = setup().await;
        coalescer.record_edit("srv-1", "general", pressure(), json!(1));
        assert_eq!(coalescer.flush("srv-1").await.unwrap(), 1);
        assert_eq!(coalescer.flush("srv-1").await.unwrap(), 0);

        tokio::time::sleep(DEBOUNCE * 2).await;
        assert_eq!(replica.patches.jobs("srv-1").await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn read_only_sections_are_rejected() {
        let (_kv, _replica, coalescer) = setup().await;
        coalescer.set_editable_sections("srv-1", EditableSections::only(["site"]));
        assert!(!coalescer.record_edit("srv-1", "general", pressure(), json!(1)));
        assert!(!coalescer.has_pending("srv-1"));
        assert!(coalescer.record_edit(
            "srv-1",
            "site",
            FieldPath::root().field("site").field("name"),
            json!("x")
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_write_keeps_edits_for_the_next_flush() {
        let (kv, replica, coalescer) = setup().await;
        coalescer.record_edit("srv-1", "general", pressure(), json!("old"));
        kv.fail_next_write();
        assert!(coalescer.flush("srv-1").await.is_err());
        assert!(coalescer.has_pending("srv-1"));

        // A newer edit wins over the restored one.
        coalescer.record_edit("srv-1", "general", pressure(), json!("new"));
        coalescer.flush("srv-1").await.unwrap();
        let jobs = replica.patches.jobs("srv-1").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].operations[0].value, Some(json!("new")));
        assert!(kv.get("queue/patch/srv-1").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn unappliable_edit_does_not_take_other_sections_with_it() {
        let (_kv, replica, coalescer) = setup().await;
        let missing_entry = FieldPath::root().field("items").index(5).field("name");
        coalescer.record_edit("srv-1", "general", pressure(), json!("12"));
        coalescer.record_edit("srv-1", "items", missing_entry, json!("pump"));

        let err = coalescer.flush("srv-1").await.unwrap_err();
        assert!(matches!(err, EngineError::Patch(_)), "{err}");
        assert!(!coalescer.has_pending("srv-1"));

        let jobs = replica.patches.jobs("srv-1").await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].section_key, "general");
        assert_eq!(jobs[0].operations, vec![PatchOp::replace(pressure(), json!("12"))]);
        let doc = replica.instances.get("srv-1").await.unwrap().unwrap().document;
        assert_eq!(doc.0, json!({"general": {"pressure": "12"}}));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_without_flushing() {
        let (_kv, replica, coalescer) = setup().await;
        coalescer.record_edit("srv-1", "general", pressure(), json!(1));
        assert_eq!(coalescer.shutdown(), ["srv-1"]);
        tokio::time::sleep(DEBOUNCE * 2).await;
        assert!(replica.patches.jobs("srv-1").await.unwrap().is_empty());
        assert!(!coalescer.has_pending("srv-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn edits_to_a_created_temp_id_land_on_the_server_id() {
        let (_kv, replica, coalescer) = setup().await;
        replica.remapper.record("tmp_gone", "srv-1").await.unwrap();
        coalescer.record_edit("tmp_gone", "general", pressure(), json!(3));
        coalescer.flush("tmp_gone").await.unwrap();
        assert_eq!(replica.patches.jobs("srv-1").await.unwrap().len(), 1);
        assert!(replica.patches.jobs("tmp_gone").await.unwrap().is_empty());
    }
}
