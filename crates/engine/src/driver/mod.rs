//! Synchronization driver: drains the creation queue, then patch queues.

mod report;

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{EngineError, ErrorKind};
use crate::model::{CreateJob, Instance, InstanceDocument, PatchJob};
use crate::patch::apply_ops;
use crate::remote::{CreateRequest, CreatedEntity, EntityRevision, RemoteError, RemoteStore};
use crate::replica::Replica;

pub use report::{CreatedMapping, DrainOutcome, SyncErrorEvent, SyncPhase, SyncReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    DrainingCreates,
    DrainingPatches,
}

/// Who asked for a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Connectivity change or a scheduled cycle. Validation failures hold
    /// the entity until a user acts on it.
    Background,
    /// An explicit save, transition or drain request. Clears any hold.
    User,
}

/// Marks a cycle as running; resets the state to idle when dropped.
struct CycleGuard {
    state: Arc<Mutex<SyncState>>,
}

impl CycleGuard {
    fn enter(state: &Arc<Mutex<SyncState>>) -> Option<Self> {
        let mut current = state.lock();
        if *current != SyncState::Idle {
            return None;
        }
        *current = SyncState::DrainingCreates;
        Some(Self {
            state: state.clone(),
        })
    }

    fn advance(&self, next: SyncState) {
        *self.state.lock() = next;
    }
}

impl Drop for CycleGuard {
    fn drop(&mut self) {
        *self.state.lock() = SyncState::Idle;
    }
}

#[derive(Clone)]
pub struct SyncDriver {
    replica: Replica,
    remote: Arc<dyn RemoteStore>,
    state: Arc<Mutex<SyncState>>,
}

impl SyncDriver {
    pub fn new(replica: Replica, remote: Arc<dyn RemoteStore>) -> Self {
        Self {
            replica,
            remote,
            state: Arc::new(Mutex::new(SyncState::Idle)),
        }
    }

    pub fn state(&self) -> SyncState {
        *self.state.lock()
    }

    /// Run one full cycle. A call made while a cycle is running returns a
    /// skipped report immediately.
    pub async fn sync(&self) -> SyncReport {
        let Some(cycle) = CycleGuard::enter(&self.state) else {
            tracing::debug!("sync requested while a cycle is running; ignored");
            return SyncReport::skipped();
        };
        let mut report = SyncReport::default();
        let mut drained = HashSet::new();

        self.drain_creates(&mut report, &mut drained).await;

        cycle.advance(SyncState::DrainingPatches);
        let entities = match self.replica.patches.entities().await {
            Ok(entities) => entities,
            Err(err) => {
                tracing::error!(error = %err, "could not list patch queues");
                report.record("*", SyncPhase::Patches, &err);
                return report;
            }
        };
        for entity_id in entities {
            // Queues still under a temporary id wait for their creation.
            if self.replica.remapper.is_temporary(&entity_id) || drained.contains(&entity_id) {
                continue;
            }
            let outcome = self.drain_entity(&entity_id, Trigger::Background).await;
            report.absorb(&entity_id, SyncPhase::Patches, &outcome);
        }

        tracing::info!(
            created = report.created.len(),
            patches = report.patches_sent,
            conflicts = report.conflicts_recovered,
            errors = report.errors.len(),
            "sync cycle finished"
        );
        report
    }

    async fn drain_creates(&self, report: &mut SyncReport, drained: &mut HashSet<String>) {
        let mut skipped: HashSet<String> = HashSet::new();
        loop {
            let next = match self.replica.creates.jobs().await {
                Ok(jobs) => jobs.into_iter().find(|j| !skipped.contains(&j.temp_id)),
                Err(err) => {
                    report.record("*", SyncPhase::Creates, &err);
                    report.creates_halted = true;
                    return;
                }
            };
            let Some(job) = next else {
                return;
            };

            tracing::info!(temp_id = %job.temp_id, form_type = %job.form_type, "sending create");
            let request = CreateRequest {
                form_type: job.form_type.clone(),
                form_version: job.form_version_hint.clone(),
                initial_payload: job.initial_payload.clone(),
                idempotency_key: job.idempotency_key.clone(),
            };
            let created = match self.remote.create_entity(request).await {
                Ok(created) => created,
                Err(err) => {
                    let err = EngineError::from_remote(&job.temp_id, err);
                    tracing::warn!(temp_id = %job.temp_id, error = %err, "create failed; halting creation queue");
                    report.record(&job.temp_id, SyncPhase::Creates, &err);
                    report.creates_halted = true;
                    return;
                }
            };

            if let Err(err) = self.commit_creation(&job, &created).await {
                tracing::error!(
                    temp_id = %job.temp_id,
                    server_id = %created.server_id,
                    error = %err,
                    "could not commit creation; skipping for this cycle"
                );
                report.record(&job.temp_id, SyncPhase::Creates, &err);
                skipped.insert(job.temp_id);
                continue;
            }
            tracing::info!(temp_id = %job.temp_id, server_id = %created.server_id, "entity created");
            report.created.push(CreatedMapping {
                temp_id: job.temp_id.clone(),
                server_id: created.server_id.clone(),
            });

            let outcome = self
                .drain_entity(&created.server_id, Trigger::Background)
                .await;
            report.absorb(&created.server_id, SyncPhase::Patches, &outcome);
            drained.insert(created.server_id);
        }
    }

    /// Rekey the instance, move its patch queue and pop the create job in
    /// one batch.
    async fn commit_creation(
        &self,
        job: &CreateJob,
        created: &CreatedEntity,
    ) -> Result<(), EngineError> {
        let replica = &self.replica;
        let _entity = replica.locks.lock(&job.temp_id).await;
        let _queue = replica.creates.guard().await;
        if !replica.creates.contains(&job.temp_id).await? {
            return Err(EngineError::ProtocolViolation(format!(
                "creation of {} was discarded while in flight",
                job.temp_id
            )));
        }

        let revision = &created.revision;
        let token = revision.concurrency_token.as_str();
        let mut ops = replica
            .instances
            .rekey_ops(&job.temp_id, &created.server_id, |meta| {
                meta.concurrency_token = Some(token.to_string());
                meta.version_token = revision.version;
                meta.workflow_state = revision.workflow_state.clone();
            })
            .await?;
        ops.extend(
            replica
                .patches
                .move_ops(&job.temp_id, &created.server_id, Some(token))
                .await?,
        );
        ops.extend(replica.creates.pop_ops(&job.temp_id).await?);
        replica.kv.write_batch(ops).await?;
        Ok(())
    }

    /// Drain one entity's patch queue head to tail.
    ///
    /// Never returns an error; a halted drain reports why in
    /// [`DrainOutcome::halt`]. A temporary id that has not been created yet
    /// halts with [`EngineError::NotCreated`].
    pub async fn drain_entity(&self, entity_id: &str, trigger: Trigger) -> DrainOutcome {
        let entity_id = match self.replica.remapper.resolve(entity_id).await {
            Ok(id) => id,
            Err(err) => return DrainOutcome::halted(err),
        };
        if self.replica.remapper.is_temporary(&entity_id) {
            return DrainOutcome::halted(EngineError::NotCreated(entity_id));
        }
        match trigger {
            Trigger::User => match self.replica.release(&entity_id).await {
                Ok(true) => tracing::info!(entity = %entity_id, "validation hold released"),
                Ok(false) => {}
                Err(err) => return DrainOutcome::halted(err),
            },
            Trigger::Background => match self.replica.is_held(&entity_id).await {
                Ok(true) => {
                    tracing::debug!(entity = %entity_id, "held after validation failure; skipped");
                    return DrainOutcome {
                        held: true,
                        ..DrainOutcome::default()
                    };
                }
                Ok(false) => {}
                Err(err) => return DrainOutcome::halted(err),
            },
        }

        let _guard = self.replica.locks.lock(&entity_id).await;
        let mut outcome = DrainOutcome::default();
        if let Err(err) = self.drain_locked(&entity_id, &mut outcome).await {
            if err.kind() == ErrorKind::Validation && trigger == Trigger::Background {
                if let Err(hold_err) = self.replica.hold(&entity_id, &err.to_string()).await {
                    tracing::error!(entity = %entity_id, error = %hold_err, "could not persist validation hold");
                }
            }
            tracing::warn!(entity = %entity_id, error = %err, "patch drain halted");
            outcome.halt = Some(err);
        }
        outcome
    }

    async fn drain_locked(
        &self,
        entity_id: &str,
        outcome: &mut DrainOutcome,
    ) -> Result<(), EngineError> {
        loop {
            let mut jobs = self.replica.patches.jobs(entity_id).await?;
            let Some(head) = jobs.first().cloned() else {
                return Ok(());
            };
            let token = match head.concurrency_token.clone() {
                Some(token) => token,
                None => self.current_token(entity_id).await?,
            };

            tracing::debug!(
                entity = %entity_id,
                section = %head.section_key,
                ops = head.operations.len(),
                "sending patch"
            );
            let sent = self
                .remote
                .apply_patch(
                    entity_id,
                    &head.section_key,
                    &head.operations,
                    &token,
                    &head.idempotency_key,
                )
                .await;

            match sent {
                Ok(revision) => {
                    jobs.remove(0);
                    // Jobs computed against the state this write superseded.
                    rebase(&mut jobs, &token, &revision.concurrency_token);
                    self.store_revision(entity_id, &revision, &jobs).await?;
                    outcome.sent += 1;
                }
                Err(RemoteError::Conflict { .. }) => {
                    tracing::warn!(
                        entity = %entity_id,
                        idempotency_key = %head.idempotency_key,
                        "conflict; refetching and dropping head job"
                    );
                    let fresh = self
                        .remote
                        .get_entity(entity_id)
                        .await
                        .map_err(|e| EngineError::from_remote(entity_id, e))?;
                    jobs.remove(0);
                    let fresh_token = fresh.revision.concurrency_token.as_str();
                    if let Some(next) = jobs.first_mut() {
                        next.concurrency_token = Some(fresh_token.to_string());
                    }
                    rebase(&mut jobs, &token, fresh_token);
                    self.store_revision(entity_id, &fresh.revision, &jobs).await?;
                    outcome.conflicts += 1;
                }
                Err(err) => return Err(EngineError::from_remote(entity_id, err)),
            }
        }
    }

    async fn current_token(&self, entity_id: &str) -> Result<String, EngineError> {
        self.replica
            .instances
            .require(entity_id)
            .await?
            .meta
            .concurrency_token
            .ok_or_else(|| EngineError::NotCreated(entity_id.to_string()))
    }

    /// Persist the server's view plus the remaining queue in one batch.
    ///
    /// The local document becomes the server document with the still
    /// queued jobs replayed on top, so unsent edits stay visible.
    async fn store_revision(
        &self,
        entity_id: &str,
        revision: &EntityRevision,
        remaining: &[PatchJob],
    ) -> Result<(), EngineError> {
        let Instance { mut meta, .. } = self.replica.instances.require(entity_id).await?;
        meta.is_local = false;
        meta.concurrency_token = Some(revision.concurrency_token.clone());
        meta.version_token = revision.version;
        meta.workflow_state = revision.workflow_state.clone();

        let mut document = revision.document.clone();
        for job in remaining {
            if let Err(err) = apply_ops(&mut document, &job.operations) {
                tracing::warn!(
                    entity = %entity_id,
                    idempotency_key = %job.idempotency_key,
                    error = %err,
                    "queued job does not apply to the server document"
                );
            }
        }

        let mut ops = self.replica.patches.write_ops(entity_id, remaining)?;
        ops.extend(
            self.replica
                .instances
                .upsert_ops(&meta, &InstanceDocument(document))?,
        );
        self.replica.kv.write_batch(ops).await?;
        Ok(())
    }

    /// Conditional workflow transition of an entity whose queue is empty.
    ///
    /// On a conflict the authoritative state is fetched and stored before
    /// the conflict is returned.
    pub async fn transition(
        &self,
        entity_id: &str,
        transition_key: &str,
    ) -> Result<EntityRevision, EngineError> {
        let _guard = self.replica.locks.lock(entity_id).await;
        let token = self.current_token(entity_id).await?;
        let remaining = self.replica.patches.jobs(entity_id).await?;

        tracing::info!(entity = %entity_id, transition = transition_key, "sending transition");
        match self.remote.transition(entity_id, transition_key, &token).await {
            Ok(revision) => {
                self.store_revision(entity_id, &revision, &remaining).await?;
                Ok(revision)
            }
            Err(RemoteError::Conflict { .. }) => {
                tracing::warn!(entity = %entity_id, "transition conflict; refetching");
                let fresh = self
                    .remote
                    .get_entity(entity_id)
                    .await
                    .map_err(|e| EngineError::from_remote(entity_id, e))?;
                self.store_revision(entity_id, &fresh.revision, &remaining)
                    .await?;
                Err(EngineError::Conflict {
                    entity_id: entity_id.to_string(),
                })
            }
            Err(err) => Err(EngineError::from_remote(entity_id, err)),
        }
    }
}

/// Move every job that carries `stale` (or no token yet) onto `fresh`.
fn rebase(jobs: &mut [PatchJob], stale: &str, fresh: &str) {
    for job in jobs {
        if job.concurrency_token.as_deref().map_or(true, |t| t == stale) {
            job.concurrency_token = Some(fresh.to_string());
        }
    }
}
