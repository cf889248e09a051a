use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use super::{
    CreateRequest, CreatedEntity, EntityRevision, RemoteEntity, RemoteError, RemoteStore,
};
use crate::patch::{apply_ops, PatchOp};

const INITIAL_STATE: &str = "draft";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteCall {
    Create,
    Get,
    Patch,
    Transition,
}

/// A patch the server actually applied.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchRecord {
    pub server_id: String,
    pub section_key: String,
    pub operations: Vec<PatchOp>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone)]
struct StoredEntity {
    form_type: String,
    form_version: Option<String>,
    version: i64,
    workflow_state: String,
    document: Value,
}

#[derive(Default)]
struct RemoteState {
    next_id: u64,
    entities: BTreeMap<String, StoredEntity>,
    created: HashMap<String, CreatedEntity>,
    patched: HashMap<String, EntityRevision>,
    offline: bool,
    latency: Option<Duration>,
    failures: HashMap<RemoteCall, VecDeque<RemoteError>>,
    rejected_paths: HashSet<String>,
    transitions: HashMap<(String, String), String>,
    calls: HashMap<RemoteCall, usize>,
    patch_log: Vec<PatchRecord>,
}

/// Reference implementation of the remote store.
///
/// Keeps authoritative entities in memory, honours idempotency keys and
/// concurrency tokens the way a real server must, and can be told to fail
/// in specific ways.
#[derive(Default)]
pub struct InMemoryRemote {
    state: Mutex<RemoteState>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// While offline every call fails as transient.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Delay every call, to keep a drain in flight.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state.lock().latency = latency;
    }

    /// Fail the next `call` with `err`. Queued failures are consumed in order.
    pub fn fail_next(&self, call: RemoteCall, err: RemoteError) {
        self.state
            .lock()
            .failures
            .entry(call)
            .or_default()
            .push_back(err);
    }

    /// Reject any patch touching `pointer` with a validation failure.
    pub fn reject_path(&self, pointer: &str) {
        self.state.lock().rejected_paths.insert(pointer.to_string());
    }

    pub fn allow_transition(&self, from: &str, key: &str, to: &str) {
        self.state
            .lock()
            .transitions
            .insert((from.to_string(), key.to_string()), to.to_string());
    }

    /// Apply `ops` as another client would, bumping the token.
    pub fn external_patch(&self, server_id: &str, ops: &[PatchOp]) -> Result<String, RemoteError> {
        let mut state = self.state.lock();
        let entity = state
            .entities
            .get_mut(server_id)
            .ok_or_else(|| RemoteError::NotFound(server_id.to_string()))?;
        apply_ops(&mut entity.document, ops).map_err(|e| RemoteError::Validation(e.to_string()))?;
        entity.version += 1;
        Ok(token(server_id, entity.version))
    }

    pub fn entity(&self, server_id: &str) -> Option<RemoteEntity> {
        let state = self.state.lock();
        state
            .entities
            .get(server_id)
            .map(|e| remote_entity(server_id, e))
    }

    pub fn entity_count(&self) -> usize {
        self.state.lock().entities.len()
    }

    /// Attempts of `call`, failed ones included.
    pub fn calls(&self, call: RemoteCall) -> usize {
        self.state.lock().calls.get(&call).copied().unwrap_or(0)
    }

    pub fn patch_log(&self) -> Vec<PatchRecord> {
        self.state.lock().patch_log.clone()
    }

    /// Count the call and surface any configured failure.
    async fn enter(&self, call: RemoteCall) -> Result<(), RemoteError> {
        let latency = self.state.lock().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        let mut state = self.state.lock();
        *state.calls.entry(call).or_default() += 1;
        if state.offline {
            return Err(RemoteError::Transient("offline".to_string()));
        }
        if let Some(err) = state.failures.get_mut(&call).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        Ok(())
    }
}

fn token(server_id: &str, version: i64) -> String {
    format!("W/\"{server_id}:{version}\"")
}

fn revision(server_id: &str, entity: &StoredEntity) -> EntityRevision {
    EntityRevision {
        concurrency_token: token(server_id, entity.version),
        version: entity.version,
        workflow_state: entity.workflow_state.clone(),
        document: entity.document.clone(),
    }
}

fn remote_entity(server_id: &str, entity: &StoredEntity) -> RemoteEntity {
    RemoteEntity {
        revision: revision(server_id, entity),
        form_type: entity.form_type.clone(),
        form_version: entity.form_version.clone(),
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn create_entity(&self, request: CreateRequest) -> Result<CreatedEntity, RemoteError> {
        self.enter(RemoteCall::Create).await?;
        let mut state = self.state.lock();
        if let Some(created) = state.created.get(&request.idempotency_key) {
            return Ok(created.clone());
        }

        state.next_id += 1;
        let server_id = format!("srv-{}", state.next_id);
        let document = match request.initial_payload {
            Value::Null => Value::Object(Map::new()),
            other => other,
        };
        let entity = StoredEntity {
            form_type: request.form_type,
            form_version: request.form_version,
            version: 1,
            workflow_state: INITIAL_STATE.to_string(),
            document,
        };
        let created = CreatedEntity {
            revision: revision(&server_id, &entity),
            server_id: server_id.clone(),
        };
        state.entities.insert(server_id, entity);
        state
            .created
            .insert(request.idempotency_key, created.clone());
        Ok(created)
    }

    async fn get_entity(&self, server_id: &str) -> Result<RemoteEntity, RemoteError> {
        self.enter(RemoteCall::Get).await?;
        self.entity(server_id)
            .ok_or_else(|| RemoteError::NotFound(server_id.to_string()))
    }

    async fn apply_patch(
        &self,
        server_id: &str,
        section_key: &str,
        operations: &[PatchOp],
        concurrency_token: &str,
        idempotency_key: &str,
    ) -> Result<EntityRevision, RemoteError> {
        self.enter(RemoteCall::Patch).await?;
        let mut state = self.state.lock();
        if let Some(previous) = state.patched.get(idempotency_key) {
            return Ok(previous.clone());
        }
        if let Some(op) = operations
            .iter()
            .find(|op| state.rejected_paths.contains(&op.path.to_pointer()))
        {
            return Err(RemoteError::Validation(format!(
                "value at {} was rejected",
                op.path
            )));
        }

        let entity = state
            .entities
            .get_mut(server_id)
            .ok_or_else(|| RemoteError::NotFound(server_id.to_string()))?;
        if token(server_id, entity.version) != concurrency_token {
            return Err(RemoteError::Conflict {
                server_id: server_id.to_string(),
            });
        }
        apply_ops(&mut entity.document, operations)
            .map_err(|e| RemoteError::Validation(e.to_string()))?;
        entity.version += 1;
        let result = revision(server_id, entity);

        state
            .patched
            .insert(idempotency_key.to_string(), result.clone());
        state.patch_log.push(PatchRecord {
            server_id: server_id.to_string(),
            section_key: section_key.to_string(),
            operations: operations.to_vec(),
            idempotency_key: idempotency_key.to_string(),
        });
        Ok(result)
    }

    async fn transition(
        &self,
        server_id: &str,
        transition_key: &str,
        concurrency_token: &str,
    ) -> Result<EntityRevision, RemoteError> {
        self.enter(RemoteCall::Transition).await?;
        let mut state = self.state.lock();
        let state = &mut *state;
        let entity = state
            .entities
            .get_mut(server_id)
            .ok_or_else(|| RemoteError::NotFound(server_id.to_string()))?;
        if token(server_id, entity.version) != concurrency_token {
            return Err(RemoteError::Conflict {
                server_id: server_id.to_string(),
            });
        }
        let target = state
            .transitions
            .get(&(entity.workflow_state.clone(), transition_key.to_string()))
            .ok_or_else(|| {
                RemoteError::Validation(format!(
                    "transition '{transition_key}' is not allowed from '{}'",
                    entity.workflow_state
                ))
            })?;
        entity.workflow_state = target.clone();
        entity.version += 1;
        Ok(revision(server_id, entity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::FieldPath;
    use serde_json::json;

    fn request(key: &str) -> CreateRequest {
        CreateRequest {
            form_type: "Inspection".into(),
            form_version: None,
            initial_payload: json!({"site": "A"}),
            idempotency_key: key.into(),
        }
    }

    fn set_n(n: i64) -> Vec<PatchOp> {
        vec![PatchOp::replace(FieldPath::root().field("n"), json!(n))]
    }

    #[tokio::test]
    async fn create_replay_returns_original_entity() {
        let remote = InMemoryRemote::new();
        let first = remote.create_entity(request("k1")).await.unwrap();
        let again = remote.create_entity(request("k1")).await.unwrap();
        assert_eq!(first, again);
        assert_eq!(remote.entity_count(), 1);
        assert_eq!(first.revision.workflow_state, "draft");
    }

    #[tokio::test]
    async fn patch_requires_current_token_and_replays_by_key() {
        let remote = InMemoryRemote::new();
        let created = remote.create_entity(request("k1")).await.unwrap();
        let t1 = created.revision.concurrency_token;

        let r1 = remote
            .apply_patch(&created.server_id, "general", &set_n(1), &t1, "p1")
            .await
            .unwrap();
        assert_ne!(r1.concurrency_token, t1);

        // Same key again: original result, not applied twice.
        let replay = remote
            .apply_patch(&created.server_id, "general", &set_n(1), &t1, "p1")
            .await
            .unwrap();
        assert_eq!(replay, r1);
        assert_eq!(remote.patch_log().len(), 1);

        let err = remote
            .apply_patch(&created.server_id, "general", &set_n(2), &t1, "p2")
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Conflict { .. }));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed_in_order() {
        let remote = InMemoryRemote::new();
        remote.fail_next(RemoteCall::Create, RemoteError::Transient("502".into()));
        assert!(remote.create_entity(request("k1")).await.is_err());
        assert!(remote.create_entity(request("k1")).await.is_ok());
        assert_eq!(remote.calls(RemoteCall::Create), 2);
    }

    #[tokio::test]
    async fn transitions_follow_the_allowed_table() {
        let remote = InMemoryRemote::new();
        remote.allow_transition("draft", "submit", "submitted");
        let created = remote.create_entity(request("k1")).await.unwrap();
        let token = created.revision.concurrency_token;

        let err = remote
            .transition(&created.server_id, "approve", &token)
            .await
            .unwrap_err();
        assert!(matches!(err, RemoteError::Validation(_)));

        let rev = remote
            .transition(&created.server_id, "submit", &token)
            .await
            .unwrap();
        assert_eq!(rev.workflow_state, "submitted");
    }
}
