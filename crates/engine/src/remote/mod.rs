//! Boundary to the authoritative remote store.
//!
//! The transport (HTTP client, auth, retries at the socket level) lives
//! outside the engine; it only has to provide the four typed calls of
//! [`RemoteStore`] and signal failures through [`RemoteError`].

mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::patch::PatchOp;

pub use memory::{InMemoryRemote, PatchRecord, RemoteCall};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The presented concurrency token is not the current one.
    #[error("concurrency token for {server_id} is stale")]
    Conflict { server_id: String },

    /// Network or server unavailability.
    #[error("remote unavailable: {0}")]
    Transient(String),

    /// Business-rule rejection. Not retried automatically.
    #[error("rejected: {0}")]
    Validation(String),

    #[error("unknown entity {0}")]
    NotFound(String),
}

/// Server state after a successful write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRevision {
    pub concurrency_token: String,
    pub version: i64,
    pub workflow_state: String,
    pub document: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedEntity {
    pub server_id: String,
    #[serde(flatten)]
    pub revision: EntityRevision,
}

/// Full authoritative read of one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteEntity {
    #[serde(flatten)]
    pub revision: EntityRevision,
    pub form_type: String,
    pub form_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    pub form_type: String,
    pub form_version: Option<String>,
    pub initial_payload: Value,
    pub idempotency_key: String,
}

/// Typed calls the engine needs from the network boundary.
///
/// Mutating calls carry an idempotency key. Replaying a call with a key
/// the server has already seen must return the original result instead of
/// applying it again or failing.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn create_entity(&self, request: CreateRequest) -> Result<CreatedEntity, RemoteError>;

    async fn get_entity(&self, server_id: &str) -> Result<RemoteEntity, RemoteError>;

    /// Conditional write: fails with [`RemoteError::Conflict`] when
    /// `concurrency_token` is not current.
    async fn apply_patch(
        &self,
        server_id: &str,
        section_key: &str,
        operations: &[PatchOp],
        concurrency_token: &str,
        idempotency_key: &str,
    ) -> Result<EntityRevision, RemoteError>;

    async fn transition(
        &self,
        server_id: &str,
        transition_key: &str,
        concurrency_token: &str,
    ) -> Result<EntityRevision, RemoteError>;
}

/// A remote that is never reachable.
///
/// Lets the engine run fully offline: every call is transient, so work
/// stays queued.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disconnected;

#[async_trait]
impl RemoteStore for Disconnected {
    async fn create_entity(&self, _request: CreateRequest) -> Result<CreatedEntity, RemoteError> {
        Err(offline())
    }

    async fn get_entity(&self, _server_id: &str) -> Result<RemoteEntity, RemoteError> {
        Err(offline())
    }

    async fn apply_patch(
        &self,
        _server_id: &str,
        _section_key: &str,
        _operations: &[PatchOp],
        _concurrency_token: &str,
        _idempotency_key: &str,
    ) -> Result<EntityRevision, RemoteError> {
        Err(offline())
    }

    async fn transition(
        &self,
        _server_id: &str,
        _transition_key: &str,
        _concurrency_token: &str,
    ) -> Result<EntityRevision, RemoteError> {
        Err(offline())
    }
}

fn offline() -> RemoteError {
    RemoteError::Transient("no connection".to_string())
}
