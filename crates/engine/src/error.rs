use fieldsync_storage::StorageError;

use crate::patch::PatchError;
use crate::remote::RemoteError;
use crate::schema::SchemaError;

/// Where an error sits in the recovery taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Stale concurrency token. Recovered by re-fetching.
    Conflict,
    /// Network or server unavailability. Retried on the next trigger.
    Transient,
    /// Business-rule rejection. Needs a user edit before it is retried.
    Validation,
    /// Local bookkeeping contradicts the protocol (rekey collision, etc.).
    ProtocolViolation,
    /// Local storage, schema, or patch errors.
    Local,
}

/// All errors surfaced by the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("conflict on {entity_id}: concurrency token is stale")]
    Conflict { entity_id: String },

    #[error("remote unavailable: {0}")]
    Transient(String),

    #[error("validation failed for {entity_id}: {message}")]
    Validation { entity_id: String, message: String },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("instance {0} has not been created on the server yet")]
    NotCreated(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Patch(#[from] PatchError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Conflict { .. } => ErrorKind::Conflict,
            EngineError::Transient(_) | EngineError::NotCreated(_) => ErrorKind::Transient,
            EngineError::Validation { .. } => ErrorKind::Validation,
            EngineError::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            EngineError::NotFound(_)
            | EngineError::Storage(_)
            | EngineError::Schema(_)
            | EngineError::Patch(_) => ErrorKind::Local,
        }
    }

    /// Attach entity context to a remote failure.
    pub fn from_remote(entity_id: &str, err: RemoteError) -> Self {
        match err {
            RemoteError::Conflict { .. } => EngineError::Conflict {
                entity_id: entity_id.to_string(),
            },
            RemoteError::Transient(msg) => EngineError::Transient(msg),
            RemoteError::Validation(message) => EngineError::Validation {
                entity_id: entity_id.to_string(),
                message,
            },
            RemoteError::NotFound(id) => {
                EngineError::ProtocolViolation(format!("server does not know entity {id}"))
            }
        }
    }
}
