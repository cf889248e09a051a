//! Offline synchronization engine for structured field forms.
//!
//! Edits are coalesced per entity, queued durably, and reconciled with an
//! authoritative remote store through conditional writes once connectivity
//! returns. Entities created offline carry temporary identifiers until the
//! server assigns permanent ones.

pub mod coalescer;
pub mod config;
pub mod driver;
mod engine;
pub mod error;
pub mod instance_store;
mod keys;
pub mod model;
pub mod patch;
pub mod path;
pub mod queue;
pub mod remapper;
pub mod remote;
pub mod replica;
pub mod schema;

pub use coalescer::{EditableSections, PatchCoalescer};
pub use config::{ConfigError, EngineConfig};
pub use driver::{DrainOutcome, SyncDriver, SyncPhase, SyncReport, SyncState, Trigger};
pub use engine::{SaveOutcome, SyncEngine};
pub use error::{EngineError, ErrorKind};
pub use model::{CreateJob, Instance, InstanceDocument, LocalInstanceMeta, NewInstance, PatchJob};
pub use patch::{OpKind, PatchError, PatchOp};
pub use path::{FieldPath, PathToken};
pub use remote::{Disconnected, InMemoryRemote, RemoteCall, RemoteError, RemoteStore};
pub use schema::{FormSchema, SchemaError, StructuralOp};
