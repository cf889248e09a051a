//! Durable key-value substrate for the fieldsync offline engine.
//!
//! Everything the engine must survive a restart with (instance records,
//! creation and patch queues, identifier mappings) is stored through the
//! [`KeyValueStore`] trait defined here.

pub mod conformance;
mod error;
mod file;
mod json;
mod memory;
mod traits;

pub use error::StorageError;
pub use file::FileStore;
pub use json::{get_json, set_json};
pub use memory::MemoryStore;
pub use traits::{KeyValueStore, WriteOp};
