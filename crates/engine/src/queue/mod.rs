//! Durable ordered queues: one creation queue, one patch queue per entity.

mod create;
mod patch;

pub use create::CreationQueue;
pub use patch::PatchQueue;
