//! Upload Module
//!
//! Moves file content into object storage:
//! - Single PUT for files below the chunk threshold
//! - Sequential multipart upload for everything else
//! - Per-file SSE-C key derived from the shared secret and the file's salt

pub mod plan;
pub mod store;

pub use plan::{plan_parts, PartSpec, MAX_PARTS};
pub use store::UploadStore;
