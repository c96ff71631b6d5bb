//! Coldvault
//!
//! Encrypted, deduplicating backup of local directory trees into
//! S3-compatible object storage. The binary in main.rs wires these modules
//! together; the library is exposed for integration tests.
//!
//! # Modules
//!
//! - `scanner`: parallel directory walk feeding a worker pool
//! - `processor`: per-file change detection and backup
//! - `registry`: SQLite record of every backed-up version
//! - `upload`: single-shot and multipart uploads with SSE-C keys
//! - `storage`: object storage seam and its S3 implementation
//! - `crypto`: checksums and per-file key derivation

pub mod config;
pub mod crypto;
pub mod error;
pub mod file;
pub mod fs;
pub mod processor;
pub mod registry;
pub mod scanner;
pub mod storage;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod upload;

pub use error::{AppError, Result};
pub use file::BackupFile;
