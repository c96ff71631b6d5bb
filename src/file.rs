//! In-memory unit of work for one backed-up path

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::crypto::EncryptionAlgorithm;

/// A local file and what is known about its backed-up copy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupFile {
    /// Registry row id; empty until the file is registered
    pub id: String,

    /// Object key in the bucket. Stable across versions at the same path.
    pub key: String,

    pub local_path: PathBuf,

    /// Lowercase hex content checksum
    pub checksum: String,

    /// Filesystem change time, nanoseconds since the epoch
    pub ctime: i64,

    pub bucket: String,
    pub storage_class: String,
    pub etag: String,

    /// Backend version id, or the ETag for unversioned buckets
    pub version: String,

    pub created_at: DateTime<Utc>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,

    /// Hex-encoded KDF salt for this version's encryption key
    pub salt: String,
    pub encryption_algorithm: EncryptionAlgorithm,
}

impl BackupFile {
    /// Start a new unit of work for `local_path`, not yet uploaded
    pub fn new(local_path: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            key: String::new(),
            local_path: local_path.into(),
            checksum: String::new(),
            ctime: 0,
            bucket: bucket.into(),
            storage_class: "STANDARD".to_string(),
            etag: String::new(),
            version: String::new(),
            created_at: Utc::now(),
            uploaded_at: None,
            deleted_at: None,
            salt: String::new(),
            encryption_algorithm: EncryptionAlgorithm::Aes256,
        }
    }

    /// Fresh object key for a path seen for the first time
    pub fn generate_key() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn path(&self) -> &Path {
        &self.local_path
    }

    /// Path as stored in the registry
    pub fn path_str(&self) -> String {
        self.local_path.to_string_lossy().into_owned()
    }

    pub fn is_uploaded(&self) -> bool {
        self.uploaded_at.is_some()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Decoded salt bytes
    pub fn salt_bytes(&self) -> Option<Vec<u8>> {
        hex::decode(&self.salt).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_file_is_pending() {
        let file = BackupFile::new("/data/a.txt", "bucket");
        assert!(!file.is_uploaded());
        assert!(!file.is_deleted());
        assert!(file.id.is_empty());
        assert_eq!(file.path_str(), "/data/a.txt");
    }

    #[test]
    fn test_generated_keys_are_unique() {
        assert_ne!(BackupFile::generate_key(), BackupFile::generate_key());
    }

    #[test]
    fn test_salt_bytes_roundtrip() {
        let mut file = BackupFile::new("/x", "b");
        file.salt = hex::encode([1u8, 2, 3]);
        assert_eq!(file.salt_bytes(), Some(vec![1, 2, 3]));
        file.salt = "zz".to_string();
        assert_eq!(file.salt_bytes(), None);
    }
}
