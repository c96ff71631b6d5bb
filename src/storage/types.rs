//! Storage types

use crate::crypto::{ChecksumAlgorithm, CustomerKey};

/// Parameters shared by every write against one object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRequest {
    pub bucket: String,
    pub key: String,
    pub storage_class: String,
    pub checksum_algorithm: ChecksumAlgorithm,
    pub customer_key: CustomerKey,
}

/// Result of a completed single-shot or multipart upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedObject {
    pub etag: String,
    /// Present only for versioned buckets
    pub version_id: Option<String>,
}

impl UploadedObject {
    /// Version recorded in the registry: the backend version id, falling
    /// back to the ETag for unversioned buckets
    pub fn version(&self) -> String {
        self.version_id.clone().unwrap_or_else(|| self.etag.clone())
    }
}

/// Tag returned for one uploaded part, submitted again on completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartTag {
    /// 1-based part number
    pub part_number: i32,
    pub etag: String,
    /// Backend-computed part checksum, echoed back on completion
    pub checksum: Option<String>,
}
