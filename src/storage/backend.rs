//! Object-storage capability set

use crate::error::Result;

use super::types::{ObjectRequest, PartTag, UploadedObject};

/// Trait for object storage backends
#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload a whole object in one request
    async fn put_object(&self, request: &ObjectRequest, body: Vec<u8>) -> Result<UploadedObject>;

    /// Start a multipart upload and return its upload id
    async fn create_multipart_upload(&self, request: &ObjectRequest) -> Result<String>;

    /// Upload one part of a multipart upload
    async fn upload_part(
        &self,
        request: &ObjectRequest,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<PartTag>;

    /// Assemble the uploaded parts. `parts` must be ordered by part number.
    async fn complete_multipart_upload(
        &self,
        request: &ObjectRequest,
        upload_id: &str,
        parts: &[PartTag],
    ) -> Result<UploadedObject>;

    /// Discard an unfinished multipart upload and its parts
    async fn abort_multipart_upload(&self, request: &ObjectRequest, upload_id: &str) -> Result<()>;

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()>;
}
