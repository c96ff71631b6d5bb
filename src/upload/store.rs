//! Upload Store
//!
//! Writes file content to object storage, choosing a single PUT or a
//! sequential multipart upload by size.

use std::io::Read;
use std::sync::Arc;

use zeroize::Zeroizing;

use crate::config::UploadConfig;
use crate::crypto::{CustomerKey, KdfParams};
use crate::error::{AppError, Result};
use crate::file::BackupFile;
use crate::fs::{FileReader, FileSystem};
use crate::storage::{ObjectRequest, ObjectStorage, PartTag, UploadedObject};

use super::plan::{plan_parts, PartSpec};

/// Uploads and deletes backed-up objects
#[derive(Clone)]
pub struct UploadStore {
    inner: Arc<UploadStoreInner>,
}

struct UploadStoreInner {
    backend: Arc<dyn ObjectStorage>,
    fs: Arc<dyn FileSystem>,
    config: UploadConfig,
    secret: Zeroizing<Vec<u8>>,
    kdf: KdfParams,
}

impl UploadStore {
    /// Create an upload store with the default key-derivation cost
    pub fn new(
        backend: Arc<dyn ObjectStorage>,
        fs: Arc<dyn FileSystem>,
        config: UploadConfig,
        secret: &[u8],
    ) -> Self {
        Self::with_kdf_params(backend, fs, config, secret, KdfParams::default())
    }

    /// Create with custom key-derivation cost
    pub fn with_kdf_params(
        backend: Arc<dyn ObjectStorage>,
        fs: Arc<dyn FileSystem>,
        config: UploadConfig,
        secret: &[u8],
        kdf: KdfParams,
    ) -> Self {
        Self {
            inner: Arc::new(UploadStoreInner {
                backend,
                fs,
                config,
                secret: Zeroizing::new(secret.to_vec()),
                kdf,
            }),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.inner.config
    }

    /// Upload the content at `file.local_path` to `file.bucket`/`file.key`
    pub async fn upload(&self, file: &BackupFile) -> Result<UploadedObject> {
        let config = &self.inner.config;
        config.validate()?;

        let stat = self.inner.fs.stat(file.path())?;
        let reader = self.inner.fs.open(file.path())?;
        let customer_key = self.customer_key(file).await?;

        let request = ObjectRequest {
            bucket: file.bucket.clone(),
            key: file.key.clone(),
            storage_class: file.storage_class.clone(),
            checksum_algorithm: config.checksum_algorithm,
            customer_key,
        };

        if stat.size == 0 || stat.size < config.chunk_threshold {
            let (_, body) = read_exact(reader, stat.size as usize).await?;
            let uploaded = self.inner.backend.put_object(&request, body).await?;

            tracing::debug!(
                path = %file.local_path.display(),
                key = %file.key,
                size = stat.size,
                "Uploaded object in a single request"
            );
            return Ok(uploaded);
        }

        let plan = plan_parts(stat.size, config.chunk_size)?;
        let upload_id = self.inner.backend.create_multipart_upload(&request).await?;

        match self.upload_parts(&request, &upload_id, reader, &plan).await {
            Ok(uploaded) => {
                tracing::debug!(
                    path = %file.local_path.display(),
                    key = %file.key,
                    size = stat.size,
                    parts = plan.len(),
                    "Uploaded object in parts"
                );
                Ok(uploaded)
            }
            Err(e) => {
                // Parts already stored would otherwise linger on the backend.
                if let Err(abort_err) = self
                    .inner
                    .backend
                    .abort_multipart_upload(&request, &upload_id)
                    .await
                {
                    tracing::warn!(
                        key = %request.key,
                        upload_id = %upload_id,
                        error = %abort_err,
                        "Failed to abort multipart upload, orphaned parts may remain"
                    );
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        request: &ObjectRequest,
        upload_id: &str,
        mut reader: FileReader,
        plan: &[PartSpec],
    ) -> Result<UploadedObject> {
        let mut tags: Vec<PartTag> = Vec::with_capacity(plan.len());

        for part in plan {
            let (next, body) = read_exact(reader, part.len as usize).await?;
            reader = next;

            let tag = self
                .inner
                .backend
                .upload_part(request, upload_id, part.part_number, body)
                .await?;

            tracing::trace!(
                key = %request.key,
                part_number = part.part_number,
                len = part.len,
                "Uploaded part"
            );
            tags.push(tag);
        }

        tags.sort_by_key(|t| t.part_number);
        self.inner
            .backend
            .complete_multipart_upload(request, upload_id, &tags)
            .await
    }

    /// Delete the backed-up object for `file`
    pub async fn delete(&self, file: &BackupFile) -> Result<()> {
        self.inner
            .backend
            .delete_object(&file.bucket, &file.key)
            .await?;

        tracing::debug!(bucket = %file.bucket, key = %file.key, "Deleted object");
        Ok(())
    }

    /// SSE-C key for `file`, derived from the shared secret and its salt
    pub async fn customer_key(&self, file: &BackupFile) -> Result<CustomerKey> {
        let salt = file.salt_bytes().filter(|s| !s.is_empty()).ok_or_else(|| {
            AppError::KeyDerivation(format!("no usable salt for {}", file.local_path.display()))
        })?;
        let algorithm = file.encryption_algorithm;
        let inner = self.inner.clone();

        // Argon2 at 64 MiB is too heavy for a runtime thread.
        tokio::task::spawn_blocking(move || -> Result<CustomerKey> {
            let key = inner.kdf.derive(&inner.secret, &salt, algorithm.key_len())?;
            Ok(CustomerKey::new(algorithm, &key))
        })
        .await?
    }
}

/// Read exactly `len` bytes off a blocking thread, handing the reader back
async fn read_exact(mut reader: FileReader, len: usize) -> Result<(FileReader, Vec<u8>)> {
    tokio::task::spawn_blocking(move || -> Result<(FileReader, Vec<u8>)> {
        let mut buf = vec![0u8; len];
        reader.read_exact(&mut buf)?;
        Ok((reader, buf))
    })
    .await?
}
