//! Shared test doubles for unit and integration tests.
//!
//! `MemoryStorage` keeps objects in memory and records every backend call;
//! `CountingFileSystem` wraps the local disk, counts content reads and lets a
//! test pin the ctime reported for a path.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::crypto::compute_hash;
use crate::error::{AppError, Result, StorageError};
use crate::fs::{FileReader, FileStat, FileSystem, FsEntry, LocalFileSystem};
use crate::storage::{ObjectRequest, ObjectStorage, PartTag, UploadedObject};

/// Initialise a tracing subscriber for tests.
///
/// Respects `RUST_LOG`, defaults to `debug`. Safe to call multiple times.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

/// One recorded backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCall {
    PutObject { bucket: String, key: String, size: usize },
    CreateMultipartUpload { bucket: String, key: String },
    UploadPart { key: String, upload_id: String, part_number: i32, size: usize },
    CompleteMultipartUpload { key: String, upload_id: String, part_numbers: Vec<i32> },
    AbortMultipartUpload { key: String, upload_id: String },
    DeleteObject { bucket: String, key: String },
}

/// In-memory object store
#[derive(Default)]
pub struct MemoryStorage {
    calls: Mutex<Vec<StorageCall>>,
    objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    uploads: Mutex<HashMap<String, BTreeMap<i32, Vec<u8>>>>,
    requests: Mutex<Vec<ObjectRequest>>,
    fail_part: Mutex<Option<i32>>,
    fail_puts: Mutex<bool>,
    unversioned: Mutex<bool>,
    sequence: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `upload_part` fail for the given part number
    pub fn fail_on_part(&self, part_number: i32) {
        *self.fail_part.lock() = Some(part_number);
    }

    /// Make every `put_object` fail
    pub fn fail_puts(&self, fail: bool) {
        *self.fail_puts.lock() = fail;
    }

    /// Behave like a bucket without versioning: no version id is returned
    pub fn set_unversioned(&self, unversioned: bool) {
        *self.unversioned.lock() = unversioned;
    }

    pub fn calls(&self) -> Vec<StorageCall> {
        self.calls.lock().clone()
    }

    /// Every object request seen, in call order
    pub fn requests(&self) -> Vec<ObjectRequest> {
        self.requests.lock().clone()
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn put_count(&self) -> usize {
        self.count(|c| matches!(c, StorageCall::PutObject { .. }))
    }

    pub fn multipart_count(&self) -> usize {
        self.count(|c| matches!(c, StorageCall::CreateMultipartUpload { .. }))
    }

    pub fn part_count(&self) -> usize {
        self.count(|c| matches!(c, StorageCall::UploadPart { .. }))
    }

    fn count(&self, pred: impl Fn(&StorageCall) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    fn record(&self, call: StorageCall) {
        self.calls.lock().push(call);
    }

    fn next_version(&self) -> String {
        format!("v{}", self.sequence.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn store(&self, request: &ObjectRequest, data: Vec<u8>) -> UploadedObject {
        let etag = format!("\"{}\"", &compute_hash(&data)[..32]);
        self.objects
            .lock()
            .insert((request.bucket.clone(), request.key.clone()), data);
        let version_id = if *self.unversioned.lock() {
            None
        } else {
            Some(self.next_version())
        };
        UploadedObject { etag, version_id }
    }
}

#[async_trait::async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put_object(&self, request: &ObjectRequest, body: Vec<u8>) -> Result<UploadedObject> {
        self.requests.lock().push(request.clone());
        self.record(StorageCall::PutObject {
            bucket: request.bucket.clone(),
            key: request.key.clone(),
            size: body.len(),
        });
        if *self.fail_puts.lock() {
            return Err(StorageError::SdkError("injected put failure".to_string()).into());
        }
        Ok(self.store(request, body))
    }

    async fn create_multipart_upload(&self, request: &ObjectRequest) -> Result<String> {
        self.requests.lock().push(request.clone());
        self.record(StorageCall::CreateMultipartUpload {
            bucket: request.bucket.clone(),
            key: request.key.clone(),
        });
        let upload_id = format!("upload-{}", self.sequence.fetch_add(1, Ordering::SeqCst) + 1);
        self.uploads.lock().insert(upload_id.clone(), BTreeMap::new());
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        request: &ObjectRequest,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<PartTag> {
        self.record(StorageCall::UploadPart {
            key: request.key.clone(),
            upload_id: upload_id.to_string(),
            part_number,
            size: body.len(),
        });
        if *self.fail_part.lock() == Some(part_number) {
            return Err(StorageError::SdkError(format!("injected failure on part {}", part_number)).into());
        }

        let etag = format!("\"part-{}-{}\"", part_number, &compute_hash(&body)[..16]);
        let mut uploads = self.uploads.lock();
        let parts = uploads
            .get_mut(upload_id)
            .ok_or_else(|| StorageError::ObjectNotFound(upload_id.to_string()))?;
        parts.insert(part_number, body);

        Ok(PartTag {
            part_number,
            etag,
            checksum: None,
        })
    }

    async fn complete_multipart_upload(
        &self,
        request: &ObjectRequest,
        upload_id: &str,
        parts: &[PartTag],
    ) -> Result<UploadedObject> {
        self.record(StorageCall::CompleteMultipartUpload {
            key: request.key.clone(),
            upload_id: upload_id.to_string(),
            part_numbers: parts.iter().map(|p| p.part_number).collect(),
        });

        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(StorageError::SdkError("parts must be in ascending order".to_string()).into());
        }

        let uploaded = self
            .uploads
            .lock()
            .remove(upload_id)
            .ok_or_else(|| StorageError::ObjectNotFound(upload_id.to_string()))?;

        let mut data = Vec::new();
        for part in parts {
            let chunk = uploaded.get(&part.part_number).ok_or_else(|| {
                AppError::Storage(StorageError::SdkError(format!("missing part {}", part.part_number)))
            })?;
            data.extend_from_slice(chunk);
        }

        Ok(self.store(request, data))
    }

    async fn abort_multipart_upload(&self, request: &ObjectRequest, upload_id: &str) -> Result<()> {
        self.record(StorageCall::AbortMultipartUpload {
            key: request.key.clone(),
            upload_id: upload_id.to_string(),
        });
        self.uploads.lock().remove(upload_id);
        Ok(())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> Result<()> {
        self.record(StorageCall::DeleteObject {
            bucket: bucket.to_string(),
            key: key.to_string(),
        });
        self.objects.lock().remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }
}

/// Local filesystem that counts content reads and can pin ctimes
#[derive(Default)]
pub struct CountingFileSystem {
    inner: LocalFileSystem,
    opens: AtomicUsize,
    ctimes: Mutex<HashMap<PathBuf, i64>>,
}

impl CountingFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `ctime` for `path` instead of the on-disk value
    pub fn set_ctime(&self, path: impl Into<PathBuf>, ctime: i64) {
        self.ctimes.lock().insert(path.into(), ctime);
    }

    /// Number of `open` calls so far
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl FileSystem for CountingFileSystem {
    fn walk(&self, root: &Path) -> Box<dyn Iterator<Item = Result<FsEntry>> + Send> {
        self.inner.walk(root)
    }

    fn stat(&self, path: &Path) -> Result<FileStat> {
        let mut stat = self.inner.stat(path)?;
        if let Some(ctime) = self.ctimes.lock().get(path) {
            stat.ctime = *ctime;
        }
        Ok(stat)
    }

    fn open(&self, path: &Path) -> Result<FileReader> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.inner.open(path)
    }

    fn exists(&self, path: &Path) -> bool {
        self.inner.exists(path)
    }
}
