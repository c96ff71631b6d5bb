//! File Processor
//!
//! Decides per path whether content must be uploaded:
//! - unchanged ctime: reuse the registered version without reading the file
//! - changed ctime, same checksum: reuse the registered version
//! - otherwise upload under the path's stable key and register the version

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

use crate::config::DirectoryConfig;
use crate::crypto::{compute_checksum, generate_salt};
use crate::error::Result;
use crate::file::BackupFile;
use crate::fs::FileSystem;
use crate::registry::Registry;
use crate::upload::UploadStore;

/// Work applied to every regular file found by a scan
#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, path: &Path) -> Result<BackupFile>;
}

/// Deduplicating backup of single files into one bucket
pub struct FileProcessor {
    fs: Arc<dyn FileSystem>,
    registry: Arc<dyn Registry>,
    store: UploadStore,
    bucket: String,
    storage_class: String,
}

impl FileProcessor {
    pub fn new(
        fs: Arc<dyn FileSystem>,
        registry: Arc<dyn Registry>,
        store: UploadStore,
        directory: &DirectoryConfig,
    ) -> Self {
        Self {
            fs,
            registry,
            store,
            bucket: directory.bucket.clone(),
            storage_class: directory.storage_class.clone(),
        }
    }

    /// Content checksum with the configured algorithm, read off a blocking thread
    async fn checksum(&self, path: &Path) -> Result<String> {
        let reader = self.fs.open(path)?;
        let algorithm = self.store.config().checksum_algorithm;
        let checksum = tokio::task::spawn_blocking(move || compute_checksum(algorithm, reader)).await??;
        Ok(checksum)
    }

    /// Remove backed-up objects whose local file under `root` no longer
    /// exists. Returns how many were deleted.
    pub async fn propagate_deletions(&self, root: &Path) -> Result<usize> {
        let live = self.registry.list_live(root).await?;
        let mut deleted = 0;

        for file in live {
            if self.fs.exists(file.path()) {
                continue;
            }

            if let Err(e) = self.delete(&file).await {
                tracing::warn!(path = %file.local_path.display(), error = %e, "Failed to propagate deletion");
                continue;
            }
            deleted += 1;
        }

        if deleted > 0 {
            tracing::info!("Propagated {} deletions under {}", deleted, root.display());
        }
        Ok(deleted)
    }

    /// Return a reusable prior version, stamping `uploaded_at` if an earlier
    /// run registered it but stopped before marking it uploaded.
    /// Rows are only registered after their content reached the backend.
    async fn complete(&self, prior: &BackupFile) -> Result<BackupFile> {
        if prior.is_uploaded() {
            return Ok(prior.clone());
        }

        tracing::info!(path = %prior.local_path.display(), id = %prior.id, "Completing interrupted registration");
        self.registry.mark_file_upload_uploaded(prior).await
    }

    async fn delete(&self, file: &BackupFile) -> Result<()> {
        self.store.delete(file).await?;
        self.registry.mark_file_upload_deleted(file).await?;
        tracing::debug!(path = %file.local_path.display(), key = %file.key, "Deleted backed-up file");
        Ok(())
    }
}

#[async_trait]
impl Processor for FileProcessor {
    async fn process(&self, path: &Path) -> Result<BackupFile> {
        let stat = self.fs.stat(path)?;
        let prior = self.registry.fetch_latest(path).await?;
        // A deleted version still lends its key to the path
        let live_prior = prior.as_ref().filter(|p| !p.is_deleted());

        if let Some(prior) = live_prior {
            if prior.ctime == stat.ctime {
                tracing::trace!(path = %path.display(), "Unchanged since last backup");
                return self.complete(prior).await;
            }
        }

        let checksum = self.checksum(path).await?;
        if let Some(prior) = live_prior {
            if prior.checksum == checksum {
                tracing::debug!(path = %path.display(), "Content unchanged, skipping upload");
                return self.complete(prior).await;
            }
        }

        let config = self.store.config();
        let mut file = BackupFile::new(path, self.bucket.clone());
        file.key = prior
            .as_ref()
            .map(|p| p.key.clone())
            .unwrap_or_else(BackupFile::generate_key);
        file.checksum = checksum;
        file.ctime = stat.ctime;
        file.storage_class = self.storage_class.clone();
        file.salt = hex::encode(generate_salt());
        file.encryption_algorithm = config.encryption_algorithm;

        let uploaded = self.store.upload(&file).await?;
        file.etag = uploaded.etag.clone();
        file.version = uploaded.version();

        let registered = self.registry.register_file_upload(&file).await?;
        let file = self.registry.mark_file_upload_uploaded(&registered).await?;

        tracing::info!(
            path = %path.display(),
            key = %file.key,
            version = %file.version,
            size = stat.size,
            "Backed up file"
        );
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UploadConfig;
    use crate::crypto::KdfParams;
    use crate::registry::{create_request_id, SqliteRegistry};
    use crate::testing::{CountingFileSystem, MemoryStorage, StorageCall};
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct Harness {
        _db_dir: TempDir,
        root: TempDir,
        fs: Arc<CountingFileSystem>,
        backend: Arc<MemoryStorage>,
        registry: Arc<SqliteRegistry>,
        processor: FileProcessor,
    }

    impl Harness {
        async fn new() -> Self {
            let db_dir = TempDir::new().unwrap();
            let root = TempDir::new().unwrap();
            let url = format!("sqlite://{}", db_dir.path().join("registry.db").display());
            let registry = Arc::new(SqliteRegistry::connect(&url).await.unwrap());
            let fs = Arc::new(CountingFileSystem::new());
            let backend = Arc::new(MemoryStorage::new());

            let store = UploadStore::with_kdf_params(
                backend.clone(),
                fs.clone(),
                UploadConfig::new().with_chunk_threshold(1024).with_chunk_size(512),
                b"secret",
                KdfParams {
                    time_cost: 1,
                    memory_kib: 64,
                    parallelism: 1,
                },
            );
            let directory = DirectoryConfig {
                local_path: root.path().to_path_buf(),
                bucket: "backups".to_string(),
                storage_class: "STANDARD_IA".to_string(),
            };
            let processor = FileProcessor::new(fs.clone(), registry.clone(), store, &directory);

            Self {
                _db_dir: db_dir,
                root,
                fs,
                backend,
                registry,
                processor,
            }
        }

        fn write(&self, name: &str, content: &[u8]) -> PathBuf {
            let path = self.root.path().join(name);
            std::fs::write(&path, content).unwrap();
            path
        }
    }

    #[tokio::test]
    async fn test_new_file_is_uploaded_and_registered() {
        let h = Harness::new().await;
        let path = h.write("a.txt", b"hello");

        let file = h.processor.process(&path).await.unwrap();

        assert!(file.is_uploaded());
        assert!(!file.key.is_empty());
        assert_eq!(file.bucket, "backups");
        assert_eq!(file.storage_class, "STANDARD_IA");
        let expected = compute_checksum(UploadConfig::default().checksum_algorithm, &b"hello"[..]).unwrap();
        assert_eq!(file.checksum, expected);
        assert_eq!(h.fs.opens(), 2);
        assert_eq!(h.backend.put_count(), 1);
        assert_eq!(h.backend.object("backups", &file.key).unwrap(), b"hello");

        let latest = h.registry.fetch_latest(&path).await.unwrap().unwrap();
        assert_eq!(latest, file);
    }

    #[tokio::test]
    async fn test_unchanged_ctime_skips_read() {
        let h = Harness::new().await;
        let path = h.write("a.txt", b"hello");

        let first = h.processor.process(&path).await.unwrap();
        let opens = h.fs.opens();
        let second = h.processor.process(&path).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(h.fs.opens(), opens);
        assert_eq!(h.backend.put_count(), 1);
    }

    #[tokio::test]
    async fn test_same_content_with_new_ctime_skips_upload() {
        let h = Harness::new().await;
        let path = h.write("a.txt", b"hello");

        let first = h.processor.process(&path).await.unwrap();
        h.fs.set_ctime(&path, first.ctime + 1);
        let opens = h.fs.opens();

        let second = h.processor.process(&path).await.unwrap();

        assert_eq!(second.id, first.id);
        assert_eq!(h.fs.opens(), opens + 1);
        assert_eq!(h.backend.put_count(), 1);
    }

    #[tokio::test]
    async fn test_changed_content_keeps_key() {
        let h = Harness::new().await;
        let path = h.write("a.txt", b"hello");

        let first = h.processor.process(&path).await.unwrap();
        h.write("a.txt", b"hello, world");
        h.fs.set_ctime(&path, first.ctime + 1);

        let second = h.processor.process(&path).await.unwrap();

        assert_eq!(second.key, first.key);
        assert_ne!(second.id, first.id);
        assert_ne!(second.salt, first.salt);
        assert_ne!(second.checksum, first.checksum);
        assert_eq!(h.backend.put_count(), 2);
        assert_eq!(h.backend.object("backups", &first.key).unwrap(), b"hello, world");
    }

    #[tokio::test]
    async fn test_large_file_goes_multipart() {
        let h = Harness::new().await;
        let path = h.write("big.bin", &vec![7u8; 1300]);

        let file = h.processor.process(&path).await.unwrap();

        assert_eq!(h.backend.put_count(), 0);
        assert_eq!(h.backend.multipart_count(), 1);
        assert_eq!(h.backend.part_count(), 3);
        assert_eq!(h.backend.object("backups", &file.key).unwrap().len(), 1300);
    }

    #[tokio::test]
    async fn test_failed_upload_registers_nothing() {
        let h = Harness::new().await;
        let path = h.write("a.txt", b"hello");
        h.backend.fail_puts(true);

        assert!(h.processor.process(&path).await.is_err());
        assert!(h.registry.fetch_latest(&path).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_file_is_error() {
        let h = Harness::new().await;
        let path = h.root.path().join("gone.txt");

        assert!(h.processor.process(&path).await.is_err());
        assert!(h.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn test_propagate_deletions() {
        let h = Harness::new().await;
        let keep = h.write("keep.txt", b"keep");
        let gone = h.write("gone.txt", b"gone");

        h.processor.process(&keep).await.unwrap();
        let removed = h.processor.process(&gone).await.unwrap();
        std::fs::remove_file(&gone).unwrap();

        let deleted = h.processor.propagate_deletions(h.root.path()).await.unwrap();

        assert_eq!(deleted, 1);
        assert!(h.backend.calls().contains(&StorageCall::DeleteObject {
            bucket: "backups".to_string(),
            key: removed.key.clone(),
        }));
        let latest = h.registry.fetch_latest(&gone).await.unwrap().unwrap();
        assert!(latest.is_deleted());

        let live = h.registry.list_live(h.root.path()).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].local_path, keep);

        assert_eq!(h.processor.propagate_deletions(h.root.path()).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recreated_file_reuses_deleted_key() {
        let h = Harness::new().await;
        let path = h.write("a.txt", b"hello");

        let first = h.processor.process(&path).await.unwrap();
        std::fs::remove_file(&path).unwrap();
        h.processor.propagate_deletions(h.root.path()).await.unwrap();

        h.write("a.txt", b"hello");
        h.fs.set_ctime(&path, first.ctime);
        let second = h.processor.process(&path).await.unwrap();

        assert_eq!(second.key, first.key);
        assert_ne!(second.id, first.id);
        assert!(!second.is_deleted());
        assert_eq!(h.backend.put_count(), 2);
    }

    /// Register `path` as an earlier run would have, without marking it uploaded
    async fn register_unmarked(h: &Harness, path: &Path) -> BackupFile {
        let stat = h.fs.stat(path).unwrap();
        let content = std::fs::read(path).unwrap();
        let mut file = BackupFile::new(path, "backups");
        file.key = BackupFile::generate_key();
        file.checksum = compute_checksum(UploadConfig::default().checksum_algorithm, &content[..]).unwrap();
        file.ctime = stat.ctime;
        file.salt = hex::encode(generate_salt());
        file.etag = "\"etag-1\"".to_string();
        file.version = "v1".to_string();
        h.registry.register_file_upload(&file).await.unwrap()
    }

    #[tokio::test]
    async fn test_unchanged_file_completes_interrupted_registration() {
        let h = Harness::new().await;
        let path = h.write("a.txt", b"hello");
        let registered = register_unmarked(&h, &path).await;
        assert!(!registered.is_uploaded());

        let file = h.processor.process(&path).await.unwrap();

        assert_eq!(file.id, registered.id);
        assert!(file.is_uploaded());
        assert_eq!(h.backend.put_count(), 0);
        assert!(h
            .registry
            .get_uploaded_file_upload(&registered.id)
            .await
            .unwrap()
            .is_some());

        // Later runs see the completed row and leave it alone
        let again = h.processor.process(&path).await.unwrap();
        assert_eq!(again.id, registered.id);
        assert!(again.is_uploaded());
        assert_eq!(h.backend.put_count(), 0);
    }

    #[tokio::test]
    async fn test_same_checksum_completes_interrupted_registration() {
        let h = Harness::new().await;
        let path = h.write("a.txt", b"hello");
        let registered = register_unmarked(&h, &path).await;
        h.fs.set_ctime(&path, registered.ctime + 1);

        let file = h.processor.process(&path).await.unwrap();

        assert_eq!(file.id, registered.id);
        assert!(file.is_uploaded());
        assert_eq!(h.backend.put_count(), 0);
        assert!(h
            .registry
            .get_uploaded_file_upload(&registered.id)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_unversioned_bucket_uses_etag_as_version() {
        let h = Harness::new().await;
        h.backend.set_unversioned(true);
        let path = h.write("a.txt", b"hello");

        let first = h.processor.process(&path).await.unwrap();
        assert_eq!(first.version, first.etag);
        assert_eq!(first.id, create_request_id(&first.path_str(), &first.etag));

        h.write("a.txt", b"hello again");
        h.fs.set_ctime(&path, first.ctime + 1);
        let second = h.processor.process(&path).await.unwrap();

        assert_ne!(second.etag, first.etag);
        assert_eq!(second.version, second.etag);
        assert_eq!(second.id, create_request_id(&second.path_str(), &second.etag));
        assert_eq!(second.key, first.key);
        assert!(second.is_uploaded());
        assert_eq!(h.backend.put_count(), 2);

        let latest = h.registry.fetch_latest(&path).await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
    }
}
