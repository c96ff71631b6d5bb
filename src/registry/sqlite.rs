//! SQLite-backed registry

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::future::Future;
use std::path::{Path, MAIN_SEPARATOR};
use std::time::Duration;

use super::session::RegistrySession;
use super::types::{create_request_id, deleted_request_id, now, uploaded_request_id, ChangeType};
use super::{create_pool, Registry};
use crate::error::{AppError, Result};
use crate::file::BackupFile;

/// Attempts per operation before a contended transaction gives up
const MAX_ATTEMPTS: u32 = 8;

/// Registry over a SQLite pool
#[derive(Clone)]
pub struct SqliteRegistry {
    pool: SqlitePool,
}

impl SqliteRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (and initialize) the database at `database_url`
    pub async fn connect(database_url: &str) -> Result<Self> {
        Ok(Self::new(create_pool(database_url).await?))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run one transactional unit, rerunning it while it loses races
    async fn retry<T, F, Fut>(&self, operation: &'static str, mut unit: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match unit().await {
                Err(e) if attempt < MAX_ATTEMPTS && is_contention(&e) => {
                    tracing::debug!(operation, attempt, error = %e, "Registry transaction contended, retrying");
                    tokio::time::sleep(Duration::from_millis(10 * u64::from(attempt))).await;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    async fn register_once(&self, file: &BackupFile) -> Result<BackupFile> {
        let request_id = create_request_id(&file.path_str(), &file.version);
        let mut session = RegistrySession::begin(&self.pool).await?;

        if let Some(existing) = session.fetch_by_request_id(&request_id).await? {
            return match existing.change_type {
                ChangeType::Create => Ok(existing.file),
                other => Err(AppError::InvalidRequestId {
                    request_id,
                    existing: other.to_string(),
                }),
            };
        }

        let mut row = file.clone();
        row.id = request_id.clone();
        row.created_at = now();
        row.uploaded_at = None;
        row.deleted_at = None;

        session.insert_row(&row).await?;
        session.insert_history(&request_id, ChangeType::Create, &row).await?;
        session.commit().await?;

        tracing::debug!(id = %row.id, path = %row.local_path.display(), "Registered file version");
        Ok(row)
    }

    /// Record `change_type` for a registered file under `request_id`
    pub(crate) async fn record_transition(
        &self,
        file: &BackupFile,
        request_id: &str,
        change_type: ChangeType,
    ) -> Result<BackupFile> {
        self.retry(change_type.as_str(), move || {
            self.transition_once(file, request_id, change_type)
        })
        .await
    }

    async fn transition_once(
        &self,
        file: &BackupFile,
        request_id: &str,
        change_type: ChangeType,
    ) -> Result<BackupFile> {
        if file.id.is_empty() {
            return Err(AppError::NotFound(format!(
                "{} is not registered",
                file.local_path.display()
            )));
        }

        let mut session = RegistrySession::begin(&self.pool).await?;

        if let Some(existing) = session.fetch_by_request_id(request_id).await? {
            if existing.change_type == change_type {
                return Ok(existing.file);
            }
            return Err(AppError::InvalidRequestId {
                request_id: request_id.to_string(),
                existing: existing.change_type.to_string(),
            });
        }

        let mut row = session
            .fetch_row(&file.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("file upload {}", file.id)))?;

        match change_type {
            ChangeType::Update => row.uploaded_at = Some(now()),
            ChangeType::Delete => row.deleted_at = Some(now()),
            ChangeType::Create => {}
        }

        session.update_row(&row).await?;
        session.insert_history(request_id, change_type, &row).await?;
        session.commit().await?;

        tracing::debug!(id = %row.id, change = %change_type, "Recorded file transition");
        Ok(row)
    }

    async fn uploaded_once(&self, id: &str) -> Result<Option<BackupFile>> {
        let mut session = RegistrySession::begin(&self.pool).await?;
        let latest = session.latest_history(id).await?;
        Ok(latest
            .filter(|h| h.change_type == ChangeType::Update && h.file.uploaded_at.is_some())
            .map(|h| h.file))
    }

    async fn latest_once(&self, local_path: &str) -> Result<Option<BackupFile>> {
        let mut session = RegistrySession::begin(&self.pool).await?;
        session.latest_for_path(local_path).await
    }

    async fn live_once(&self, prefix: &str) -> Result<Vec<BackupFile>> {
        let mut session = RegistrySession::begin(&self.pool).await?;
        session.live_under(prefix).await
    }
}

#[async_trait]
impl Registry for SqliteRegistry {
    async fn register_file_upload(&self, file: &BackupFile) -> Result<BackupFile> {
        self.retry("register", move || self.register_once(file)).await
    }

    async fn mark_file_upload_uploaded(&self, file: &BackupFile) -> Result<BackupFile> {
        let request_id = uploaded_request_id(&file.id);
        self.record_transition(file, &request_id, ChangeType::Update).await
    }

    async fn mark_file_upload_deleted(&self, file: &BackupFile) -> Result<BackupFile> {
        let request_id = deleted_request_id(&file.id);
        self.record_transition(file, &request_id, ChangeType::Delete).await
    }

    async fn get_uploaded_file_upload(&self, id: &str) -> Result<Option<BackupFile>> {
        self.retry("get_uploaded", move || self.uploaded_once(id)).await
    }

    async fn fetch_latest(&self, local_path: &Path) -> Result<Option<BackupFile>> {
        let path = local_path.to_string_lossy().into_owned();
        let path = path.as_str();
        self.retry("fetch_latest", move || self.latest_once(path)).await
    }

    async fn list_live(&self, root: &Path) -> Result<Vec<BackupFile>> {
        let mut prefix = root.to_string_lossy().into_owned();
        if !prefix.is_empty() && !prefix.ends_with(MAIN_SEPARATOR) {
            prefix.push(MAIN_SEPARATOR);
        }
        let prefix = prefix.as_str();
        self.retry("list_live", move || self.live_once(prefix)).await
    }
}

/// Whether `err` means the transaction lost a race and may be rerun
fn is_contention(err: &AppError) -> bool {
    match err {
        AppError::Database(sqlx::Error::Database(db)) => {
            db.is_unique_violation()
                || db
                    .code()
                    .and_then(|code| code.parse::<i32>().ok())
                    // SQLITE_BUSY / SQLITE_LOCKED, including extended codes
                    .is_some_and(|code| matches!(code & 0xff, 5 | 6))
        }
        AppError::Database(sqlx::Error::PoolTimedOut) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn test_registry() -> (TempDir, SqliteRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("registry.db").display());
        let registry = SqliteRegistry::connect(&url).await.unwrap();
        (dir, registry)
    }

    fn sample_file(path: &str, version: &str) -> BackupFile {
        let mut file = BackupFile::new(path, "backups");
        file.key = BackupFile::generate_key();
        file.checksum = "cbf43926".to_string();
        file.ctime = 1_700_000_000_000_000_000;
        file.etag = format!("\"etag-{}\"", version);
        file.version = version.to_string();
        file.salt = hex::encode([7u8; 16]);
        file
    }

    async fn count(registry: &SqliteRegistry, table: &str) -> i64 {
        sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
            .fetch_one(registry.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let (_dir, registry) = test_registry().await;
        let file = sample_file("/data/a.txt", "v1");

        let first = registry.register_file_upload(&file).await.unwrap();
        let second = registry.register_file_upload(&file).await.unwrap();

        assert_eq!(first.id, create_request_id("/data/a.txt", "v1"));
        assert_eq!(first, second);
        assert!(first.uploaded_at.is_none());
        assert_eq!(count(&registry, "file_uploads").await, 1);
        assert_eq!(count(&registry, "file_upload_history").await, 1);
    }

    #[tokio::test]
    async fn test_mark_uploaded() {
        let (_dir, registry) = test_registry().await;
        let registered = registry
            .register_file_upload(&sample_file("/data/a.txt", "v1"))
            .await
            .unwrap();

        assert!(registry
            .get_uploaded_file_upload(&registered.id)
            .await
            .unwrap()
            .is_none());

        let uploaded = registry.mark_file_upload_uploaded(&registered).await.unwrap();
        assert!(uploaded.uploaded_at.is_some());
        assert_eq!(uploaded.key, registered.key);

        let replay = registry.mark_file_upload_uploaded(&registered).await.unwrap();
        assert_eq!(replay.uploaded_at, uploaded.uploaded_at);
        assert_eq!(count(&registry, "file_upload_history").await, 2);

        let fetched = registry
            .get_uploaded_file_upload(&registered.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched, uploaded);

        let latest = registry
            .fetch_latest(Path::new("/data/a.txt"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.uploaded_at, uploaded.uploaded_at);
    }

    #[tokio::test]
    async fn test_conflicting_change_type() {
        let (_dir, registry) = test_registry().await;
        let registered = registry
            .register_file_upload(&sample_file("/data/a.txt", "v1"))
            .await
            .unwrap();

        let err = registry
            .record_transition(&registered, &registered.id, ChangeType::Update)
            .await
            .unwrap_err();
        match err {
            AppError::InvalidRequestId { request_id, existing } => {
                assert_eq!(request_id, registered.id);
                assert_eq!(existing, "create");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(count(&registry, "file_upload_history").await, 1);
    }

    #[tokio::test]
    async fn test_transition_requires_registration() {
        let (_dir, registry) = test_registry().await;
        let err = registry
            .mark_file_upload_uploaded(&sample_file("/data/a.txt", "v1"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_fetch_latest_prefers_newest_version() {
        let (_dir, registry) = test_registry().await;
        registry
            .register_file_upload(&sample_file("/data/a.txt", "v1"))
            .await
            .unwrap();
        let newer = registry
            .register_file_upload(&sample_file("/data/a.txt", "v2"))
            .await
            .unwrap();

        let latest = registry
            .fetch_latest(Path::new("/data/a.txt"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, newer.id);
        assert_eq!(latest.version, "v2");

        assert!(registry
            .fetch_latest(Path::new("/data/missing.txt"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_mark_deleted_hides_version() {
        let (_dir, registry) = test_registry().await;
        let registered = registry
            .register_file_upload(&sample_file("/data/a.txt", "v1"))
            .await
            .unwrap();
        registry.mark_file_upload_uploaded(&registered).await.unwrap();

        let deleted = registry.mark_file_upload_deleted(&registered).await.unwrap();
        assert!(deleted.deleted_at.is_some());
        assert!(deleted.uploaded_at.is_some());

        assert!(registry
            .get_uploaded_file_upload(&registered.id)
            .await
            .unwrap()
            .is_none());
        assert!(registry
            .list_live(Path::new("/data"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_list_live_respects_directory_boundary() {
        let (_dir, registry) = test_registry().await;
        for path in ["/data/a/x.txt", "/data/ab/y.txt", "/data/a/sub/z.txt"] {
            registry
                .register_file_upload(&sample_file(path, "v1"))
                .await
                .unwrap();
        }
        // Newer version at the same path replaces the older one
        registry
            .register_file_upload(&sample_file("/data/a/x.txt", "v2"))
            .await
            .unwrap();

        let live = registry.list_live(Path::new("/data/a")).await.unwrap();
        let paths: Vec<_> = live.iter().map(|f| f.path_str()).collect();
        assert_eq!(paths, vec!["/data/a/sub/z.txt", "/data/a/x.txt"]);
        assert_eq!(live[1].version, "v2");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_single_row() {
        let (_dir, registry) = test_registry().await;
        let registry = Arc::new(registry);
        let file = sample_file("/data/race.txt", "v1");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let file = file.clone();
            handles.push(tokio::spawn(async move {
                registry.register_file_upload(&file).await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }

        assert!(ids.iter().all(|id| id == &ids[0]));
        assert_eq!(count(&registry, "file_uploads").await, 1);
        assert_eq!(count(&registry, "file_upload_history").await, 1);
    }
}
