//! Transaction-scoped access to the registry tables

use sqlx::{Sqlite, SqlitePool, Transaction};

use super::types::{to_micros, ChangeType, FileUploadRow, HistoryRow};
use crate::error::Result;
use crate::file::BackupFile;

/// One open registry transaction.
///
/// Dropping the session without calling [`RegistrySession::commit`] rolls
/// the transaction back.
pub struct RegistrySession {
    tx: Transaction<'static, Sqlite>,
}

impl RegistrySession {
    pub async fn begin(pool: &SqlitePool) -> Result<Self> {
        Ok(Self {
            tx: pool.begin().await?,
        })
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    /// History row recorded under `request_id`, if any
    pub async fn fetch_by_request_id(&mut self, request_id: &str) -> Result<Option<HistoryRow>> {
        let row = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT seq, request_id, change_type, file_id, object_key, local_path, checksum,
                   ctime, bucket, storage_class, etag, version, salt, encryption_algorithm,
                   created_at_timestamp, uploaded_at_timestamp, deleted_at_timestamp
            FROM file_upload_history
            WHERE request_id = ?
            "#,
        )
        .bind(request_id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row)
    }

    /// Most recent history row for the file `id`
    pub async fn latest_history(&mut self, id: &str) -> Result<Option<HistoryRow>> {
        let row = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT seq, request_id, change_type, file_id, object_key, local_path, checksum,
                   ctime, bucket, storage_class, etag, version, salt, encryption_algorithm,
                   created_at_timestamp, uploaded_at_timestamp, deleted_at_timestamp
            FROM file_upload_history
            WHERE file_id = ?
            ORDER BY seq DESC
            LIMIT 1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row)
    }

    /// Current projection row for the file `id`
    pub async fn fetch_row(&mut self, id: &str) -> Result<Option<BackupFile>> {
        let row = sqlx::query_as::<_, FileUploadRow>(
            r#"
            SELECT id, object_key, local_path, checksum, ctime, bucket, storage_class, etag,
                   version, salt, encryption_algorithm, created_at_timestamp,
                   uploaded_at_timestamp, deleted_at_timestamp
            FROM file_uploads
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|r| r.0))
    }

    /// Latest registered version at `local_path`
    pub async fn latest_for_path(&mut self, local_path: &str) -> Result<Option<BackupFile>> {
        let row = sqlx::query_as::<_, FileUploadRow>(
            r#"
            SELECT id, object_key, local_path, checksum, ctime, bucket, storage_class, etag,
                   version, salt, encryption_algorithm, created_at_timestamp,
                   uploaded_at_timestamp, deleted_at_timestamp
            FROM file_uploads
            WHERE local_path = ?
            ORDER BY created_at_timestamp DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(local_path)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(row.map(|r| r.0))
    }

    /// Latest version of every path under `prefix` that is not deleted
    pub async fn live_under(&mut self, prefix: &str) -> Result<Vec<BackupFile>> {
        let rows = sqlx::query_as::<_, FileUploadRow>(
            r#"
            SELECT f.id, f.object_key, f.local_path, f.checksum, f.ctime, f.bucket,
                   f.storage_class, f.etag, f.version, f.salt, f.encryption_algorithm,
                   f.created_at_timestamp, f.uploaded_at_timestamp, f.deleted_at_timestamp
            FROM file_uploads f
            WHERE substr(f.local_path, 1, length(?1)) = ?1
              AND f.deleted_at_timestamp IS NULL
              AND f.rowid = (
                  SELECT l.rowid FROM file_uploads l
                  WHERE l.local_path = f.local_path
                  ORDER BY l.created_at_timestamp DESC, l.rowid DESC
                  LIMIT 1
              )
            ORDER BY f.local_path
            "#,
        )
        .bind(prefix)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    pub async fn insert_row(&mut self, file: &BackupFile) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO file_uploads (
                id, object_key, local_path, checksum, ctime, bucket, storage_class, etag,
                version, salt, encryption_algorithm, created_at_timestamp,
                uploaded_at_timestamp, deleted_at_timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.id)
        .bind(&file.key)
        .bind(file.path_str())
        .bind(&file.checksum)
        .bind(file.ctime)
        .bind(&file.bucket)
        .bind(&file.storage_class)
        .bind(&file.etag)
        .bind(&file.version)
        .bind(&file.salt)
        .bind(file.encryption_algorithm.as_str())
        .bind(to_micros(file.created_at))
        .bind(file.uploaded_at.map(to_micros))
        .bind(file.deleted_at.map(to_micros))
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    /// Write the lifecycle timestamps of `file` onto its projection row
    pub async fn update_row(&mut self, file: &BackupFile) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE file_uploads
            SET uploaded_at_timestamp = ?, deleted_at_timestamp = ?
            WHERE id = ?
            "#,
        )
        .bind(file.uploaded_at.map(to_micros))
        .bind(file.deleted_at.map(to_micros))
        .bind(&file.id)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    pub async fn insert_history(
        &mut self,
        request_id: &str,
        change_type: ChangeType,
        file: &BackupFile,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO file_upload_history (
                request_id, change_type, file_id, object_key, local_path, checksum, ctime,
                bucket, storage_class, etag, version, salt, encryption_algorithm,
                created_at_timestamp, uploaded_at_timestamp, deleted_at_timestamp
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(request_id)
        .bind(change_type.as_str())
        .bind(&file.id)
        .bind(&file.key)
        .bind(file.path_str())
        .bind(&file.checksum)
        .bind(file.ctime)
        .bind(&file.bucket)
        .bind(&file.storage_class)
        .bind(&file.etag)
        .bind(&file.version)
        .bind(&file.salt)
        .bind(file.encryption_algorithm.as_str())
        .bind(to_micros(file.created_at))
        .bind(file.uploaded_at.map(to_micros))
        .bind(file.deleted_at.map(to_micros))
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }
}
