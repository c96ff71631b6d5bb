//! Registry row types and request id derivation

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::crypto::EncryptionAlgorithm;
use crate::file::BackupFile;

/// Lifecycle transition recorded in the history table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(format!("unknown change type: {}", other)),
        }
    }
}

/// Idempotency key for registering `version` of the file at `local_path`
pub fn create_request_id(local_path: &str, version: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(local_path.as_bytes());
    hasher.update([0u8]);
    hasher.update(version.as_bytes());
    hex::encode(hasher.finalize())
}

/// Idempotency key for the uploaded transition of a registered file
pub fn uploaded_request_id(id: &str) -> String {
    format!("{}_uploaded", id)
}

/// Idempotency key for the deleted transition of a registered file
pub fn deleted_request_id(id: &str) -> String {
    format!("{}_deleted", id)
}

/// Timestamps are stored as microseconds since the epoch
pub(crate) fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

pub(crate) fn from_micros(micros: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(
        micros.div_euclid(1_000_000),
        (micros.rem_euclid(1_000_000) * 1_000) as u32,
    )
}

/// Current time truncated to the stored precision
pub(crate) fn now() -> DateTime<Utc> {
    let now = Utc::now();
    from_micros(to_micros(now)).unwrap_or(now)
}

fn decode_error(column: &str, message: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: message.into(),
    }
}

fn decode_timestamp(row: &SqliteRow, column: &str) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    let micros: Option<i64> = row.try_get(column)?;
    match micros {
        None => Ok(None),
        Some(micros) => from_micros(micros)
            .map(Some)
            .ok_or_else(|| decode_error(column, format!("timestamp out of range: {}", micros))),
    }
}

/// Decode the shared file columns; `id_column` differs between tables
fn decode_file(row: &SqliteRow, id_column: &str) -> Result<BackupFile, sqlx::Error> {
    let local_path: String = row.try_get("local_path")?;
    let algorithm: String = row.try_get("encryption_algorithm")?;
    let encryption_algorithm = EncryptionAlgorithm::from_str(&algorithm)
        .map_err(|e| decode_error("encryption_algorithm", e))?;
    let created_at = decode_timestamp(row, "created_at_timestamp")?
        .ok_or_else(|| decode_error("created_at_timestamp", "missing".to_string()))?;

    Ok(BackupFile {
        id: row.try_get(id_column)?,
        key: row.try_get("object_key")?,
        local_path: PathBuf::from(local_path),
        checksum: row.try_get("checksum")?,
        ctime: row.try_get("ctime")?,
        bucket: row.try_get("bucket")?,
        storage_class: row.try_get("storage_class")?,
        etag: row.try_get("etag")?,
        version: row.try_get("version")?,
        created_at,
        uploaded_at: decode_timestamp(row, "uploaded_at_timestamp")?,
        deleted_at: decode_timestamp(row, "deleted_at_timestamp")?,
        salt: row.try_get("salt")?,
        encryption_algorithm,
    })
}

/// Row of the `file_uploads` projection
#[derive(Debug, Clone)]
pub struct FileUploadRow(pub BackupFile);

impl<'r> FromRow<'r, SqliteRow> for FileUploadRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        decode_file(row, "id").map(Self)
    }
}

/// Row of the append-only `file_upload_history` table
#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub seq: i64,
    pub request_id: String,
    pub change_type: ChangeType,
    pub file: BackupFile,
}

impl<'r> FromRow<'r, SqliteRow> for HistoryRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let change_type: String = row.try_get("change_type")?;
        Ok(Self {
            seq: row.try_get("seq")?,
            request_id: row.try_get("request_id")?,
            change_type: ChangeType::from_str(&change_type)
                .map_err(|e| decode_error("change_type", e))?,
            file: decode_file(row, "file_id")?,
        })
    }
}
