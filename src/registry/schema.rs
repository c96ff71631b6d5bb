//! Database schema initialization

use sqlx::SqlitePool;

use crate::error::Result;

/// Initialize the database schema
pub async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(SCHEMA_SQL)
        .execute(pool)
        .await?;

    Ok(())
}

const SCHEMA_SQL: &str = r#"
-- One row per registered version of a file; latest per path wins
CREATE TABLE IF NOT EXISTS file_uploads (
    id TEXT PRIMARY KEY,
    object_key TEXT NOT NULL,
    local_path TEXT NOT NULL,
    checksum TEXT NOT NULL,
    ctime INTEGER NOT NULL,
    bucket TEXT NOT NULL,
    storage_class TEXT NOT NULL,
    etag TEXT NOT NULL,
    version TEXT NOT NULL,
    salt TEXT NOT NULL,
    encryption_algorithm TEXT NOT NULL,
    created_at_timestamp INTEGER NOT NULL,
    uploaded_at_timestamp INTEGER,
    deleted_at_timestamp INTEGER
);

CREATE INDEX IF NOT EXISTS idx_file_uploads_path ON file_uploads(local_path, created_at_timestamp);

-- Append-only history, one row per idempotent request
CREATE TABLE IF NOT EXISTS file_upload_history (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id TEXT NOT NULL UNIQUE,
    change_type TEXT NOT NULL,
    file_id TEXT NOT NULL,
    object_key TEXT NOT NULL,
    local_path TEXT NOT NULL,
    checksum TEXT NOT NULL,
    ctime INTEGER NOT NULL,
    bucket TEXT NOT NULL,
    storage_class TEXT NOT NULL,
    etag TEXT NOT NULL,
    version TEXT NOT NULL,
    salt TEXT NOT NULL,
    encryption_algorithm TEXT NOT NULL,
    created_at_timestamp INTEGER NOT NULL,
    uploaded_at_timestamp INTEGER,
    deleted_at_timestamp INTEGER
);

CREATE INDEX IF NOT EXISTS idx_history_file_id ON file_upload_history(file_id, seq);
"#;
