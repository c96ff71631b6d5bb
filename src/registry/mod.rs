//! Registry Module
//!
//! Durable, idempotent record of every backed-up file version:
//! - `file_uploads`: latest projection, one row per registered version
//! - `file_upload_history`: append-only transitions keyed by request id
//!
//! Every operation runs in a single SQLite transaction. Writers that lose a
//! race are rolled back and retried, so they replay the winner's row.

mod schema;
mod session;
mod sqlite;
mod types;

pub use schema::initialize_schema;
pub use session::RegistrySession;
pub use sqlite::SqliteRegistry;
pub use types::{
    create_request_id, deleted_request_id, uploaded_request_id, ChangeType, FileUploadRow,
    HistoryRow,
};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::Result;
use crate::file::BackupFile;

/// How long a connection waits on a locked database before reporting busy
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Persistence of file versions and their lifecycle transitions
#[async_trait]
pub trait Registry: Send + Sync {
    /// Record a new version; replays the stored row for a known version
    async fn register_file_upload(&self, file: &BackupFile) -> Result<BackupFile>;

    /// Stamp `uploaded_at` on a registered version
    async fn mark_file_upload_uploaded(&self, file: &BackupFile) -> Result<BackupFile>;

    /// Stamp `deleted_at` on a registered version
    async fn mark_file_upload_deleted(&self, file: &BackupFile) -> Result<BackupFile>;

    /// The version `id` if its latest transition is a completed upload
    async fn get_uploaded_file_upload(&self, id: &str) -> Result<Option<BackupFile>>;

    /// Most recently registered version at `local_path`
    async fn fetch_latest(&self, local_path: &Path) -> Result<Option<BackupFile>>;

    /// Latest non-deleted version of every path under `root`
    async fn list_live(&self, root: &Path) -> Result<Vec<BackupFile>>;
}

/// Create a new database connection pool
pub async fn create_pool(database_url: &str) -> Result<SqlitePool> {
    create_pool_with(database_url, 5).await
}

/// Create a pool with an explicit connection limit
pub async fn create_pool_with(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .busy_timeout(BUSY_TIMEOUT);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    initialize_schema(&pool).await?;

    Ok(pool)
}
