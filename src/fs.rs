//! Read-only filesystem access used by the scanner, processor and upload store

use std::fs::Metadata;
use std::io::Read;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{AppError, Result};

/// Boxed blocking reader over file content
pub type FileReader = Box<dyn Read + Send>;

/// Kind of a walked directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
    Symlink,
    Other,
}

/// One entry produced by a directory walk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
}

/// Size and change time of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    /// Nanoseconds since the epoch
    pub ctime: i64,
}

/// Filesystem capabilities the pipeline depends on
pub trait FileSystem: Send + Sync {
    /// Depth-first walk under `root`. Errors are yielded in place and do not
    /// end the iteration.
    fn walk(&self, root: &Path) -> Box<dyn Iterator<Item = Result<FsEntry>> + Send>;

    fn stat(&self, path: &Path) -> Result<FileStat>;

    fn open(&self, path: &Path) -> Result<FileReader>;

    fn exists(&self, path: &Path) -> bool;
}

/// The local disk
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for LocalFileSystem {
    fn walk(&self, root: &Path) -> Box<dyn Iterator<Item = Result<FsEntry>> + Send> {
        let iter = WalkDir::new(root)
            .follow_links(false)
            .into_iter()
            .map(|entry| {
                let entry = entry.map_err(|e| AppError::Walk(e.to_string()))?;
                let file_type = entry.file_type();
                let kind = if file_type.is_symlink() {
                    EntryKind::Symlink
                } else if file_type.is_dir() {
                    EntryKind::Dir
                } else if file_type.is_file() {
                    EntryKind::File
                } else {
                    EntryKind::Other
                };
                Ok(FsEntry {
                    path: entry.into_path(),
                    kind,
                })
            });
        Box::new(iter)
    }

    fn stat(&self, path: &Path) -> Result<FileStat> {
        let metadata = std::fs::metadata(path)?;
        Ok(FileStat {
            size: metadata.len(),
            ctime: ctime_nanos(&metadata),
        })
    }

    fn open(&self, path: &Path) -> Result<FileReader> {
        let file = std::fs::File::open(path)?;
        Ok(Box::new(file))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[cfg(unix)]
fn ctime_nanos(metadata: &Metadata) -> i64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ctime().saturating_mul(1_000_000_000).saturating_add(metadata.ctime_nsec())
}

// No inode change time off unix; modification time is the closest signal.
#[cfg(not(unix))]
fn ctime_nanos(metadata: &Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
