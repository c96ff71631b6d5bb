//! Directory Scanner
//!
//! Walks a directory tree on a blocking thread and feeds regular files
//! through a bounded queue to a fixed pool of async workers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;

use crate::config::ScanConfig;
use crate::error::{AppError, Result};
use crate::fs::{EntryKind, FileSystem};
use crate::processor::Processor;

/// Cooperative stop signal shared between a scan and whoever may cancel it
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counts gathered over one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub files_enqueued: usize,
    /// Files every processor accepted
    pub processed: usize,
    /// Files at least one processor failed on
    pub failed: usize,
    /// Directories, symlinks and other non-regular entries
    pub skipped_entries: usize,
    pub walk_errors: usize,
}

#[derive(Default)]
struct WalkStats {
    enqueued: usize,
    skipped: usize,
    errors: usize,
    cancelled: bool,
}

#[derive(Default)]
struct WorkerStats {
    processed: usize,
    failed: usize,
    /// Paths dequeued after cancellation was observed
    drained: usize,
}

/// Scans directory trees into a set of processors
pub struct DirectoryScanner {
    fs: Arc<dyn FileSystem>,
    cancel: CancellationFlag,
}

impl DirectoryScanner {
    pub fn new(fs: Arc<dyn FileSystem>, cancel: CancellationFlag) -> Self {
        Self { fs, cancel }
    }

    /// Run every processor on every regular file under `root`.
    ///
    /// Returns once the walk has finished and all queued files were
    /// processed. A cancelled walk still drains the queue, then reports
    /// [`AppError::Cancelled`].
    pub async fn scan(
        &self,
        root: &Path,
        processors: &[Arc<dyn Processor>],
        config: &ScanConfig,
    ) -> Result<ScanSummary> {
        tracing::info!("Starting scan of {}", root.display());
        let start = std::time::Instant::now();

        let (summary, cancelled) = self.run(root, processors, config).await?;

        if cancelled {
            tracing::warn!(
                root = %root.display(),
                processed = summary.processed,
                failed = summary.failed,
                "Scan cancelled"
            );
            return Err(AppError::Cancelled);
        }

        tracing::info!(
            "Scan of {} complete: {} processed, {} failed in {:?}",
            root.display(),
            summary.processed,
            summary.failed,
            start.elapsed()
        );
        Ok(summary)
    }

    /// Walk and drain the queue, reporting whether the walk was cut short
    async fn run(
        &self,
        root: &Path,
        processors: &[Arc<dyn Processor>],
        config: &ScanConfig,
    ) -> Result<(ScanSummary, bool)> {
        if config.workers == 0 {
            return Err(AppError::InvalidConfig(
                "scan needs at least one worker".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel::<PathBuf>(config.queue_capacity());
        let rx = Arc::new(Mutex::new(rx));
        let processors: Arc<[Arc<dyn Processor>]> = Arc::from(processors);

        let mut workers = JoinSet::new();
        for worker_id in 0..config.workers {
            let rx = rx.clone();
            let processors = processors.clone();
            workers.spawn(run_worker(worker_id, rx, processors, self.cancel.clone()));
        }

        let fs = self.fs.clone();
        let cancel = self.cancel.clone();
        let walk_root = root.to_path_buf();
        let producer = tokio::task::spawn_blocking(move || walk(fs.as_ref(), &walk_root, &cancel, tx));

        let walked = producer.await?;

        let mut summary = ScanSummary {
            files_enqueued: walked.enqueued,
            skipped_entries: walked.skipped,
            walk_errors: walked.errors,
            ..Default::default()
        };
        while let Some(result) = workers.join_next().await {
            let stats = result?;
            summary.processed += stats.processed;
            summary.failed += stats.failed;
        }

        Ok((summary, walked.cancelled))
    }
}

/// Producer side: enqueue regular files until the walk ends or is cancelled.
/// Dropping `tx` on return closes the queue.
fn walk(fs: &dyn FileSystem, root: &Path, cancel: &CancellationFlag, tx: mpsc::Sender<PathBuf>) -> WalkStats {
    let mut stats = WalkStats::default();

    for entry in fs.walk(root) {
        if cancel.is_cancelled() {
            tracing::debug!("Cancellation observed, stopping walk");
            stats.cancelled = true;
            break;
        }

        match entry {
            Err(e) => {
                tracing::warn!(error = %e, "Error walking directory");
                stats.errors += 1;
            }
            Ok(entry) if entry.kind != EntryKind::File => {
                tracing::debug!(path = %entry.path.display(), kind = ?entry.kind, "Skipping non-regular entry");
                stats.skipped += 1;
            }
            Ok(entry) => {
                if tx.blocking_send(entry.path).is_err() {
                    // every worker has exited
                    break;
                }
                stats.enqueued += 1;
            }
        }
    }

    stats
}

async fn run_worker(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<PathBuf>>>,
    processors: Arc<[Arc<dyn Processor>]>,
    cancel: CancellationFlag,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    let mut draining = false;

    loop {
        let next = rx.lock().await.recv().await;
        let Some(path) = next else {
            break;
        };

        // Queued paths are still finished after cancellation
        if !draining && cancel.is_cancelled() {
            tracing::debug!(worker = worker_id, "Cancellation observed, draining queue");
            draining = true;
        }
        if draining {
            stats.drained += 1;
        }

        let mut ok = true;
        for processor in processors.iter() {
            if let Err(e) = processor.process(&path).await {
                tracing::warn!(worker = worker_id, path = %path.display(), error = %e, "Failed to process file");
                ok = false;
            }
        }

        if ok {
            stats.processed += 1;
        } else {
            stats.failed += 1;
        }
    }

    tracing::trace!(
        worker = worker_id,
        processed = stats.processed,
        drained = stats.drained,
        "Worker finished"
    );
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::BackupFile;
    use crate::fs::LocalFileSystem;
    use async_trait::async_trait;
    use parking_lot::Mutex as SyncMutex;
    use std::collections::HashSet;
    use tempfile::TempDir;

    /// Records every path; fails on names containing "bad"; may cancel on first call
    #[derive(Default)]
    struct RecordingProcessor {
        seen: SyncMutex<Vec<PathBuf>>,
        cancel_on_first: Option<CancellationFlag>,
    }

    impl RecordingProcessor {
        fn seen(&self) -> Vec<PathBuf> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl Processor for RecordingProcessor {
        async fn process(&self, path: &Path) -> Result<BackupFile> {
            self.seen.lock().push(path.to_path_buf());
            if let Some(cancel) = &self.cancel_on_first {
                cancel.cancel();
            }
            if path.to_string_lossy().contains("bad") {
                return Err(AppError::NotFound(path.display().to_string()));
            }
            Ok(BackupFile::new(path, "bucket"))
        }
    }

    fn tree() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        std::fs::create_dir_all(root.join("a/b")).unwrap();
        std::fs::write(root.join("one.txt"), b"1").unwrap();
        std::fs::write(root.join("a/two.txt"), b"2").unwrap();
        std::fs::write(root.join("a/b/three.txt"), b"3").unwrap();
        temp_dir
    }

    fn scanner(cancel: CancellationFlag) -> DirectoryScanner {
        DirectoryScanner::new(Arc::new(LocalFileSystem::new()), cancel)
    }

    #[tokio::test]
    async fn test_every_file_reaches_every_processor_once() {
        let temp_dir = tree();
        let first = Arc::new(RecordingProcessor::default());
        let second = Arc::new(RecordingProcessor::default());
        let processors: Vec<Arc<dyn Processor>> = vec![first.clone(), second.clone()];

        let summary = scanner(CancellationFlag::new())
            .scan(temp_dir.path(), &processors, &ScanConfig::default().with_workers(3))
            .await
            .unwrap();

        let expected: HashSet<PathBuf> = ["one.txt", "a/two.txt", "a/b/three.txt"]
            .iter()
            .map(|p| temp_dir.path().join(p))
            .collect();
        for processor in [&first, &second] {
            let seen = processor.seen();
            assert_eq!(seen.len(), 3);
            assert_eq!(seen.into_iter().collect::<HashSet<_>>(), expected);
        }

        assert_eq!(summary.files_enqueued, 3);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.failed, 0);
        // root, a, a/b
        assert_eq!(summary.skipped_entries, 3);
        assert_eq!(summary.walk_errors, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinks_are_skipped() {
        let temp_dir = tree();
        std::os::unix::fs::symlink(temp_dir.path().join("one.txt"), temp_dir.path().join("link.txt")).unwrap();
        let processor = Arc::new(RecordingProcessor::default());
        let processors: Vec<Arc<dyn Processor>> = vec![processor.clone()];

        let summary = scanner(CancellationFlag::new())
            .scan(temp_dir.path(), &processors, &ScanConfig::default().with_workers(2))
            .await
            .unwrap();

        assert_eq!(summary.processed, 3);
        assert!(!processor.seen().contains(&temp_dir.path().join("link.txt")));
    }

    #[tokio::test]
    async fn test_processor_error_does_not_stop_scan() {
        let temp_dir = tree();
        std::fs::write(temp_dir.path().join("bad.txt"), b"x").unwrap();
        let processor = Arc::new(RecordingProcessor::default());
        let processors: Vec<Arc<dyn Processor>> = vec![processor.clone()];

        let summary = scanner(CancellationFlag::new())
            .scan(temp_dir.path(), &processors, &ScanConfig::default().with_workers(1))
            .await
            .unwrap();

        assert_eq!(processor.seen().len(), 4);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.failed, 1);
    }

    #[tokio::test]
    async fn test_zero_workers_is_invalid() {
        let temp_dir = tree();
        let processors: Vec<Arc<dyn Processor>> = vec![Arc::new(RecordingProcessor::default())];

        let result = scanner(CancellationFlag::new())
            .scan(temp_dir.path(), &processors, &ScanConfig::default().with_workers(0))
            .await;

        assert!(matches!(result, Err(AppError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_missing_root_counts_walk_error() {
        let temp_dir = TempDir::new().unwrap();
        let processors: Vec<Arc<dyn Processor>> = vec![Arc::new(RecordingProcessor::default())];

        let summary = scanner(CancellationFlag::new())
            .scan(&temp_dir.path().join("missing"), &processors, &ScanConfig::default())
            .await
            .unwrap();

        assert_eq!(summary.walk_errors, 1);
        assert_eq!(summary.files_enqueued, 0);
    }

    #[tokio::test]
    async fn test_cancellation_stops_walk_and_drains() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..20 {
            std::fs::write(temp_dir.path().join(format!("f{i:02}.txt")), b"x").unwrap();
        }

        let cancel = CancellationFlag::new();
        let processor = Arc::new(RecordingProcessor {
            cancel_on_first: Some(cancel.clone()),
            ..Default::default()
        });
        let processors: Vec<Arc<dyn Processor>> = vec![processor.clone()];

        let result = scanner(cancel.clone())
            .scan(
                temp_dir.path(),
                &processors,
                &ScanConfig::default().with_workers(1).with_queue_depth(1),
            )
            .await;

        assert!(matches!(result, Err(AppError::Cancelled)));
        let seen = processor.seen().len();
        assert!(seen >= 1);
        assert!(seen < 20);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_enqueues_nothing() {
        let temp_dir = tree();
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let processor = Arc::new(RecordingProcessor::default());
        let processors: Vec<Arc<dyn Processor>> = vec![processor.clone()];

        let result = scanner(cancel)
            .scan(temp_dir.path(), &processors, &ScanConfig::default())
            .await;

        assert!(result.unwrap_err().is_cancelled());
        assert!(processor.seen().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_scan_finishes_every_enqueued_path() {
        let temp_dir = TempDir::new().unwrap();
        for i in 0..30 {
            std::fs::write(temp_dir.path().join(format!("f{i:02}.txt")), b"x").unwrap();
        }

        let cancel = CancellationFlag::new();
        let processor = Arc::new(RecordingProcessor {
            cancel_on_first: Some(cancel.clone()),
            ..Default::default()
        });
        let processors: Vec<Arc<dyn Processor>> = vec![processor.clone()];

        let (summary, cancelled) = scanner(cancel)
            .run(
                temp_dir.path(),
                &processors,
                &ScanConfig::default().with_workers(2).with_queue_depth(4),
            )
            .await
            .unwrap();

        assert!(cancelled);
        assert!(summary.files_enqueued >= 1);
        assert!(summary.files_enqueued < 30);
        assert_eq!(processor.seen().len(), summary.files_enqueued);
        assert_eq!(summary.processed, summary.files_enqueued);
        assert_eq!(summary.failed, 0);
    }
}
