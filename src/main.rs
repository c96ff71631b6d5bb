//! Coldvault
//!
//! Backs up every configured directory once, then exits. Ctrl+C or SIGTERM
//! stops the walk; files already queued are still finished.

use anyhow::Context;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use coldvault::config::Config;
use coldvault::fs::{FileSystem, LocalFileSystem};
use coldvault::processor::{FileProcessor, Processor};
use coldvault::registry::{Registry, SqliteRegistry};
use coldvault::scanner::{CancellationFlag, DirectoryScanner};
use coldvault::storage::{ObjectStorage, S3Client};
use coldvault::upload::UploadStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "coldvault=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("Failed to load configuration")?;

    tracing::info!("Starting Coldvault v{}", env!("CARGO_PKG_VERSION"));
    if config.directories.is_empty() {
        tracing::warn!("No directories configured, set COLDVAULT_DIRECTORIES");
        return Ok(());
    }

    let backend: Arc<dyn ObjectStorage> = Arc::new(
        S3Client::new(&config.storage)
            .await
            .context("Failed to initialize S3 client")?,
    );
    let registry: Arc<dyn Registry> = Arc::new(
        SqliteRegistry::connect(&config.database.url)
            .await
            .context("Failed to initialize database")?,
    );
    tracing::info!("Database initialized at {}", config.database.url);

    let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new());
    let cancel = CancellationFlag::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            shutdown_signal().await;
            cancel.cancel();
        }
    });

    let scanner = DirectoryScanner::new(fs.clone(), cancel.clone());
    let mut failures = 0;

    for directory in &config.directories {
        let store = UploadStore::new(
            backend.clone(),
            fs.clone(),
            config.upload.clone(),
            config.encryption.secret.as_bytes(),
        );
        let processor = Arc::new(FileProcessor::new(fs.clone(), registry.clone(), store, directory));
        let processors: Vec<Arc<dyn Processor>> = vec![processor.clone()];

        let summary = match scanner.scan(&directory.local_path, &processors, &config.scan).await {
            Ok(summary) => summary,
            Err(e) if e.is_cancelled() => {
                tracing::warn!("Backup interrupted during {}", directory.local_path.display());
                break;
            }
            Err(e) => return Err(e).context(format!("Scan of {} failed", directory.local_path.display())),
        };
        failures += summary.failed;

        // Only a complete walk tells which files are gone
        if summary.walk_errors == 0 {
            processor
                .propagate_deletions(&directory.local_path)
                .await
                .with_context(|| format!("Failed to propagate deletions under {}", directory.local_path.display()))?;
        } else {
            tracing::warn!(
                "Skipping deletion sync for {}: {} walk errors",
                directory.local_path.display(),
                summary.walk_errors
            );
        }
    }

    if failures > 0 {
        tracing::warn!("Backup finished with {} failed files", failures);
    } else {
        tracing::info!("Backup complete");
    }
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, finishing queued files...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, finishing queued files...");
        },
    }
}
