//! Configuration management for Coldvault

use serde::Deserialize;
use std::env;
use std::fmt;
use std::path::PathBuf;

use crate::crypto::{ChecksumAlgorithm, EncryptionAlgorithm};
use crate::error::{AppError, Result};

/// Default size at or above which files go through multipart upload: 64MB
pub const DEFAULT_CHUNK_THRESHOLD: u64 = 64 * 1024 * 1024;

/// Default multipart part size: 16MB
pub const DEFAULT_CHUNK_SIZE: u64 = 16 * 1024 * 1024;

/// Default number of scanner workers
pub const DEFAULT_WORKERS: usize = 4;

#[derive(Debug, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub upload: UploadConfig,
    pub scan: ScanConfig,
    pub encryption: EncryptionConfig,
    pub directories: Vec<DirectoryConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Custom endpoint for S3-compatible services; `None` means AWS
    pub endpoint: Option<String>,
    pub region: Option<String>,
    /// Static credentials; when absent the default AWS provider chain is used
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// One backed-up directory
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DirectoryConfig {
    pub local_path: PathBuf,
    pub bucket: String,
    #[serde(default = "default_storage_class")]
    pub storage_class: String,
}

fn default_storage_class() -> String {
    "STANDARD".to_string()
}

/// Upload tuning shared by every directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadConfig {
    /// Files of at least this many bytes are uploaded in parts
    pub chunk_threshold: u64,
    /// Part length for multipart uploads (the last part may be shorter)
    pub chunk_size: u64,
    pub checksum_algorithm: ChecksumAlgorithm,
    pub encryption_algorithm: EncryptionAlgorithm,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_threshold: DEFAULT_CHUNK_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
            checksum_algorithm: ChecksumAlgorithm::Sha256,
            encryption_algorithm: EncryptionAlgorithm::Aes256,
        }
    }
}

impl UploadConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_threshold(mut self, threshold: u64) -> Self {
        self.chunk_threshold = threshold;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_checksum_algorithm(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum_algorithm = algorithm;
        self
    }

    pub fn with_encryption_algorithm(mut self, algorithm: EncryptionAlgorithm) -> Self {
        self.encryption_algorithm = algorithm;
        self
    }

    /// Reject settings that can never produce a valid upload
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(AppError::InvalidConfig("chunk size must be greater than zero".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    pub workers: usize,
    /// Bounded queue capacity between the walker and the workers.
    /// `None` sizes it to twice the worker count.
    pub queue_depth: Option<usize>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_depth: None,
        }
    }
}

impl ScanConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = Some(depth);
        self
    }

    /// Effective queue capacity
    pub fn queue_capacity(&self) -> usize {
        self.queue_depth.unwrap_or(self.workers * 2).max(1)
    }
}

#[derive(Clone)]
pub struct EncryptionConfig {
    /// Shared secret every per-file key is derived from
    pub secret: String,
}

impl fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage: StorageConfig {
                endpoint: Some("http://localhost:9000".to_string()),
                region: Some("us-east-1".to_string()),
                access_key: Some("admin".to_string()),
                secret_key: Some("password123".to_string()),
            },
            database: DatabaseConfig {
                url: "sqlite:./coldvault.db".to_string(),
            },
            upload: UploadConfig::default(),
            scan: ScanConfig::default(),
            encryption: EncryptionConfig {
                secret: String::new(),
            },
            directories: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let upload = UploadConfig {
            chunk_threshold: parse_var("COLDVAULT_CHUNK_THRESHOLD", DEFAULT_CHUNK_THRESHOLD)?,
            chunk_size: parse_var("COLDVAULT_CHUNK_SIZE", DEFAULT_CHUNK_SIZE)?,
            checksum_algorithm: parse_var("COLDVAULT_CHECKSUM", ChecksumAlgorithm::Sha256)?,
            encryption_algorithm: parse_var("COLDVAULT_ENCRYPTION", EncryptionAlgorithm::Aes256)?,
        };
        upload.validate()?;

        let secret = env::var("COLDVAULT_ENCRYPTION_SECRET").map_err(|_| {
            AppError::InvalidConfig("COLDVAULT_ENCRYPTION_SECRET must be set".to_string())
        })?;

        let directories = match env::var("COLDVAULT_DIRECTORIES") {
            Ok(raw) => parse_directories(&raw)?,
            Err(_) => Vec::new(),
        };

        Ok(Config {
            storage: StorageConfig {
                endpoint: env::var("S3_ENDPOINT").ok(),
                region: env::var("S3_REGION").ok(),
                access_key: env::var("S3_ACCESS_KEY").ok(),
                secret_key: env::var("S3_SECRET_KEY").ok(),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./coldvault.db".to_string()),
            },
            upload,
            scan: ScanConfig {
                workers: parse_var("COLDVAULT_WORKERS", DEFAULT_WORKERS)?,
                queue_depth: env::var("COLDVAULT_QUEUE_DEPTH")
                    .ok()
                    .map(|v| parse_value("COLDVAULT_QUEUE_DEPTH", &v))
                    .transpose()?,
            },
            encryption: EncryptionConfig { secret },
            directories,
        })
    }
}

/// Parse the JSON list of backed-up directories
pub fn parse_directories(raw: &str) -> Result<Vec<DirectoryConfig>> {
    let directories: Vec<DirectoryConfig> = serde_json::from_str(raw)?;
    for dir in &directories {
        if dir.bucket.is_empty() {
            return Err(AppError::InvalidConfig(format!(
                "directory {} has no bucket",
                dir.local_path.display()
            )));
        }
    }
    Ok(directories)
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    match env::var(name) {
        Ok(value) => parse_value(name, &value),
        Err(_) => Ok(default),
    }
}

fn parse_value<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| AppError::InvalidConfig(format!("{}={:?}: {}", name, value, e)))
}
