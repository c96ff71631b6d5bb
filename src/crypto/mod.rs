//! Checksums and per-file encryption keys
//!
//! - `checksum`: streaming CRC32 / SHA-256 content checksums
//! - `kdf`: Argon2id derivation of per-file keys from the shared secret
//! - `customer_key`: SSE-C material (base64 key + MD5 fingerprint)

mod checksum;
mod customer_key;
mod kdf;

pub use checksum::{compute_checksum, compute_hash, ChecksumAlgorithm};
pub use customer_key::CustomerKey;
pub use kdf::{generate_key, generate_salt, KdfParams, SALT_LEN};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Server-side encryption algorithm for customer-supplied keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionAlgorithm {
    Aes256,
}

impl EncryptionAlgorithm {
    /// Key length in bytes
    pub fn key_len(&self) -> usize {
        match self {
            Self::Aes256 => 32,
        }
    }

    /// Value sent in the SSE-C algorithm header
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aes256 => "AES256",
        }
    }
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "").as_str() {
            "aes256" => Ok(Self::Aes256),
            other => Err(format!("unsupported encryption algorithm: {}", other)),
        }
    }
}
