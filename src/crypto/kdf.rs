//! Argon2id derivation of per-file encryption keys
//!
//! Only the salt is persisted; the same `(secret, salt)` always yields the
//! same key, so a stored salt is enough to rebuild the key later.

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{AppError, Result};

/// Per-file salt length in bytes
pub const SALT_LEN: usize = 16;

/// Argon2 cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    pub time_cost: u32,
    /// Memory cost in KiB
    pub memory_kib: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            time_cost: 1,
            memory_kib: 64 * 1024, // 64 MiB
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// Derive `key_len` bytes from `secret` and `salt`
    pub fn derive(&self, secret: &[u8], salt: &[u8], key_len: usize) -> Result<Zeroizing<Vec<u8>>> {
        let params = Params::new(self.memory_kib, self.time_cost, self.parallelism, Some(key_len))
            .map_err(|e| AppError::KeyDerivation(format!("argon2 params: {e}")))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

        let mut key = Zeroizing::new(vec![0u8; key_len]);
        argon2
            .hash_password_into(secret, salt, key.as_mut_slice())
            .map_err(|e| AppError::KeyDerivation(format!("argon2: {e}")))?;
        Ok(key)
    }
}

/// Derive a per-file key with the default cost parameters
pub fn generate_key(secret: &[u8], salt: &[u8], key_len: usize) -> Result<Zeroizing<Vec<u8>>> {
    KdfParams::default().derive(secret, salt, key_len)
}

/// Fresh random salt from OS entropy
pub fn generate_salt() -> Vec<u8> {
    let mut salt = vec![0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}
