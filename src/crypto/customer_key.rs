//! SSE-C key material as transmitted to the backend

use base64::{engine::general_purpose::STANDARD, Engine as _};
use md5::{Digest, Md5};
use std::fmt;

use super::EncryptionAlgorithm;

/// Customer-supplied key: base64 key plus base64 MD5 fingerprint
#[derive(Clone, PartialEq, Eq)]
pub struct CustomerKey {
    pub algorithm: EncryptionAlgorithm,
    pub key_b64: String,
    pub key_md5_b64: String,
}

impl CustomerKey {
    pub fn new(algorithm: EncryptionAlgorithm, key: &[u8]) -> Self {
        Self {
            algorithm,
            key_b64: STANDARD.encode(key),
            key_md5_b64: STANDARD.encode(Md5::digest(key)),
        }
    }
}

impl fmt::Debug for CustomerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomerKey")
            .field("algorithm", &self.algorithm)
            .field("key_b64", &"<redacted>")
            .field("key_md5_b64", &self.key_md5_b64)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_customer_key_encoding() {
        let key = CustomerKey::new(EncryptionAlgorithm::Aes256, b"");
        assert_eq!(key.key_b64, "");
        // MD5("") = d41d8cd98f00b204e9800998ecf8427e
        assert_eq!(key.key_md5_b64, "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[test]
    fn test_debug_hides_key() {
        let key = CustomerKey::new(EncryptionAlgorithm::Aes256, &[0xAB; 32]);
        let rendered = format!("{:?}", key);
        assert!(!rendered.contains(&key.key_b64));
        assert!(rendered.contains("redacted"));
    }
}
