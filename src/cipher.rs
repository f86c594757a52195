//! Encrypt/decrypt hook around every remote transfer
//!
//! Bytes pass through `encrypt` before upload and through `decrypt` after
//! download. Implementations must be symmetric: `decrypt(encrypt(x)) == x`.
//! The default is the identity.

use crate::error::Result;
use bytes::Bytes;

pub trait BlobCipher: Send + Sync {
    fn encrypt(&self, plaintext: Bytes) -> Result<Bytes>;

    fn decrypt(&self, ciphertext: Bytes) -> Result<Bytes>;

    /// Short name for logs
    fn name(&self) -> &'static str {
        "custom"
    }
}

/// Identity cipher
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughCipher;

impl BlobCipher for PassthroughCipher {
    fn encrypt(&self, plaintext: Bytes) -> Result<Bytes> {
        Ok(plaintext)
    }

    fn decrypt(&self, ciphertext: Bytes) -> Result<Bytes> {
        Ok(ciphertext)
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}
