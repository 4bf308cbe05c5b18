//! Encryption at rest for cached records
//!
//! AES-256-GCM with a fresh random 96-bit nonce per write. The stored blob is
//! `nonce ‖ ciphertext`; there is no associated data. Only record values are
//! encrypted; keys stay plaintext so the namespace prefixes remain visible
//! to operators.

use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};

use crate::{Error, Result};

/// AES-GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Cipher wrapping every value written to the remote cache back-end.
pub struct CacheCipher {
    cipher: Aes256Gcm,
}

impl CacheCipher {
    /// Create a cipher from a raw 32-byte key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the key is not exactly 32 bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != 32 {
            return Err(Error::Config(format!(
                "cache encryption key must be 32 bytes, got {}",
                key.len()
            )));
        }
        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        })
    }

    /// Encrypt `plaintext`, returning `nonce ‖ ciphertext`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] on cipher failure.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| Error::Internal("cache encryption failed".to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    /// Decrypt a `nonce ‖ ciphertext` blob.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Internal`] when the blob is truncated or fails
    /// authentication.
    pub fn open(&self, blob: &[u8]) -> Result<Vec<u8>> {
        if blob.len() <= NONCE_LEN {
            return Err(Error::Internal("cache blob too short".to_string()));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Internal("cache decryption failed".to_string()))
    }
}

impl std::fmt::Debug for CacheCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material must never leak through Debug output
        f.debug_struct("CacheCipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> CacheCipher {
        CacheCipher::new(&[42u8; 32]).unwrap()
    }

    #[test]
    fn roundtrip_recovers_plaintext() {
        let c = cipher();
        let blob = c.seal(b"refresh-token-material").unwrap();
        let plain = c.open(&blob).unwrap();
        assert_eq!(plain, b"refresh-token-material");
    }

    #[test]
    fn same_plaintext_yields_different_ciphertexts() {
        // Random nonce per write: two seals of identical input must differ
        let c = cipher();
        let a = c.seal(b"payload").unwrap();
        let b = c.seal(b"payload").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn blob_is_nonce_prefixed() {
        let c = cipher();
        let blob = c.seal(b"x").unwrap();
        // 12-byte nonce + 1 byte plaintext + 16-byte GCM tag
        assert_eq!(blob.len(), 12 + 1 + 16);
    }

    #[test]
    fn tampered_blob_fails_to_open() {
        let c = cipher();
        let mut blob = c.seal(b"payload").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xFF;
        assert!(c.open(&blob).is_err());
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let c = cipher();
        assert!(c.open(&[0u8; 12]).is_err());
        assert!(c.open(&[]).is_err());
    }

    #[test]
    fn wrong_key_length_is_rejected() {
        assert!(CacheCipher::new(&[0u8; 16]).is_err());
        assert!(CacheCipher::new(&[0u8; 33]).is_err());
        assert!(CacheCipher::new(&[0u8; 32]).is_ok());
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let blob = cipher().seal(b"payload").unwrap();
        let other = CacheCipher::new(&[7u8; 32]).unwrap();
        assert!(other.open(&blob).is_err());
    }

    #[test]
    fn debug_does_not_expose_key_material() {
        let out = format!("{:?}", cipher());
        assert!(!out.contains("42"));
    }
}
