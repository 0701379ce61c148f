//! AES-256-GCM cipher for the encrypted file backend.
//!
//! Blob layout: nonce (12 bytes) || ciphertext || tag (16 bytes).

use std::fmt;
use std::sync::OnceLock;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use rand::rngs::OsRng;

use crate::Error;

const NONCE_LEN: usize = 12;

/// Lazily keyed cipher shared by every record using one encrypted backend.
///
/// The key comes from configuration when provided; otherwise a random key is
/// generated on first use and lives as long as the cipher.
pub struct RecordCipher {
    configured_key: Option<[u8; 32]>,
    cipher: OnceLock<Aes256Gcm>,
}

impl fmt::Debug for RecordCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordCipher")
            .field("configured_key", &self.configured_key.is_some())
            .field("initialized", &self.cipher.get().is_some())
            .finish()
    }
}

impl RecordCipher {
    /// Cipher using `key`, or a per-process random key when `None`.
    pub fn new(key: Option<[u8; 32]>) -> Self {
        Self { configured_key: key, cipher: OnceLock::new() }
    }

    fn cipher(&self) -> &Aes256Gcm {
        self.cipher.get_or_init(|| {
            let key = self.configured_key.unwrap_or_else(|| {
                tracing::info!("Generating session cipher key");
                let mut key = [0u8; 32];
                OsRng.fill_bytes(&mut key);
                key
            });
            Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key))
        })
    }

    /// Encrypt a payload.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher()
            .encrypt(nonce, plaintext)
            .map_err(|e| Error::Cipher(format!("encrypt failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt a blob produced by [`RecordCipher::encrypt`].
    pub fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>, Error> {
        if blob.len() < NONCE_LEN {
            return Err(Error::Cipher("blob shorter than nonce".into()));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        self.cipher()
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| Error::Cipher(format!("decrypt failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_sizes() {
        let cipher = RecordCipher::new(None);
        for size in [0usize, 1, 4096] {
            let payload: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let blob = cipher.encrypt(&payload).unwrap();
            assert_ne!(blob, payload);
            assert_eq!(cipher.decrypt(&blob).unwrap(), payload);
        }
    }

    #[test]
    fn test_corrupted_ciphertext_fails() {
        let cipher = RecordCipher::new(None);
        let mut blob = cipher.encrypt(b"price data").unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        assert!(matches!(cipher.decrypt(&blob), Err(Error::Cipher(_))));
    }

    #[test]
    fn test_truncated_blob_fails() {
        let cipher = RecordCipher::new(None);
        assert!(cipher.decrypt(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_configured_key_is_shared() {
        let writer = RecordCipher::new(Some([7u8; 32]));
        let reader = RecordCipher::new(Some([7u8; 32]));
        let blob = writer.encrypt(b"tab state").unwrap();
        assert_eq!(reader.decrypt(&blob).unwrap(), b"tab state");
    }

    #[test]
    fn test_random_keys_differ() {
        let a = RecordCipher::new(None);
        let b = RecordCipher::new(None);
        let blob = a.encrypt(b"secret").unwrap();
        assert!(b.decrypt(&blob).is_err());
    }
}
